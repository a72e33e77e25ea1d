//! mcplink - probe MCP servers from the command line.
//!
//! Main entry point for the mcplink CLI.

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::prelude::*;

mod commands;

use commands::{call, list, ping, prompts, resources, tools};

// ─────────────────────────────────────────────────────────────────────────────
// CLI Structure
// ─────────────────────────────────────────────────────────────────────────────

/// mcplink - probe MCP servers over stdio, SSE or Streamable HTTP
#[derive(Parser)]
#[command(name = "mcplink")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Output as JSON (for scripting)
    #[arg(long, global = true)]
    pub json: bool,

    /// Emit log lines as JSON on stderr
    #[arg(long, global = true)]
    pub log_json: bool,

    /// Config file (default: ~/.config/mcplink/config.toml)
    #[arg(short, long, global = true, env = "MCPLINK_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// List configured servers
    List(list::ListArgs),

    /// Check that a server answers
    Ping(ping::PingArgs),

    /// List the tools a server offers
    Tools(tools::ToolsArgs),

    /// Call a tool
    Call(call::CallArgs),

    /// List the resources a server offers
    Resources(resources::ResourcesArgs),

    /// List the prompts a server offers
    Prompts(prompts::PromptsArgs),
}

// ─────────────────────────────────────────────────────────────────────────────
// Main
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Logs go to stderr so stdout stays machine-readable. RUST_LOG wins.
    let default_filter = if cli.verbose {
        "mcplink=debug,mcplink_client=debug,warn"
    } else {
        "mcplink=info,mcplink_client=warn,warn"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    tracing_subscriber::registry()
        .with(filter)
        .with(cli.log_json.then(|| {
            tracing_subscriber::fmt::layer()
                .json()
                .with_writer(std::io::stderr)
        }))
        .with((!cli.log_json).then(|| {
            tracing_subscriber::fmt::layer()
                .with_target(true)
                .with_writer(std::io::stderr)
        }))
        .init();

    let ctx = commands::Context {
        config_path: cli.config,
        json_output: cli.json,
        verbose: cli.verbose,
    };

    match cli.command {
        Commands::List(args) => list::run(args, &ctx).await,
        Commands::Ping(args) => ping::run(args, &ctx).await,
        Commands::Tools(args) => tools::run(args, &ctx).await,
        Commands::Call(args) => call::run(args, &ctx).await,
        Commands::Resources(args) => resources::run(args, &ctx).await,
        Commands::Prompts(args) => prompts::run(args, &ctx).await,
    }
}
