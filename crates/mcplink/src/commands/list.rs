//! `mcplink list` - show configured servers, optionally probing each one.

use anyhow::Result;
use clap::Args;
use serde_json::json;

use mcplink_client::{McpManager, ServerConfig, TransportType};

use super::{Context, print_json};

/// Arguments for `mcplink list`.
#[derive(Args, Debug)]
pub struct ListArgs {
    /// Connect to each enabled server and count its tools
    #[arg(long)]
    pub probe: bool,
}

/// Run `mcplink list`.
pub async fn run(args: ListArgs, ctx: &Context) -> Result<()> {
    let config = ctx.load_config()?;

    if config.servers.is_empty() {
        if ctx.json_output {
            println!("[]");
        } else {
            println!("No MCP servers configured.");
        }
        return Ok(());
    }

    let mut manager = McpManager::from_config(&config);
    let tool_counts = if args.probe {
        manager.connect_all().await;
        let tools = manager.list_all_tools().await;
        manager.shutdown_all().await;
        Some(tools)
    } else {
        None
    };

    let status = |server: &ServerConfig| -> String {
        if !server.enabled {
            return "disabled".to_string();
        }
        match &tool_counts {
            None => "enabled".to_string(),
            Some(tools) => match tools.get(&server.name) {
                Some(list) => format!("ok ({} tools)", list.len()),
                None => "unreachable".to_string(),
            },
        }
    };

    if ctx.json_output {
        let entries: Vec<_> = config
            .servers
            .iter()
            .map(|server| {
                let mut entry = json!({
                    "name": server.name,
                    "transport": server.transport.to_string(),
                    "enabled": server.enabled,
                    "target": target(server),
                });
                if let Some(tools) = tool_counts.as_ref() {
                    entry["tools"] = json!(tools.get(&server.name).map(Vec::len));
                }
                entry
            })
            .collect();
        return print_json(&json!(entries));
    }

    println!(
        "{:<20} {:<16} {:<16} {:<40}",
        "NAME", "TRANSPORT", "STATUS", "TARGET"
    );
    println!("{}", "-".repeat(92));
    for server in &config.servers {
        println!(
            "{:<20} {:<16} {:<16} {:<40}",
            server.name,
            server.transport.to_string(),
            status(server),
            target(server)
        );
        if ctx.verbose {
            for [key, value] in &server.env {
                println!("    env {}={}", key, value);
            }
            for [key, _] in &server.headers {
                println!("    header {}: <redacted>", key);
            }
        }
    }
    Ok(())
}

/// Command line or URL of a server.
fn target(server: &ServerConfig) -> String {
    match server.transport {
        TransportType::Stdio if server.args.is_empty() => server.command.clone(),
        TransportType::Stdio => format!("{} {}", server.command, server.args.join(" ")),
        TransportType::Sse | TransportType::StreamableHttp => {
            server.url.clone().unwrap_or_default()
        }
    }
}
