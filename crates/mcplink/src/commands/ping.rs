//! `mcplink ping` - check that a server answers.

use std::time::Instant;

use anyhow::Result;
use clap::Args;
use serde_json::json;

use super::{Context, print_json, server_result};

/// Arguments for `mcplink ping`.
#[derive(Args, Debug)]
pub struct PingArgs {
    /// Name of the server in the config file
    pub server: String,
}

/// Run `mcplink ping`.
pub async fn run(args: PingArgs, ctx: &Context) -> Result<()> {
    let started = Instant::now();
    let client = ctx.connect(&args.server).await?;
    let connected_in = started.elapsed();

    let started = Instant::now();
    let outcome = client.ping().await;
    let round_trip = started.elapsed();
    let info = client.server_info();
    client.disconnect().await?;
    server_result(outcome?)?;

    if ctx.json_output {
        return print_json(&json!({
            "server": args.server,
            "name": info.as_ref().map(|i| i.server_info.name.clone()),
            "version": info.as_ref().map(|i| i.server_info.version.clone()),
            "protocolVersion": info.as_ref().map(|i| i.protocol_version.clone()),
            "connectMs": connected_in.as_millis() as u64,
            "pingMs": round_trip.as_millis() as u64,
        }));
    }

    if let Some(info) = info {
        println!(
            "✓ {} ({} v{}, protocol {})",
            args.server, info.server_info.name, info.server_info.version, info.protocol_version
        );
    }
    println!(
        "  connected in {} ms, ping {} ms",
        connected_in.as_millis(),
        round_trip.as_millis()
    );
    Ok(())
}
