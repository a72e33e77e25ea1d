//! `mcplink tools` - list the tools a server offers.

use anyhow::Result;
use clap::Args;
use serde_json::json;

use mcplink_client::{McpClient, ToolInfo};

use super::{Context, print_json, server_result};

/// Arguments for `mcplink tools`.
#[derive(Args, Debug)]
pub struct ToolsArgs {
    /// Name of the server in the config file
    pub server: String,

    /// Show full input schemas
    #[arg(long)]
    pub full: bool,
}

/// Run `mcplink tools`.
pub async fn run(args: ToolsArgs, ctx: &Context) -> Result<()> {
    let client = ctx.connect(&args.server).await?;
    let listed = list_every_tool(&client).await;
    client.disconnect().await?;
    let tools = listed?;

    if ctx.json_output {
        let entries: Vec<_> = tools
            .iter()
            .map(|tool| {
                if args.full {
                    json!(tool)
                } else {
                    json!({"name": tool.name, "description": tool.description})
                }
            })
            .collect();
        return print_json(&json!(entries));
    }

    if tools.is_empty() {
        println!("No tools available.");
        return Ok(());
    }

    println!("{} tools:", tools.len());
    for tool in &tools {
        println!("  • {}", tool.name);
        if let Some(desc) = &tool.description {
            println!("      {}", desc);
        }
        if args.full {
            println!("      schema: {}", serde_json::to_string(&tool.input_schema)?);
        }
    }
    Ok(())
}

/// Follow `nextCursor` until the server has listed everything.
async fn list_every_tool(client: &McpClient) -> Result<Vec<ToolInfo>> {
    let mut tools = Vec::new();
    let mut cursor: Option<String> = None;
    loop {
        let page = server_result(client.list_tools(cursor.as_deref()).await?)?;
        tools.extend(page.tools);
        match page.next_cursor {
            Some(next) if !next.is_empty() => cursor = Some(next),
            _ => break,
        }
    }
    Ok(tools)
}
