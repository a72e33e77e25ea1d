//! `mcplink prompts` - list the prompts a server offers.

use anyhow::Result;
use clap::Args;
use serde_json::json;

use super::{Context, print_json, server_result};

/// Arguments for `mcplink prompts`.
#[derive(Args, Debug)]
pub struct PromptsArgs {
    /// Name of the server in the config file
    pub server: String,
}

/// Run `mcplink prompts`.
pub async fn run(args: PromptsArgs, ctx: &Context) -> Result<()> {
    let client = ctx.connect(&args.server).await?;
    let outcome = client.list_prompts(None).await;
    client.disconnect().await?;
    let prompts = server_result(outcome?)?.prompts;

    if ctx.json_output {
        return print_json(&json!(prompts));
    }
    if prompts.is_empty() {
        println!("No prompts available.");
        return Ok(());
    }
    for prompt in &prompts {
        let arguments: Vec<String> = prompt
            .arguments
            .iter()
            .map(|a| {
                if a.required {
                    a.name.clone()
                } else {
                    format!("[{}]", a.name)
                }
            })
            .collect();
        println!("  • {} {}", prompt.name, arguments.join(" "));
        if let Some(desc) = &prompt.description {
            println!("      {}", desc);
        }
    }
    Ok(())
}
