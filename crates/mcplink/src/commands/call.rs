//! `mcplink call` - call a tool and print what it returned.

use anyhow::{Context as _, Result, bail};
use clap::Args;
use serde_json::{Value, json};

use super::{Context, print_json, server_result};

/// Arguments for `mcplink call`.
#[derive(Args, Debug)]
pub struct CallArgs {
    /// Name of the server in the config file
    pub server: String,

    /// Tool to call
    pub tool: String,

    /// Tool arguments as a JSON object
    #[arg(long, short = 'a', default_value = "{}")]
    pub args: String,
}

/// Run `mcplink call`.
pub async fn run(args: CallArgs, ctx: &Context) -> Result<()> {
    let arguments = parse_arguments(&args.args)?;

    let client = ctx.connect(&args.server).await?;
    let outcome = client.call_tool(&args.tool, Some(arguments)).await;
    client.disconnect().await?;
    let result = server_result(outcome?)?;

    if ctx.json_output {
        print_json(&json!(result))?;
    } else if let Some(text) = result.text() {
        println!("{}", text);
    } else {
        print_json(&json!(result.content))?;
    }

    if result.is_error() {
        bail!("tool '{}' reported an error", args.tool);
    }
    Ok(())
}

fn parse_arguments(raw: &str) -> Result<Value> {
    let value: Value = serde_json::from_str(raw).context("--args must be valid JSON")?;
    if !value.is_object() {
        bail!("--args must be a JSON object");
    }
    Ok(value)
}
