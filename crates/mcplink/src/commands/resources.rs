//! `mcplink resources` - list resources, or read one.

use anyhow::Result;
use clap::Args;
use serde_json::json;

use mcplink_client::protocol::ResourceContents;

use super::{Context, print_json, server_result};

/// Arguments for `mcplink resources`.
#[derive(Args, Debug)]
pub struct ResourcesArgs {
    /// Name of the server in the config file
    pub server: String,

    /// Read this resource instead of listing
    #[arg(long)]
    pub read: Option<String>,
}

/// Run `mcplink resources`.
pub async fn run(args: ResourcesArgs, ctx: &Context) -> Result<()> {
    let client = ctx.connect(&args.server).await?;

    if let Some(uri) = &args.read {
        let outcome = client.read_resource(uri).await;
        client.disconnect().await?;
        let result = server_result(outcome?)?;
        if ctx.json_output {
            return print_json(&json!(result));
        }
        for contents in &result.contents {
            match contents {
                ResourceContents::Text { text, .. } => println!("{}", text),
                ResourceContents::Blob { uri, blob, .. } => {
                    println!("<{} bytes of base64 from {}>", blob.len(), uri);
                }
            }
        }
        return Ok(());
    }

    let outcome = client.list_resources(None).await;
    client.disconnect().await?;
    let resources = server_result(outcome?)?.resources;

    if ctx.json_output {
        return print_json(&json!(resources));
    }
    if resources.is_empty() {
        println!("No resources available.");
        return Ok(());
    }
    for resource in &resources {
        match &resource.mime_type {
            Some(mime) => println!("  • {} ({}) [{}]", resource.name, resource.uri, mime),
            None => println!("  • {} ({})", resource.name, resource.uri),
        }
        if let Some(desc) = &resource.description {
            println!("      {}", desc);
        }
    }
    Ok(())
}
