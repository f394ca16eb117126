use anyhow::{Context, Result};
use argh::FromArgs;
use gcsprobe_observability::Logging;

use crate::layout::{self, DEFAULT_BUCKET};

/// Print the storage layout of a Cloud Storage bucket.
#[derive(Debug, FromArgs)]
struct Args {
    /// name of the bucket to inspect
    #[argh(option, default = "String::from(DEFAULT_BUCKET)")]
    bucket: String,

    /// restrict the layout to objects under this prefix
    #[argh(option)]
    prefix: Option<String>,

    /// print the layout as JSON instead of debug output
    #[argh(switch)]
    json: bool,
}

/// Bootstrap the runtime and print the requested storage layout.
pub fn execute() -> Result<()> {
    let args: Args = argh::from_env();

    gcsprobe_observability::init_tracing(&Logging::default(), None);
    tracing::debug!(?args);

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;

    runtime
        .block_on(run(args))
        .context("storage layout lookup failed")
}

async fn run(args: Args) -> Result<()> {
    let client = layout::control_client().await?;
    tracing::info!("created storage control client");

    let layout = layout::storage_layout(&client, &args.bucket, args.prefix.as_deref()).await?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&layout)?);
    } else {
        println!("Storage Layout: {layout:#?}");
    }

    Ok(())
}
