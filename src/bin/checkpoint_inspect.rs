use std::path::PathBuf;

use anyhow::Result;
use channel_harvest::checkpoint::CheckpointStore;
use channel_harvest::config;
use channel_harvest::context::RunContext;
use channel_harvest::model::ContentKind;
use clap::Parser;
use serde_json::json;

#[derive(Parser, Debug)]
struct Args {
    /// Path to YAML config
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,

    /// Channel URL whose checkpoint to inspect
    channel_url: String,

    /// Include every accumulated item instead of ids only
    #[arg(long)]
    full: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let cfg = config::load(Some(&args.config))?;
    let ctx = RunContext::new(&args.channel_url);
    let store = CheckpointStore::new(cfg.app.checkpoint_dir());
    let cp = store.load(&ctx.channel_id).await;

    println!("Checkpoint: {}", store.path_for(&ctx.channel_id).display());
    let mut summary = json!({
        "channel_id": ctx.channel_id,
        "channel_info_scraped": cp.channel_info_scraped,
        "videos_processed": cp.videos_processed,
        "shorts_processed": cp.shorts_processed,
        "channel_info": cp.channel_info,
    });
    for kind in ContentKind::ALL {
        let items = cp.items(kind);
        summary[kind.as_str()] = if args.full {
            serde_json::to_value(items)?
        } else {
            json!({
                "count": items.len(),
                "ids": items.iter().map(|i| i.item_id.as_str()).collect::<Vec<_>>(),
            })
        };
    }
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}
