use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use channel_harvest::browser::BrowserlessAgent;
use channel_harvest::checkpoint::CheckpointStore;
use channel_harvest::context::RunContext;
use channel_harvest::extractor::YtDlpExtractor;
use channel_harvest::pipeline::Harvester;
use channel_harvest::{config, db};
use clap::Parser;
use tracing::info;

#[derive(Debug, Parser)]
#[command(author, version, about)]
struct Args {
    /// Path to YAML config file
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,

    /// Channel URL, e.g. https://www.youtube.com/@someone
    channel_url: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .compact()
        .init();

    let args = Args::parse();
    let cfg = config::load(Some(&args.config))
        .with_context(|| format!("loading {}", args.config.display()))?;
    cfg.ensure_dirs()?;

    let database_url =
        std::env::var("DATABASE_URL").unwrap_or_else(|_| cfg.app.database_url());
    let pool = db::init_pool(&database_url).await?;
    db::run_migrations(&pool).await?;

    let ctx = RunContext::new(&args.channel_url);
    info!(channel_id = %ctx.channel_id, run_id = %ctx.run_id, "channel identity");

    let harvester = Harvester::new(
        ctx,
        pool,
        CheckpointStore::new(cfg.app.checkpoint_dir()),
        Arc::new(YtDlpExtractor::from_settings(&cfg.extractor)),
        Arc::new(BrowserlessAgent::new(&cfg.browser)?),
        cfg.harvest,
        cfg.app.export_dir(),
    );
    let report = harvester.run().await?;

    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
