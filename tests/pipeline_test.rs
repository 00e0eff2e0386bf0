use anyhow::Result;
use async_trait::async_trait;
use channel_harvest::browser::ChannelInfoSource;
use channel_harvest::checkpoint::{Checkpoint, CheckpointStore};
use channel_harvest::config::HarvestSettings;
use channel_harvest::context::RunContext;
use channel_harvest::db::{self, Pool};
use channel_harvest::extractor::{ExtractionError, ItemExtractor};
use channel_harvest::model::{ChannelInfo, ContentKind, ItemDescriptor, RawComment, RawItem};
use channel_harvest::pipeline::{Harvester, Stage};
use std::path::PathBuf;
use std::sync::Arc;
use tempfile::TempDir;
use tokio::sync::Mutex;

const CHANNEL: &str = "https://www.youtube.com/@fixture";

/// What the extractor saw when an item was requested.
#[derive(Debug, Clone)]
struct Observation {
    url: String,
    checkpointed: usize,
    stored: i64,
}

#[derive(Clone)]
struct RecordingExtractor {
    videos: usize,
    shorts: usize,
    no_data: Vec<String>,
    listing_fails: bool,
    hang_on: Option<String>,
    pool: Pool,
    checkpoint_path: PathBuf,
    channel_id: String,
    seen: Arc<Mutex<Vec<Observation>>>,
}

impl RecordingExtractor {
    fn new(h: &Harness, videos: usize, shorts: usize) -> Self {
        Self {
            videos,
            shorts,
            no_data: Vec::new(),
            listing_fails: false,
            hang_on: None,
            pool: h.pool.clone(),
            checkpoint_path: h.store.path_for(&h.ctx.channel_id),
            channel_id: h.ctx.channel_id.clone(),
            seen: Arc::new(Mutex::new(Vec::new())),
        }
    }

    async fn urls(&self) -> Vec<String> {
        self.seen.lock().await.iter().map(|o| o.url.clone()).collect()
    }

    async fn observation(&self, url: &str) -> Observation {
        self.seen
            .lock()
            .await
            .iter()
            .find(|o| o.url == url)
            .cloned()
            .unwrap()
    }

    fn checkpointed_videos(&self) -> usize {
        std::fs::read(&self.checkpoint_path)
            .ok()
            .and_then(|bytes| serde_json::from_slice::<Checkpoint>(&bytes).ok())
            .map(|cp| cp.videos_processed)
            .unwrap_or(0)
    }
}

#[async_trait]
impl ItemExtractor for RecordingExtractor {
    async fn list_items(
        &self,
        _channel_url: &str,
        kind: ContentKind,
    ) -> Result<Vec<ItemDescriptor>, ExtractionError> {
        if self.listing_fails {
            return Err(ExtractionError::Status {
                status: "exit status: 1".into(),
                stderr: "channel unavailable".into(),
            });
        }
        let (count, prefix) = match kind {
            ContentKind::Video => (self.videos, "v"),
            ContentKind::Short => (self.shorts, "s"),
        };
        Ok((1..=count)
            .map(|i| {
                let id = format!("{prefix}{i}");
                ItemDescriptor {
                    url: kind.item_url(&id),
                    title: Some(format!("Listed {id}")),
                    id: Some(id),
                }
            })
            .collect())
    }

    async fn extract(&self, item_url: &str) -> Result<RawItem, ExtractionError> {
        let stored = db::count_items(&self.pool, ContentKind::Video, &self.channel_id)
            .await
            .unwrap_or(-1);
        self.seen.lock().await.push(Observation {
            url: item_url.to_string(),
            checkpointed: self.checkpointed_videos(),
            stored,
        });

        if self.hang_on.as_deref() == Some(item_url) {
            std::future::pending::<()>().await;
        }
        if self.no_data.iter().any(|u| u == item_url) {
            return Err(ExtractionError::NoData(item_url.to_string()));
        }
        let id = item_url
            .rsplit(|c: char| c == '=' || c == '/')
            .next()
            .unwrap_or_default()
            .to_string();
        Ok(RawItem {
            id: Some(id.clone()),
            title: Some(format!("Title {id}")),
            description: Some(format!("About {id}")),
            view_count: Some(10),
            duration: Some(61.0),
            upload_date: Some("20240102".into()),
            like_count: Some(1),
            comment_count: Some(2),
            comments: Some(vec![
                RawComment {
                    id: Some(format!("{id}-c")),
                    parent: Some("root".into()),
                    text: Some("first".into()),
                    ..Default::default()
                },
                RawComment {
                    id: Some(format!("{id}-r")),
                    parent: Some(format!("{id}-c")),
                    text: Some("reply".into()),
                    ..Default::default()
                },
            ]),
        })
    }
}

#[derive(Clone, Default)]
struct RecordingBrowser {
    calls: Arc<Mutex<u32>>,
}

impl RecordingBrowser {
    async fn calls(&self) -> u32 {
        *self.calls.lock().await
    }
}

#[async_trait]
impl ChannelInfoSource for RecordingBrowser {
    async fn scrape_channel_info(&self, ctx: &RunContext) -> ChannelInfo {
        *self.calls.lock().await += 1;
        ChannelInfo {
            channel_title: Some("Fixture Channel".into()),
            subscribers: Some(1200),
            total_videos: Some(25),
            ..ChannelInfo::unresolved(&ctx.channel_id)
        }
    }
}

struct Harness {
    _dir: TempDir,
    pool: Pool,
    store: CheckpointStore,
    export_dir: PathBuf,
    ctx: RunContext,
}

async fn harness() -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let url = format!("sqlite://{}", dir.path().join("harvest.db").display());
    let pool = db::init_pool(&url).await.unwrap();
    db::run_migrations(&pool).await.unwrap();
    Harness {
        store: CheckpointStore::new(dir.path().join("checkpoints")),
        export_dir: dir.path().join("exports"),
        ctx: RunContext::new(CHANNEL),
        pool,
        _dir: dir,
    }
}

fn settings() -> HarvestSettings {
    HarvestSettings {
        max_concurrent_requests: 4,
        batch_size: 10,
        retry_limit: 2,
        retry_backoff_ms: 0,
        task_timeout_secs: 5,
    }
}

fn harvester(h: &Harness, extractor: &RecordingExtractor, browser: &RecordingBrowser) -> Harvester {
    Harvester::new(
        h.ctx.clone(),
        h.pool.clone(),
        h.store.clone(),
        Arc::new(extractor.clone()),
        Arc::new(browser.clone()),
        settings(),
        h.export_dir.clone(),
    )
}

#[tokio::test]
async fn fresh_run_commits_batches_in_order() -> Result<()> {
    let h = harness().await;
    let extractor = RecordingExtractor::new(&h, 25, 3);
    let browser = RecordingBrowser::default();

    let report = harvester(&h, &extractor, &browser).run().await?;

    assert_eq!(report.stage, Stage::Exported);
    assert_eq!(report.videos.listed, 25);
    assert_eq!(report.videos.succeeded, 25);
    assert_eq!(report.shorts.succeeded, 3);
    assert_eq!(browser.calls().await, 1);

    // Items in batch n only start once batch n-1 is stored and checkpointed.
    for (index, checkpointed) in [(1, 0), (10, 0), (11, 10), (20, 10), (21, 20), (25, 20)] {
        let seen = extractor
            .observation(&ContentKind::Video.item_url(&format!("v{index}")))
            .await;
        assert_eq!(seen.checkpointed, checkpointed, "item {index}");
        assert_eq!(seen.stored, checkpointed as i64, "item {index}");
    }

    let cp = h.store.load(&h.ctx.channel_id).await;
    assert!(cp.channel_info_scraped);
    assert_eq!((cp.videos_processed, cp.shorts_processed), (25, 3));
    assert_eq!(cp.videos.len(), 25);
    assert_eq!(cp.shorts[0].description, "Title s1");

    assert_eq!(db::count_items(&h.pool, ContentKind::Video, &h.ctx.channel_id).await?, 25);
    assert_eq!(db::count_items(&h.pool, ContentKind::Short, &h.ctx.channel_id).await?, 3);

    let replies: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM Videos_Replies")
        .fetch_one(&h.pool)
        .await?;
    assert_eq!(replies, 25);

    let path = report.export_path.clone().unwrap();
    assert!(path.ends_with("Fixture_Channel_new_data.json"));
    let export: serde_json::Value = serde_json::from_slice(&std::fs::read(path)?)?;
    assert_eq!(export["videos"]["total"], 25);
    assert_eq!(export["shorts"]["total"], 3);
    assert_eq!(export["channel_info"]["channel_title"], "Fixture Channel");
    Ok(())
}

#[tokio::test]
async fn resume_skips_completed_batches_and_cached_channel_info() -> Result<()> {
    let h = harness().await;
    let browser = RecordingBrowser::default();
    let info = browser.scrape_channel_info(&h.ctx).await;
    db::upsert_channel_info(&h.pool, &info).await?;

    let mut cp = Checkpoint::default();
    cp.record_channel_info(info);
    cp.advance(ContentKind::Video, 20);
    h.store.save(&h.ctx.channel_id, &cp).await?;

    let extractor = RecordingExtractor::new(&h, 25, 0);
    let report = harvester(&h, &extractor, &browser).run().await?;

    assert_eq!(browser.calls().await, 1, "no second scrape");
    assert_eq!(report.videos.resumed_from, 20);
    assert_eq!(report.videos.processed, 5);

    let mut urls = extractor.urls().await;
    urls.sort();
    let mut expected: Vec<String> = (21..=25)
        .map(|i| ContentKind::Video.item_url(&format!("v{i}")))
        .collect();
    expected.sort();
    assert_eq!(urls, expected);

    let cp = h.store.load(&h.ctx.channel_id).await;
    assert_eq!(cp.videos_processed, 25);

    // `total` is the listing length, not the items collected this run.
    let export: serde_json::Value =
        serde_json::from_slice(&std::fs::read(report.export_path.unwrap())?)?;
    assert_eq!(export["videos"]["total"], 25);
    assert_eq!(export["videos"]["items"].as_array().unwrap().len(), 5);
    Ok(())
}

#[tokio::test]
async fn diverged_checkpoint_rescrapes_channel_info() -> Result<()> {
    let h = harness().await;
    let mut cp = Checkpoint::default();
    cp.channel_info_scraped = true;
    h.store.save(&h.ctx.channel_id, &cp).await?;

    let extractor = RecordingExtractor::new(&h, 0, 0);
    let browser = RecordingBrowser::default();
    let report = harvester(&h, &extractor, &browser).run().await?;

    assert_eq!(report.stage, Stage::Exported);
    assert_eq!(browser.calls().await, 1);
    let stored = db::load_channel_info(&h.pool, &h.ctx.channel_id).await?.unwrap();
    assert_eq!(stored.channel_title.as_deref(), Some("Fixture Channel"));
    Ok(())
}

#[tokio::test]
async fn failed_item_does_not_hold_back_its_batch() -> Result<()> {
    let h = harness().await;
    let mut extractor = RecordingExtractor::new(&h, 12, 0);
    extractor.no_data = vec![ContentKind::Video.item_url("v7")];
    let browser = RecordingBrowser::default();

    let report = harvester(&h, &extractor, &browser).run().await?;

    assert_eq!(report.videos.processed, 12);
    assert_eq!(report.videos.succeeded, 11);
    assert_eq!(report.videos.failed, 1);
    let cp = h.store.load(&h.ctx.channel_id).await;
    assert_eq!(cp.videos_processed, 12);
    assert!(cp.videos.iter().all(|v| v.item_id != "v7"));
    assert_eq!(db::count_items(&h.pool, ContentKind::Video, &h.ctx.channel_id).await?, 11);
    Ok(())
}

#[tokio::test]
async fn rerun_from_scratch_does_not_duplicate_rows() -> Result<()> {
    let h = harness().await;
    let extractor = RecordingExtractor::new(&h, 15, 4);
    let browser = RecordingBrowser::default();
    harvester(&h, &extractor, &browser).run().await?;

    std::fs::remove_file(h.store.path_for(&h.ctx.channel_id))?;
    harvester(&h, &extractor, &browser).run().await?;

    assert_eq!(db::count_items(&h.pool, ContentKind::Video, &h.ctx.channel_id).await?, 15);
    assert_eq!(db::count_items(&h.pool, ContentKind::Short, &h.ctx.channel_id).await?, 4);
    let channels: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM Channel_Info")
        .fetch_one(&h.pool)
        .await?;
    assert_eq!(channels, 1);
    let comments: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM Shorts_Comments")
        .fetch_one(&h.pool)
        .await?;
    assert_eq!(comments, 4);
    Ok(())
}

#[tokio::test]
async fn listing_failure_yields_empty_sections() -> Result<()> {
    let h = harness().await;
    let mut extractor = RecordingExtractor::new(&h, 5, 5);
    extractor.listing_fails = true;
    let browser = RecordingBrowser::default();

    let report = harvester(&h, &extractor, &browser).run().await?;

    assert_eq!(report.stage, Stage::Exported);
    assert_eq!(report.summary(ContentKind::Video).listed, 0);
    assert_eq!(report.summary(ContentKind::Short).listed, 0);
    assert!(extractor.urls().await.is_empty());
    let export: serde_json::Value =
        serde_json::from_slice(&std::fs::read(report.export_path.unwrap())?)?;
    assert_eq!(export["videos"]["total"], 0);
    Ok(())
}

#[tokio::test]
async fn interrupted_batch_is_redone_after_restart() -> Result<()> {
    let h = harness().await;
    let browser = RecordingBrowser::default();
    let mut stuck = RecordingExtractor::new(&h, 25, 0);
    stuck.hang_on = Some(ContentKind::Video.item_url("v15"));

    // Killed while the second batch is still in flight.
    let interrupted = tokio::time::timeout(
        std::time::Duration::from_secs(1),
        harvester(&h, &stuck, &browser).run(),
    )
    .await;
    assert!(interrupted.is_err());

    let cp = h.store.load(&h.ctx.channel_id).await;
    assert_eq!(cp.videos_processed, 10);
    assert_eq!(db::count_items(&h.pool, ContentKind::Video, &h.ctx.channel_id).await?, 10);

    let extractor = RecordingExtractor::new(&h, 25, 0);
    let report = harvester(&h, &extractor, &browser).run().await?;
    assert_eq!(report.videos.resumed_from, 10);
    assert_eq!(report.videos.succeeded, 15);
    assert_eq!(extractor.urls().await.len(), 15);
    assert_eq!(db::count_items(&h.pool, ContentKind::Video, &h.ctx.channel_id).await?, 25);
    let cp = h.store.load(&h.ctx.channel_id).await;
    assert_eq!((cp.videos_processed, cp.videos.len()), (25, 25));
    Ok(())
}

#[tokio::test]
async fn store_write_failure_still_accumulates_items() -> Result<()> {
    let h = harness().await;
    sqlx::query("DROP TABLE Videos_Replies").execute(&h.pool).await?;
    let extractor = RecordingExtractor::new(&h, 3, 0);
    let browser = RecordingBrowser::default();

    let report = harvester(&h, &extractor, &browser).run().await?;

    assert_eq!(report.stage, Stage::Exported);
    assert_eq!(report.videos.succeeded, 3);
    assert_eq!(report.videos.persist_failures, 3);
    assert_eq!(db::count_items(&h.pool, ContentKind::Video, &h.ctx.channel_id).await?, 0);

    let cp = h.store.load(&h.ctx.channel_id).await;
    assert_eq!(cp.videos_processed, 3);
    assert_eq!(cp.videos.len(), 3);

    let export: serde_json::Value =
        serde_json::from_slice(&std::fs::read(report.export_path.unwrap())?)?;
    assert_eq!(export["videos"]["items"].as_array().unwrap().len(), 3);
    Ok(())
}

#[tokio::test]
async fn unwritable_checkpoint_dir_does_not_stop_the_run() -> Result<()> {
    let mut h = harness().await;
    let blocker = h._dir.path().join("blocked");
    std::fs::write(&blocker, b"not a directory")?;
    h.store = CheckpointStore::new(&blocker);

    let extractor = RecordingExtractor::new(&h, 12, 2);
    let browser = RecordingBrowser::default();
    let report = harvester(&h, &extractor, &browser).run().await?;

    assert_eq!(report.stage, Stage::Exported);
    assert_eq!(report.videos.succeeded, 12);
    assert_eq!(report.shorts.succeeded, 2);
    assert_eq!(db::count_items(&h.pool, ContentKind::Video, &h.ctx.channel_id).await?, 12);
    assert!(!h.store.path_for(&h.ctx.channel_id).exists());

    let export: serde_json::Value =
        serde_json::from_slice(&std::fs::read(report.export_path.unwrap())?)?;
    assert_eq!(export["videos"]["items"].as_array().unwrap().len(), 12);
    assert_eq!(export["shorts"]["total"], 2);
    Ok(())
}
