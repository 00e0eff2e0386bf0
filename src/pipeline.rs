//! Run orchestration: channel info, then videos, then shorts, then export.
//!
//! Stages advance strictly in order:
//! `Init -> ChannelInfoResolved -> VideosDone -> ShortsDone -> Exported`.
//! Item-level failures never stop a run; only setup errors surface from
//! [`Harvester::run`].

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use serde::Serialize;
use tracing::{error, info, warn, Instrument};
use uuid::Uuid;

use crate::browser::ChannelInfoSource;
use crate::checkpoint::{Checkpoint, CheckpointStore};
use crate::config::HarvestSettings;
use crate::context::RunContext;
use crate::db::{self, Pool};
use crate::export;
use crate::extractor::ItemExtractor;
use crate::model::{ChannelInfo, ContentItem, ContentKind, ItemDescriptor};
use crate::scheduler::{BatchOutcome, BatchScheduler, BatchSink};
use crate::task;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Init,
    ChannelInfoResolved,
    VideosDone,
    ShortsDone,
    Exported,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct KindSummary {
    pub listed: usize,
    pub resumed_from: usize,
    pub processed: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub persist_failures: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct HarvestReport {
    pub channel_id: String,
    pub run_id: Uuid,
    pub stage: Stage,
    pub videos: KindSummary,
    pub shorts: KindSummary,
    pub export_path: Option<PathBuf>,
}

impl HarvestReport {
    pub fn summary(&self, kind: ContentKind) -> &KindSummary {
        match kind {
            ContentKind::Video => &self.videos,
            ContentKind::Short => &self.shorts,
        }
    }

    fn summary_mut(&mut self, kind: ContentKind) -> &mut KindSummary {
        match kind {
            ContentKind::Video => &mut self.videos,
            ContentKind::Short => &mut self.shorts,
        }
    }
}

pub struct Harvester {
    ctx: RunContext,
    pool: Pool,
    checkpoints: CheckpointStore,
    extractor: Arc<dyn ItemExtractor>,
    browser: Arc<dyn ChannelInfoSource>,
    settings: HarvestSettings,
    scheduler: BatchScheduler,
    export_dir: PathBuf,
}

impl Harvester {
    pub fn new(
        ctx: RunContext,
        pool: Pool,
        checkpoints: CheckpointStore,
        extractor: Arc<dyn ItemExtractor>,
        browser: Arc<dyn ChannelInfoSource>,
        settings: HarvestSettings,
        export_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            scheduler: BatchScheduler::new(settings.max_concurrent_requests, settings.batch_size),
            ctx,
            pool,
            checkpoints,
            extractor,
            browser,
            settings,
            export_dir: export_dir.into(),
        }
    }

    pub async fn run(&self) -> Result<HarvestReport> {
        let span = self.ctx.span();
        self.run_stages().instrument(span).await
    }

    async fn run_stages(&self) -> Result<HarvestReport> {
        info!(channel_url = %self.ctx.channel_url, "starting harvest");
        let mut report = HarvestReport {
            channel_id: self.ctx.channel_id.clone(),
            run_id: self.ctx.run_id,
            stage: Stage::Init,
            videos: KindSummary::default(),
            shorts: KindSummary::default(),
            export_path: None,
        };

        let mut checkpoint = self.checkpoints.load(&self.ctx.channel_id).await;

        let channel_info = self.resolve_channel_info(&mut checkpoint).await;
        self.enter(&mut report, Stage::ChannelInfoResolved);

        for kind in ContentKind::ALL {
            let summary = self.harvest_kind(&mut checkpoint, kind).await;
            *report.summary_mut(kind) = summary;
            self.enter(
                &mut report,
                match kind {
                    ContentKind::Video => Stage::VideosDone,
                    ContentKind::Short => Stage::ShortsDone,
                },
            );
        }

        let artifact = export::build_artifact(channel_info, &checkpoint, |kind| {
            report.summary(kind).listed
        });
        match export::write_artifact(&self.export_dir, &artifact).await {
            Ok(path) => {
                report.export_path = Some(path);
                self.enter(&mut report, Stage::Exported);
            }
            Err(err) => error!(?err, "failed to write export"),
        }

        info!(
            stage = ?report.stage,
            videos_ok = report.videos.succeeded,
            videos_failed = report.videos.failed,
            shorts_ok = report.shorts.succeeded,
            shorts_failed = report.shorts.failed,
            "harvest finished"
        );
        Ok(report)
    }

    fn enter(&self, report: &mut HarvestReport, stage: Stage) {
        debug_assert!(stage > report.stage);
        info!(from = ?report.stage, to = ?stage, "stage transition");
        report.stage = stage;
    }

    /// Channel info from the store when the checkpoint says it was scraped,
    /// otherwise (or when the store disagrees) from the browser agent.
    async fn resolve_channel_info(&self, checkpoint: &mut Checkpoint) -> ChannelInfo {
        let channel_id = &self.ctx.channel_id;
        if checkpoint.channel_info_scraped {
            match db::load_channel_info(&self.pool, channel_id).await {
                Ok(Some(info)) => {
                    info!("channel info loaded from store");
                    if checkpoint.channel_info.is_none() {
                        checkpoint.channel_info = Some(info.clone());
                    }
                    return info;
                }
                Ok(None) => warn!("checkpoint marks channel info scraped but store has none; re-scraping"),
                Err(err) => error!(?err, "failed to read channel info; re-scraping"),
            }
        }

        let info = self.browser.scrape_channel_info(&self.ctx).await;
        if let Err(err) = db::upsert_channel_info(&self.pool, &info).await {
            error!(?err, "failed to store channel info");
        }
        checkpoint.record_channel_info(info.clone());
        self.checkpoints.save_or_warn(channel_id, &*checkpoint).await;
        info
    }

    async fn harvest_kind(&self, checkpoint: &mut Checkpoint, kind: ContentKind) -> KindSummary {
        let descriptors = match self.extractor.list_items(&self.ctx.channel_url, kind).await {
            Ok(descriptors) => descriptors,
            Err(err) => {
                error!(kind = kind.as_str(), %err, "listing failed; no items for this kind");
                Vec::new()
            }
        };

        let start = checkpoint.processed(kind);
        if start > descriptors.len() {
            warn!(
                kind = kind.as_str(),
                processed = start,
                listed = descriptors.len(),
                "listing shorter than checkpoint; nothing left to fetch"
            );
        }
        info!(
            kind = kind.as_str(),
            listed = descriptors.len(),
            resume_from = start,
            "harvesting"
        );

        let policy = self.settings.retry_policy();
        let unit = move |position: task::ItemPosition, descriptor: ItemDescriptor| {
            let ctx = self.ctx.clone();
            let extractor = self.extractor.clone();
            async move {
                task::fetch_item(&ctx, extractor.as_ref(), kind, &descriptor, position, &policy)
                    .await
            }
        };

        let mut sink = PersistSink {
            pool: &self.pool,
            ctx: &self.ctx,
            checkpoints: &self.checkpoints,
            checkpoint,
            kind,
            persist_failures: 0,
        };
        let schedule = self.scheduler.run(&descriptors, start, unit, &mut sink).await;

        KindSummary {
            listed: descriptors.len(),
            resumed_from: start,
            processed: schedule.processed,
            succeeded: schedule.succeeded,
            failed: schedule.failed,
            persist_failures: sink.persist_failures,
        }
    }
}

/// Persists a settled batch, then records it in the checkpoint.
struct PersistSink<'a> {
    pool: &'a Pool,
    ctx: &'a RunContext,
    checkpoints: &'a CheckpointStore,
    checkpoint: &'a mut Checkpoint,
    kind: ContentKind,
    persist_failures: usize,
}

#[async_trait]
impl BatchSink<ContentItem> for PersistSink<'_> {
    async fn commit(&mut self, outcome: BatchOutcome<ContentItem>) {
        let kind = self.kind;
        for item in &outcome.results {
            if let Err(err) = db::upsert_item(self.pool, kind, &self.ctx.channel_id, item).await {
                // The item still goes into the checkpoint and export.
                error!(kind = kind.as_str(), item_id = %item.item_id, ?err, "failed to persist item");
                self.persist_failures += 1;
            }
        }

        let stored = outcome.results.len();
        self.checkpoint.items_mut(kind).extend(outcome.results);
        self.checkpoint.advance(kind, outcome.range.end);
        self.checkpoints
            .save_or_warn(&self.ctx.channel_id, &*self.checkpoint)
            .await;
        info!(
            kind = kind.as_str(),
            processed = outcome.range.end,
            stored,
            failed = outcome.failed,
            "batch committed"
        );
    }
}
