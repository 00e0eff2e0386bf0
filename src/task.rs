//! One unit of fetch work: extract an item, rebuild its comment tree, and
//! shape it into a [`ContentItem`]. Failures resolve to `None`.

use chrono::{NaiveDate, Utc};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::comments::build_comment_tree;
use crate::context::RunContext;
use crate::extractor::{ExtractionError, ItemExtractor};
use crate::model::{ContentItem, ContentKind, ItemDescriptor, RawItem};
use crate::retry::{retry, Attempt, RetryError, RetryPolicy};

/// Absolute 1-based position of an item in the full channel listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ItemPosition {
    pub index: usize,
    pub total: usize,
}

/// Fetch and transform one item under the retry policy and its deadline.
pub async fn fetch_item(
    ctx: &RunContext,
    extractor: &dyn ItemExtractor,
    kind: ContentKind,
    descriptor: &ItemDescriptor,
    position: ItemPosition,
    policy: &RetryPolicy,
) -> Option<ContentItem> {
    info!(
        channel_id = %ctx.channel_id,
        kind = kind.as_str(),
        index = position.index,
        total = position.total,
        url = %descriptor.url,
        "processing item"
    );

    let raw = retry(policy, |attempt| async move {
        match extractor.extract(&descriptor.url).await {
            Ok(raw) => Attempt::Done(raw),
            Err(err) if err.is_retryable() => {
                warn!(attempt, max = policy.max_attempts, url = %descriptor.url, %err, "extract attempt failed");
                Attempt::Retryable(err)
            }
            Err(err) => Attempt::Fatal(err),
        }
    })
    .await;

    let raw = match raw {
        Ok(raw) => raw,
        Err(err) => {
            report_failure(ctx, kind, descriptor, position, &err);
            return None;
        }
    };

    let item = transform(ctx, kind, descriptor, raw);
    info!(
        kind = kind.as_str(),
        index = position.index,
        total = position.total,
        item_id = %item.item_id,
        comments = item.comments.len(),
        replies = item.reply_count(),
        "item fetched"
    );
    Some(item)
}

fn report_failure(
    ctx: &RunContext,
    kind: ContentKind,
    descriptor: &ItemDescriptor,
    position: ItemPosition,
    err: &RetryError<ExtractionError>,
) {
    match err {
        RetryError::Fatal(ExtractionError::NoData(_)) => warn!(
            channel_id = %ctx.channel_id,
            kind = kind.as_str(),
            index = position.index,
            total = position.total,
            url = %descriptor.url,
            "skipped item: no data returned"
        ),
        _ => error!(
            channel_id = %ctx.channel_id,
            kind = kind.as_str(),
            index = position.index,
            total = position.total,
            url = %descriptor.url,
            %err,
            "failed to process item"
        ),
    }
}

/// Shape a raw engine payload into the stored item form.
pub fn transform(
    ctx: &RunContext,
    kind: ContentKind,
    descriptor: &ItemDescriptor,
    raw: RawItem,
) -> ContentItem {
    let tree = build_comment_tree(raw.comments.as_deref().unwrap_or_default());
    for orphan in &tree.orphans {
        warn!(
            channel_id = %ctx.channel_id,
            comment_id = %orphan.comment_id,
            parent_id = %orphan.parent_id,
            url = %descriptor.url,
            "orphan reply; treating as comment"
        );
    }

    let title = raw
        .title
        .clone()
        .or_else(|| descriptor.title.clone())
        .unwrap_or_else(|| "N/A".to_string());
    // Shorts carry no separate description; the title stands in for it.
    let description = match kind {
        ContentKind::Video => raw.description.clone().unwrap_or_default(),
        ContentKind::Short => raw.title.clone().unwrap_or_default(),
    };

    ContentItem {
        item_id: raw
            .id
            .filter(|id| !id.is_empty())
            .unwrap_or_else(|| Uuid::new_v4().to_string()),
        title,
        description,
        views: raw.view_count.unwrap_or(0),
        duration: raw
            .duration
            .filter(|d| d.is_finite())
            .map(|d| d.round() as i64)
            .unwrap_or(0),
        upload_date: format_upload_date(raw.upload_date.as_deref()),
        likes: raw.like_count.unwrap_or(0),
        comment_count: raw.comment_count.unwrap_or(0),
        fetched_at: Utc::now(),
        comments: tree.comments,
    }
}

/// `YYYYMMDD` to `YYYY-MM-DD`; anything else becomes `"N/A"`.
pub fn format_upload_date(raw: Option<&str>) -> String {
    raw.and_then(|s| NaiveDate::parse_from_str(s.trim(), "%Y%m%d").ok())
        .map(|d| d.format("%Y-%m-%d").to_string())
        .unwrap_or_else(|| "N/A".to_string())
}
