use super::model::ChannelInfoRow;
use crate::model::{ChannelInfo, Comment, ContentItem, ContentKind};
use anyhow::{Context, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Sqlite, SqlitePool, Transaction};
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, instrument};

pub type Pool = SqlitePool;

pub async fn init_pool(database_url: &str) -> Result<Pool> {
    let normalized = prepare_sqlite_url(database_url);
    let in_memory = normalized.starts_with("sqlite::memory");
    // WAL plus FULL sync; concurrent item writers wait on the busy timeout.
    let options = SqliteConnectOptions::from_str(&normalized)
        .with_context(|| format!("invalid database url {normalized}"))?
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Full)
        .busy_timeout(Duration::from_secs(10));
    let mut pool_options = SqlitePoolOptions::new();
    if in_memory {
        // Each in-memory connection would otherwise be its own database.
        pool_options = pool_options.max_connections(1);
    }
    let pool = pool_options.connect_with(options).await?;
    Ok(pool)
}

/// If using a file-backed SQLite URL, expand a leading `~/` and ensure the parent
/// directory exists. Leaves in-memory URLs untouched. Returns possibly-updated URL.
fn prepare_sqlite_url(url: &str) -> String {
    if !url.starts_with("sqlite:") || url.starts_with("sqlite::memory") {
        return url.to_string();
    }

    let rest = &url["sqlite:".len()..];
    let path_with_query = rest.strip_prefix("//").unwrap_or(rest);

    let (path_part, query_part) = match path_with_query.split_once('?') {
        Some((p, q)) => (p, Some(q)),
        None => (path_with_query, None),
    };

    if path_part.is_empty() {
        return url.to_string();
    }

    let expanded_path = match (path_part.strip_prefix("~/"), std::env::var("HOME")) {
        (Some(rest), Ok(home)) => format!("{}/{}", home.trim_end_matches('/'), rest),
        _ => path_part.to_string(),
    };

    if let Some(parent) = std::path::Path::new(&expanded_path).parent() {
        if !parent.as_os_str().is_empty() {
            let _ = std::fs::create_dir_all(parent);
        }
    }

    let mut rebuilt = String::from("sqlite://");
    rebuilt.push_str(&expanded_path);
    if let Some(q) = query_part {
        rebuilt.push('?');
        rebuilt.push_str(q);
    }
    rebuilt
}

pub async fn run_migrations(pool: &Pool) -> Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

#[instrument(skip_all, fields(channel_id = %info.channel_id))]
pub async fn upsert_channel_info(pool: &Pool, info: &ChannelInfo) -> Result<()> {
    sqlx::query(
        "INSERT INTO Channel_Info (channel_id, channel_title, subscribers, total_views, joined_date, \
         total_videos, origin, channel_description, description_links, monetized, fetched_at) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?) \
         ON CONFLICT(channel_id) DO UPDATE SET \
         channel_title = excluded.channel_title, subscribers = excluded.subscribers, \
         total_views = excluded.total_views, joined_date = excluded.joined_date, \
         total_videos = excluded.total_videos, origin = excluded.origin, \
         channel_description = excluded.channel_description, \
         description_links = excluded.description_links, monetized = excluded.monetized, \
         fetched_at = excluded.fetched_at",
    )
    .bind(&info.channel_id)
    .bind(&info.channel_title)
    .bind(info.subscribers)
    .bind(info.total_views)
    .bind(&info.joined_date)
    .bind(info.total_videos)
    .bind(&info.origin)
    .bind(&info.channel_description)
    .bind(&info.description_links)
    .bind(info.monetized)
    .bind(info.fetched_at)
    .execute(pool)
    .await
    .context("failed to upsert channel info")?;
    Ok(())
}

#[instrument(skip_all)]
pub async fn load_channel_info(pool: &Pool, channel_id: &str) -> Result<Option<ChannelInfo>> {
    let row = sqlx::query_as::<_, ChannelInfoRow>(
        "SELECT channel_id, channel_title, subscribers, total_views, joined_date, total_videos, \
         origin, channel_description, description_links, monetized, fetched_at \
         FROM Channel_Info WHERE channel_id = ?",
    )
    .bind(channel_id)
    .fetch_optional(pool)
    .await?;
    Ok(row.map(ChannelInfo::from))
}

/// Write one item and its whole comment tree in a single transaction.
/// Existing rows with the same keys are replaced; nothing is deleted.
#[instrument(skip_all, fields(kind = kind.as_str(), item_id = %item.item_id))]
pub async fn upsert_item(
    pool: &Pool,
    kind: ContentKind,
    channel_id: &str,
    item: &ContentItem,
) -> Result<()> {
    let t = kind.tables();
    let mut tx = pool.begin().await?;

    let sql = format!(
        "INSERT INTO {items} ({id}, channel_id, title, description, views, duration, upload_date, \
         likes, comment_count, fetched_at) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?) \
         ON CONFLICT({id}) DO UPDATE SET channel_id = excluded.channel_id, title = excluded.title, \
         description = excluded.description, views = excluded.views, duration = excluded.duration, \
         upload_date = excluded.upload_date, likes = excluded.likes, \
         comment_count = excluded.comment_count, fetched_at = excluded.fetched_at",
        items = t.items,
        id = t.id_column,
    );
    sqlx::query(&sql)
        .bind(&item.item_id)
        .bind(channel_id)
        .bind(&item.title)
        .bind(&item.description)
        .bind(item.views)
        .bind(item.duration)
        .bind(&item.upload_date)
        .bind(item.likes)
        .bind(item.comment_count)
        .bind(item.fetched_at)
        .execute(&mut *tx)
        .await
        .with_context(|| format!("failed to upsert {} {}", kind.singular(), item.item_id))?;

    for comment in &item.comments {
        upsert_comment_tx(&mut tx, kind, item, comment).await?;
    }

    tx.commit().await?;
    debug!(
        comments = item.comments.len(),
        replies = item.reply_count(),
        "item written"
    );
    Ok(())
}

async fn upsert_comment_tx(
    tx: &mut Transaction<'_, Sqlite>,
    kind: ContentKind,
    item: &ContentItem,
    comment: &Comment,
) -> Result<()> {
    let t = kind.tables();
    let sql = format!(
        "INSERT INTO {comments} (comment_id, {id}, text, author, channel_id, timestamp, fetched_at) \
         VALUES (?, ?, ?, ?, ?, ?, ?) \
         ON CONFLICT(comment_id) DO UPDATE SET {id} = excluded.{id}, text = excluded.text, \
         author = excluded.author, channel_id = excluded.channel_id, \
         timestamp = excluded.timestamp, fetched_at = excluded.fetched_at",
        comments = t.comments,
        id = t.id_column,
    );
    sqlx::query(&sql)
        .bind(&comment.comment_id)
        .bind(&item.item_id)
        .bind(&comment.text)
        .bind(&comment.author)
        .bind(&comment.author_channel_id)
        .bind(&comment.timestamp)
        .bind(item.fetched_at)
        .execute(&mut **tx)
        .await
        .with_context(|| format!("failed to upsert comment {}", comment.comment_id))?;

    let reply_sql = format!(
        "INSERT INTO {replies} (reply_id, comment_id, text, author, timestamp, fetched_at) \
         VALUES (?, ?, ?, ?, ?, ?) \
         ON CONFLICT(reply_id) DO UPDATE SET comment_id = excluded.comment_id, \
         text = excluded.text, author = excluded.author, timestamp = excluded.timestamp, \
         fetched_at = excluded.fetched_at",
        replies = t.replies,
    );
    for reply in &comment.replies {
        sqlx::query(&reply_sql)
            .bind(&reply.reply_id)
            .bind(&comment.comment_id)
            .bind(&reply.text)
            .bind(&reply.author)
            .bind(&reply.timestamp)
            .bind(item.fetched_at)
            .execute(&mut **tx)
            .await
            .with_context(|| format!("failed to upsert reply {}", reply.reply_id))?;
    }
    Ok(())
}

#[instrument(skip_all)]
pub async fn count_items(pool: &Pool, kind: ContentKind, channel_id: &str) -> Result<i64> {
    let sql = format!(
        "SELECT COUNT(*) FROM {} WHERE channel_id = ?",
        kind.tables().items
    );
    let count: i64 = sqlx::query_scalar(&sql)
        .bind(channel_id)
        .fetch_one(pool)
        .await?;
    Ok(count)
}
