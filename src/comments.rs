//! Rebuilds the two-level comment/reply structure from the flat comment
//! stream the extraction engine emits.
//!
//! The stream is walked once, left to right. A record whose parent has not
//! been seen yet is promoted to a top-level comment and reported as an
//! orphan; it is never re-linked if the parent shows up later.

use std::collections::HashMap;

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use uuid::Uuid;

use crate::model::{Comment, RawComment, RawTimestamp, Reply};

/// Timestamp every unparseable input maps to.
pub const SENTINEL_TIMESTAMP: &str = "1970-01-01T00:00:00";

/// Parent id the engine uses for top-level comments.
const ROOT_PARENT: &str = "root";

const ISO_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%d %H:%M",
    "%Y/%m/%d %H:%M:%S",
    "%m/%d/%Y %H:%M:%S",
];

const DATE_FORMATS: &[&str] = &[
    "%Y-%m-%d",
    "%Y/%m/%d",
    "%Y%m%d",
    "%m/%d/%Y",
    "%B %d, %Y",
    "%b %d, %Y",
    "%d %B %Y",
    "%d %b %Y",
];

static EMBEDDED_ISO: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(\d{4})-(\d{1,2})-(\d{1,2})(?:[T ](\d{1,2}):(\d{2})(?::(\d{2}))?)?")
        .expect("static regex")
});

static EMBEDDED_DAY_MONTH: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(\d{1,2})(?:st|nd|rd|th)?\s+([a-z]{3,9})\.?,?\s+(\d{4})\b")
        .expect("static regex")
});

static EMBEDDED_MONTH_DAY: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b([a-z]{3,9})\.?\s+(\d{1,2})(?:st|nd|rd|th)?,?\s+(\d{4})\b")
        .expect("static regex")
});

/// A reply whose parent was not seen earlier in the stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrphanReply {
    pub comment_id: String,
    pub parent_id: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommentTree {
    pub comments: Vec<Comment>,
    pub orphans: Vec<OrphanReply>,
}

impl CommentTree {
    pub fn reply_count(&self) -> usize {
        self.comments.iter().map(|c| c.replies.len()).sum()
    }
}

/// Build the nested comment tree. Output order follows input order; every
/// input record lands exactly once, either as a comment or as a reply.
pub fn build_comment_tree(records: &[RawComment]) -> CommentTree {
    let mut tree = CommentTree::default();
    // Seen id -> index of the top-level comment that owns it. Replies map to
    // their thread root since the platform has only two levels.
    let mut seen: HashMap<String, usize> = HashMap::new();

    for record in records {
        let id = record
            .id
            .clone()
            .filter(|id| !id.is_empty())
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        let parent = record
            .parent
            .as_deref()
            .filter(|p| !p.is_empty() && *p != ROOT_PARENT);

        match parent {
            None => {
                push_top_level(&mut tree, &mut seen, id, record);
            }
            Some(parent_id) => match seen.get(parent_id).copied() {
                Some(root) => {
                    tree.comments[root].replies.push(Reply {
                        reply_id: id.clone(),
                        text: text_of(record),
                        author: author_of(record),
                        timestamp: parse_timestamp(record.timestamp.as_ref()),
                    });
                    seen.insert(id, root);
                }
                None => {
                    tree.orphans.push(OrphanReply {
                        comment_id: id.clone(),
                        parent_id: parent_id.to_string(),
                    });
                    push_top_level(&mut tree, &mut seen, id, record);
                }
            },
        }
    }

    tree
}

fn push_top_level(
    tree: &mut CommentTree,
    seen: &mut HashMap<String, usize>,
    id: String,
    record: &RawComment,
) {
    tree.comments.push(Comment {
        comment_id: id.clone(),
        text: text_of(record),
        author: author_of(record),
        author_channel_id: record
            .author_id
            .clone()
            .unwrap_or_else(|| "N/A".to_string()),
        timestamp: parse_timestamp(record.timestamp.as_ref()),
        replies: Vec::new(),
    });
    seen.insert(id, tree.comments.len() - 1);
}

fn text_of(record: &RawComment) -> String {
    record.text.clone().unwrap_or_else(|| "N/A".to_string())
}

fn author_of(record: &RawComment) -> String {
    record.author.clone().unwrap_or_else(|| "Unknown".to_string())
}

/// Normalize an engine timestamp to `YYYY-MM-DDTHH:MM:SS` (UTC). Total:
/// anything that cannot be read becomes [`SENTINEL_TIMESTAMP`].
pub fn parse_timestamp(raw: Option<&RawTimestamp>) -> String {
    let parsed = match raw {
        Some(RawTimestamp::Epoch(secs)) => from_epoch(*secs),
        Some(RawTimestamp::Text(text)) => parse_fuzzy(text),
        None => None,
    };
    match parsed {
        Some(dt) => dt.format(ISO_FORMAT).to_string(),
        None => {
            tracing::debug!(?raw, "unparseable comment timestamp");
            SENTINEL_TIMESTAMP.to_string()
        }
    }
}

fn from_epoch(secs: f64) -> Option<NaiveDateTime> {
    if !secs.is_finite() {
        return None;
    }
    DateTime::<Utc>::from_timestamp(secs.trunc() as i64, 0).map(|dt| dt.naive_utc())
}

fn parse_fuzzy(text: &str) -> Option<NaiveDateTime> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(trimmed) {
        return Some(dt.naive_utc());
    }
    for fmt in DATETIME_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(trimmed, fmt) {
            return Some(dt);
        }
    }
    for fmt in DATE_FORMATS {
        if let Ok(date) = NaiveDate::parse_from_str(trimmed, fmt) {
            return date.and_hms_opt(0, 0, 0);
        }
    }

    embedded_date(trimmed)
}

/// Pick a date out of surrounding noise, e.g. `"posted on 2023-05-01 (edited)"`.
fn embedded_date(text: &str) -> Option<NaiveDateTime> {
    if let Some(caps) = EMBEDDED_ISO.captures(text) {
        let num = |i: usize| caps.get(i).and_then(|m| m.as_str().parse::<u32>().ok());
        let date = NaiveDate::from_ymd_opt(num(1)? as i32, num(2)?, num(3)?)?;
        return date.and_hms_opt(num(4).unwrap_or(0), num(5).unwrap_or(0), num(6).unwrap_or(0));
    }
    if let Some(caps) = EMBEDDED_DAY_MONTH.captures(text) {
        let day = caps[1].parse().ok()?;
        let month = month_number(&caps[2])?;
        let year = caps[3].parse().ok()?;
        return NaiveDate::from_ymd_opt(year, month, day)?.and_hms_opt(0, 0, 0);
    }
    if let Some(caps) = EMBEDDED_MONTH_DAY.captures(text) {
        let month = month_number(&caps[1])?;
        let day = caps[2].parse().ok()?;
        let year = caps[3].parse().ok()?;
        return NaiveDate::from_ymd_opt(year, month, day)?.and_hms_opt(0, 0, 0);
    }
    None
}

fn month_number(name: &str) -> Option<u32> {
    let lower = name.to_ascii_lowercase();
    let prefix = lower.get(..3)?;
    let n = match prefix {
        "jan" => 1,
        "feb" => 2,
        "mar" => 3,
        "apr" => 4,
        "may" => 5,
        "jun" => 6,
        "jul" => 7,
        "aug" => 8,
        "sep" => 9,
        "oct" => 10,
        "nov" => 11,
        "dec" => 12,
        _ => return None,
    };
    Some(n)
}
