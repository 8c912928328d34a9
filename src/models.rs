//! Data models shared by the store, the resolver and the backfill driver.
//!
//! - [`ArticleRecord`]: a full stored article row
//! - [`ArticleSummary`]: the projection selected for a batch
//! - [`BatchRun`]: in-memory tally for one driver invocation

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// A stored article.
///
/// The pipeline only reads `id`, `title` and `publish_time`, and only ever
/// writes `content`. Once `content` is written it is never set back to null.
#[derive(Debug, Clone, PartialEq, Eq, FromRow, Deserialize)]
pub struct ArticleRecord {
    /// Stable upstream identifier, also the path segment of the source URL.
    pub id: String,
    pub title: String,
    /// Identifier of the feed/source account the article belongs to.
    pub mp_id: String,
    #[serde(default)]
    pub pic_url: String,
    /// Publish time in epoch seconds.
    pub publish_time: i64,
    pub content: Option<String>,
}

/// The subset of a record needed to process it.
#[derive(Debug, Clone, PartialEq, Eq, FromRow, Serialize)]
pub struct ArticleSummary {
    pub id: String,
    pub title: String,
    pub publish_time: i64,
}

impl From<&ArticleRecord> for ArticleSummary {
    fn from(record: &ArticleRecord) -> Self {
        Self {
            id: record.id.clone(),
            title: record.title.clone(),
            publish_time: record.publish_time,
        }
    }
}

/// Counters for one backfill run. Never persisted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BatchRun {
    /// Records returned by selection.
    pub total: usize,
    /// Records whose content write landed (fallback text included).
    pub success_count: u32,
    /// Records whose content write failed.
    pub fail_count: u32,
    /// Records left untouched because resolution fell back under the
    /// `leave-null` policy.
    pub skipped_count: u32,
    /// Cool-down pauses taken.
    pub pauses: u32,
    /// Whether a shutdown request ended the run early.
    pub cancelled: bool,
    /// Selection hit the batch limit, so more candidates may remain.
    pub more_remaining: bool,
}

impl BatchRun {
    /// Records that reached a terminal outcome in this run.
    pub fn processed(&self) -> u32 {
        self.success_count + self.fail_count + self.skipped_count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_summary_from_record() {
        let record = ArticleRecord {
            id: "abc123".to_string(),
            title: "Title".to_string(),
            mp_id: "MP_1".to_string(),
            pic_url: "https://img.test/p.png".to_string(),
            publish_time: 1_700_000_000,
            content: None,
        };
        let summary = ArticleSummary::from(&record);
        assert_eq!(summary.id, "abc123");
        assert_eq!(summary.title, "Title");
        assert_eq!(summary.publish_time, 1_700_000_000);
    }

    #[test]
    fn test_batch_run_serialization() {
        let run = BatchRun {
            total: 12,
            success_count: 10,
            fail_count: 1,
            skipped_count: 1,
            pauses: 2,
            cancelled: false,
            more_remaining: false,
        };
        assert_eq!(run.processed(), 12);

        let json = serde_json::to_string(&run).unwrap();
        assert!(json.contains("\"success_count\":10"));
        assert!(json.contains("\"pauses\":2"));
    }
}
