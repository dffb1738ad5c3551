//! Storage of captured mail items.
//!
//! [`MailStorage`] is the seam between the SMTP side and whatever keeps the
//! items. Two backends ship: [`MemoryStorage`] and [`SqliteStorage`].

mod memory;
mod sqlite;

pub use memory::MemoryStorage;
pub use sqlite::SqliteStorage;

use crate::Result;
use crate::config::{Configuration, StorageEngine};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mailsink_smtp::MailItem;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

/// A window into a result list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    /// Items to skip.
    pub offset: usize,
    /// Maximum items to return.
    pub limit: usize,
}

impl Page {
    /// Default page size.
    pub const DEFAULT_LIMIT: usize = 50;

    /// Creates a page.
    #[must_use]
    pub const fn new(offset: usize, limit: usize) -> Self {
        Self { offset, limit }
    }

    /// Returns the 1-based `number`th page of `size` items.
    #[must_use]
    pub const fn numbered(number: usize, size: usize) -> Self {
        Self {
            offset: number.saturating_sub(1).saturating_mul(size),
            limit: size,
        }
    }
}

impl Default for Page {
    fn default() -> Self {
        Self::new(0, Self::DEFAULT_LIMIT)
    }
}

/// Filters for [`MailStorage::search`]. Empty fields match everything.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SearchCriteria {
    /// Substring of the subject or either body.
    pub text: Option<String>,
    /// Substring of the sender.
    pub from: Option<String>,
    /// Substring of any recipient.
    pub to: Option<String>,
    /// Received at or after.
    pub since: Option<DateTime<Utc>>,
    /// Received at or before.
    pub until: Option<DateTime<Utc>>,
}

impl SearchCriteria {
    /// Returns `true` if no filter is set.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Checks an item against every filter. Text matching is
    /// case-insensitive.
    #[must_use]
    pub fn matches(&self, item: &MailItem) -> bool {
        if let Some(text) = non_empty(self.text.as_deref()) {
            let in_body = |body: &Option<String>| body.as_deref().is_some_and(|b| contains(b, text));
            if !(contains(&item.subject, text) || in_body(&item.body.text) || in_body(&item.body.html)) {
                return false;
            }
        }
        if let Some(from) = non_empty(self.from.as_deref())
            && !contains(&item.from_address, from)
        {
            return false;
        }
        if let Some(to) = non_empty(self.to.as_deref())
            && !item.to_addresses.iter().any(|rcpt| contains(rcpt, to))
        {
            return false;
        }
        if self.since.is_some_and(|since| item.received_at < since) {
            return false;
        }
        if self.until.is_some_and(|until| item.received_at > until) {
            return false;
        }
        true
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

/// Full Unicode lowercase, the one case rule every engine searches by.
pub(crate) fn fold(text: &str) -> String {
    text.to_lowercase()
}

fn contains(haystack: &str, needle: &str) -> bool {
    fold(haystack).contains(&fold(needle))
}

/// Persistence for captured mail items.
///
/// Listings are newest first.
#[async_trait]
pub trait MailStorage: Send + Sync {
    /// Stores an item, replacing one with the same id.
    async fn save(&self, item: &MailItem) -> Result<()>;

    /// Fetches one item.
    ///
    /// Fails with [`crate::Error::NotFound`] for an unknown id.
    async fn get(&self, id: &str) -> Result<MailItem>;

    /// Lists items.
    async fn list(&self, page: Page) -> Result<Vec<MailItem>> {
        self.search(&SearchCriteria::default(), page).await
    }

    /// Lists items matching `criteria`.
    async fn search(&self, criteria: &SearchCriteria, page: Page) -> Result<Vec<MailItem>>;

    /// Counts items matching `criteria`.
    async fn count(&self, criteria: &SearchCriteria) -> Result<usize>;

    /// Deletes one item.
    ///
    /// Fails with [`crate::Error::NotFound`] for an unknown id.
    async fn delete(&self, id: &str) -> Result<()>;

    /// Deletes every item, or every item received before `before`.
    /// Returns the number removed.
    async fn purge(&self, before: Option<DateTime<Utc>>) -> Result<u64>;
}

/// Opens the backend selected in the configuration.
///
/// # Errors
///
/// Returns an error if the engine is unknown or the database cannot be
/// opened.
pub async fn open_storage(config: &Configuration) -> Result<Arc<dyn MailStorage>> {
    match config.storage_engine()? {
        StorageEngine::Memory => {
            info!("using in-memory storage");
            Ok(Arc::new(MemoryStorage::new()))
        }
        StorageEngine::Sqlite => {
            info!(path = %config.db_database, "using SQLite storage");
            Ok(Arc::new(SqliteStorage::open(&config.db_database).await?))
        }
    }
}


#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::redundant_clone, clippy::manual_string_new, clippy::needless_collect, clippy::unreadable_literal, clippy::used_underscore_items, clippy::similar_names)]
mod tests {
    use super::test_support::{at, item};
    use super::*;

    #[test]
    fn test_page_numbering() {
        assert_eq!(Page::numbered(1, 10), Page::new(0, 10));
        assert_eq!(Page::numbered(3, 10), Page::new(20, 10));
        assert_eq!(Page::numbered(0, 10), Page::new(0, 10));
        assert_eq!(Page::default().limit, Page::DEFAULT_LIMIT);
    }

    #[test]
    fn test_empty_criteria_match_everything() {
        let criteria = SearchCriteria::default();
        assert!(criteria.is_empty());
        assert!(criteria.matches(&item("a@b.com", &["c@d.com"], "Hi", "Hello", 0)));
    }

    #[test]
    fn test_text_matches_subject_or_body() {
        let mail = item("a@b.com", &["c@d.com"], "Invoice 42", "Please PAY now", 0);
        let by_text = |text: &str| SearchCriteria {
            text: Some(text.to_string()),
            ..SearchCriteria::default()
        };
        assert!(by_text("invoice").matches(&mail));
        assert!(by_text("pay").matches(&mail));
        assert!(!by_text("refund").matches(&mail));
        assert!(by_text("   ").matches(&mail));
    }

    #[test]
    fn test_text_match_folds_non_ascii_case() {
        let mail = item("zoë@x.com", &["c@d.com"], "ÉTÉ à Paris", "Crème BRÛLÉE", 0);
        let text = |t: &str| SearchCriteria {
            text: Some(t.to_string()),
            ..SearchCriteria::default()
        };
        assert!(text("été").matches(&mail));
        assert!(text("brûlée").matches(&mail));
        assert!(!text("ete").matches(&mail));
        let from = SearchCriteria {
            from: Some("ZOË".to_string()),
            ..SearchCriteria::default()
        };
        assert!(from.matches(&mail));
    }

    #[test]
    fn test_address_filters() {
        let mail = item("Alice@Example.com", &["bob@d.com", "carol@e.org"], "s", "b", 0);
        let criteria = SearchCriteria {
            from: Some("alice@".to_string()),
            to: Some("E.ORG".to_string()),
            ..SearchCriteria::default()
        };
        assert!(criteria.matches(&mail));

        let criteria = SearchCriteria {
            to: Some("dave".to_string()),
            ..SearchCriteria::default()
        };
        assert!(!criteria.matches(&mail));
    }

    #[test]
    fn test_date_range_is_inclusive() {
        let mail = item("a@b.com", &["c@d.com"], "s", "b", 10);
        let range = |since, until| SearchCriteria {
            since: Some(at(since)),
            until: Some(at(until)),
            ..SearchCriteria::default()
        };
        assert!(range(10, 10).matches(&mail));
        assert!(range(0, 20).matches(&mail));
        assert!(!range(11, 20).matches(&mail));
        assert!(!range(0, 9).matches(&mail));
    }

    #[tokio::test]
    async fn test_open_storage_by_engine() {
        let storage = open_storage(&Configuration::default()).await.unwrap();
        assert_eq!(storage.count(&SearchCriteria::default()).await.unwrap(), 0);

        let config = Configuration {
            db_engine: "cassandra".to_string(),
            ..Configuration::default()
        };
        assert!(open_storage(&config).await.is_err());
    }
}
