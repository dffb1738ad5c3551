//! In-process storage.

use super::{MailStorage, Page, SearchCriteria};
use crate::{Error, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mailsink_smtp::MailItem;
use tokio::sync::RwLock;

/// Keeps items in memory; everything is lost on exit.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    items: RwLock<Vec<MailItem>>,
}

impl MemoryStorage {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MailStorage for MemoryStorage {
    async fn save(&self, item: &MailItem) -> Result<()> {
        let mut items = self.items.write().await;
        if let Some(existing) = items.iter_mut().find(|existing| existing.id == item.id) {
            *existing = item.clone();
        } else {
            items.push(item.clone());
        }
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<MailItem> {
        self.items
            .read()
            .await
            .iter()
            .find(|item| item.id == id)
            .cloned()
            .ok_or_else(|| Error::NotFound(id.to_string()))
    }

    async fn search(&self, criteria: &SearchCriteria, page: Page) -> Result<Vec<MailItem>> {
        let items = self.items.read().await;
        // Reverse first so equal timestamps keep newest-saved first after the stable sort.
        let mut matching: Vec<&MailItem> =
            items.iter().rev().filter(|item| criteria.matches(item)).collect();
        matching.sort_by(|a, b| b.received_at.cmp(&a.received_at));

        Ok(matching
            .into_iter()
            .skip(page.offset)
            .take(page.limit)
            .cloned()
            .collect())
    }

    async fn count(&self, criteria: &SearchCriteria) -> Result<usize> {
        Ok(self
            .items
            .read()
            .await
            .iter()
            .filter(|item| criteria.matches(item))
            .count())
    }

    async fn delete(&self, id: &str) -> Result<()> {
        let mut items = self.items.write().await;
        let before = items.len();
        items.retain(|item| item.id != id);
        if items.len() == before {
            return Err(Error::NotFound(id.to_string()));
        }
        Ok(())
    }

    async fn purge(&self, before: Option<DateTime<Utc>>) -> Result<u64> {
        let mut items = self.items.write().await;
        let count = items.len();
        match before {
            Some(cutoff) => items.retain(|item| item.received_at >= cutoff),
            None => items.clear(),
        }
        Ok((count - items.len()) as u64)
    }
}
