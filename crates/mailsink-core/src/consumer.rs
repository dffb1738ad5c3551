//! Task moving mail items from the channel into storage.

use crate::storage::MailStorage;
use mailsink_smtp::MailItemReceiver;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

/// Counters reported when the consumer stops.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConsumerStats {
    /// Items stored.
    pub saved: u64,
    /// Items the storage rejected.
    pub failed: u64,
}

/// Spawns the storage consumer.
///
/// It runs until every sender is dropped and the channel is empty. A failed
/// save is logged and counted; the consumer keeps going.
#[must_use]
pub fn spawn_storage_consumer(
    mut receiver: MailItemReceiver,
    storage: Arc<dyn MailStorage>,
) -> JoinHandle<ConsumerStats> {
    tokio::spawn(async move {
        let mut stats = ConsumerStats::default();

        while let Some(item) = receiver.recv().await {
            match storage.save(&item).await {
                Ok(()) => {
                    stats.saved += 1;
                    debug!(id = %item.id, "mail item saved");
                }
                Err(e) => {
                    stats.failed += 1;
                    error!(id = %item.id, error = %e, "failed to save mail item");
                }
            }
        }

        info!(saved = stats.saved, failed = stats.failed, "storage consumer stopped");
        stats
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::redundant_clone, clippy::manual_string_new, clippy::needless_collect, clippy::unreadable_literal, clippy::used_underscore_items, clippy::similar_names)]
mod tests {
    use super::*;
    use crate::storage::test_support::item;
    use crate::storage::{MemoryStorage, Page, SearchCriteria};
    use crate::{Error, Result};
    use async_trait::async_trait;
    use chrono::{DateTime, Utc};
    use mailsink_smtp::{MailItem, mail_channel};
    use tokio_util::sync::CancellationToken;

    /// Refuses every item whose subject starts with "bad".
    struct PickyStorage {
        inner: MemoryStorage,
    }

    #[async_trait]
    impl MailStorage for PickyStorage {
        async fn save(&self, item: &MailItem) -> Result<()> {
            if item.subject.starts_with("bad") {
                return Err(Error::Config("refused".to_string()));
            }
            self.inner.save(item).await
        }

        async fn get(&self, id: &str) -> Result<MailItem> {
            self.inner.get(id).await
        }

        async fn search(&self, criteria: &SearchCriteria, page: Page) -> Result<Vec<MailItem>> {
            self.inner.search(criteria, page).await
        }

        async fn count(&self, criteria: &SearchCriteria) -> Result<usize> {
            self.inner.count(criteria).await
        }

        async fn delete(&self, id: &str) -> Result<()> {
            self.inner.delete(id).await
        }

        async fn purge(&self, before: Option<DateTime<Utc>>) -> Result<u64> {
            self.inner.purge(before).await
        }
    }

    #[tokio::test]
    async fn test_drains_until_senders_dropped() {
        let (sender, receiver) = mail_channel(2);
        let storage = Arc::new(MemoryStorage::new());
        let consumer = spawn_storage_consumer(receiver, storage.clone());

        let cancel = CancellationToken::new();
        for n in 0..5 {
            let mail = item("a@b.com", &["c@d.com"], &format!("mail {n}"), "x", n);
            sender.push(mail, &cancel).await.unwrap();
        }
        drop(sender);

        let stats = consumer.await.unwrap();
        assert_eq!(stats, ConsumerStats { saved: 5, failed: 0 });
        assert_eq!(storage.count(&SearchCriteria::default()).await.unwrap(), 5);
    }

    #[tokio::test]
    async fn test_save_failures_are_counted_not_fatal() {
        let (sender, receiver) = mail_channel(8);
        let storage = Arc::new(PickyStorage {
            inner: MemoryStorage::new(),
        });
        let consumer = spawn_storage_consumer(receiver, storage.clone());

        let cancel = CancellationToken::new();
        for subject in ["good one", "bad one", "good two"] {
            let mail = item("a@b.com", &["c@d.com"], subject, "x", 0);
            sender.push(mail, &cancel).await.unwrap();
        }
        drop(sender);

        let stats = consumer.await.unwrap();
        assert_eq!(stats, ConsumerStats { saved: 2, failed: 1 });
        assert_eq!(storage.count(&SearchCriteria::default()).await.unwrap(), 2);
    }
}
