use super::queue::{ImportItem, ImportQueue};
use super::records::{GameImportManifest, ImportRecord, ImportRecordType};
use super::ImportError;
use std::future::Future;
use tokio::sync::broadcast;

/// The data store records are imported into.
///
/// Implementations report "cannot import yet" either by returning `Ok(false)` or
/// an error; both make the importer retry the record later.
pub trait ImportTarget: Send + Sync {
    /// Whether this target imports records of this kind at all.
    fn can_import(&self, record: &ImportRecord) -> impl Future<Output = bool> + Send;

    fn exists(&self, record: &ImportRecord) -> impl Future<Output = anyhow::Result<bool>> + Send;

    fn add(&self, record: &ImportRecord) -> impl Future<Output = anyhow::Result<bool>> + Send;

    fn update(&self, record: &ImportRecord) -> impl Future<Output = anyhow::Result<bool>> + Send;
}

/// Progress events of an import run
#[derive(Clone, Debug, PartialEq)]
pub enum ImportStatus {
    Started {
        total: usize,
    },

    Processing {
        processed: usize,
        total: usize,
        record_type: ImportRecordType,
        name: String,
    },

    ItemFailed {
        processed: usize,
        total: usize,
        record_type: ImportRecordType,
        name: String,
        error: String,
    },

    Completed {
        processed: usize,
        total: usize,
    },
}

/// Result of a completed import run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ImportSummary {
    pub processed: usize,
    pub total: usize,

    /// Failed attempts that were later retried successfully
    pub retries: usize,
}

/// Imports a set of related records, retrying failures until no progress is possible.
///
/// Records are processed FIFO. A failed record goes to the back of the queue;
/// once every remaining record has failed since the last success the run aborts
/// with [`ImportError::Deadlocked`].
pub struct Importer<T: ImportTarget> {
    target: T,
    queue: ImportQueue,
    events: broadcast::Sender<ImportStatus>,
}

impl<T: ImportTarget> Importer<T> {
    pub fn new(target: T) -> Self {
        let (events, _) = broadcast::channel(100);
        Self {
            target,
            queue: ImportQueue::new(),
            events,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ImportStatus> {
        self.events.subscribe()
    }

    pub fn target(&self) -> &T {
        &self.target
    }

    pub fn queue(&self) -> &ImportQueue {
        &self.queue
    }

    /// Queue `record` if the target accepts its kind and it is not queued yet.
    pub async fn enqueue(&mut self, record: ImportRecord) -> bool {
        if self.queue.contains(&record) {
            return false;
        }
        if !self.target.can_import(&record).await {
            tracing::debug!("Skipping {} {}: not importable", record.record_type(), record.key());
            return false;
        }
        self.queue.enqueue(ImportItem::new(record))
    }

    /// Queue every record of `manifest`, dependencies before the game.
    ///
    /// Returns how many records were queued.
    pub async fn enqueue_manifest(&mut self, manifest: &GameImportManifest) -> usize {
        let mut queued = 0;
        for record in manifest.records() {
            if self.enqueue(record).await {
                queued += 1;
            }
        }
        tracing::debug!("Queued {} records for {}", queued, manifest.title);
        queued
    }

    /// Import everything queued.
    pub async fn import(&mut self) -> Result<ImportSummary, ImportError> {
        let total = self.queue.len();
        let mut summary = ImportSummary {
            total,
            ..ImportSummary::default()
        };
        let mut deferred = 0;

        tracing::info!("Importing {} records", total);
        self.publish(ImportStatus::Started { total });

        while let Some(item) = self.queue.dequeue() {
            self.publish(ImportStatus::Processing {
                processed: summary.processed,
                total,
                record_type: item.record_type,
                name: item.name.clone(),
            });

            let error = match self.import_item(&item).await {
                Ok(true) => {
                    summary.processed += 1;
                    if item.attempts > 0 {
                        summary.retries += item.attempts as usize;
                    }
                    deferred = 0;
                    continue;
                }
                Ok(false) => "import was not accepted".to_string(),
                Err(e) => format!("{:#}", e),
            };

            tracing::warn!(
                "Deferring {} {} (attempt {}): {}",
                item.record_type,
                item.name,
                item.attempts + 1,
                error
            );
            self.publish(ImportStatus::ItemFailed {
                processed: summary.processed,
                total,
                record_type: item.record_type,
                name: item.name.clone(),
                error: error.clone(),
            });

            self.queue.requeue(item);
            deferred += 1;

            if deferred >= self.queue.len() {
                let remaining = self.queue.len();
                tracing::error!(
                    "Import deadlocked with {} records remaining after {} imported",
                    remaining,
                    summary.processed
                );
                self.queue.clear();
                return Err(ImportError::Deadlocked {
                    remaining,
                    processed: summary.processed,
                    last_error: error,
                });
            }
        }

        tracing::info!("Imported {} of {} records", summary.processed, total);
        self.publish(ImportStatus::Completed {
            processed: summary.processed,
            total,
        });

        Ok(summary)
    }

    async fn import_item(&self, item: &ImportItem) -> anyhow::Result<bool> {
        if self.target.exists(&item.record).await? {
            self.target.update(&item.record).await
        } else {
            self.target.add(&item.record).await
        }
    }

    fn publish(&self, status: ImportStatus) {
        // Ignore send errors - it's OK if no one is listening
        let _ = self.events.send(status);
    }
}
