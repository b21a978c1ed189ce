//! Bulk copy of existing collections.

use super::index::{self, IndexReport};
use super::metadata;
use crate::config::SyncConf;
use crate::error::{Result, SyncError};
use crate::retry::retry;
use crate::shutdown::Shutdown;
use crate::store::{is_capped, CollectionKind, DocumentStore};
use bson::Document;
use crossbeam::channel;
use rayon::ThreadPoolBuilder;
use std::collections::HashSet;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Bulk copy tuning.
#[derive(Debug, Clone)]
pub struct CopyOptions {
    /// documents per insert call.
    pub batch_size: usize,
    /// attempts per insert call.
    pub insert_attempts: usize,
    /// delay between two attempts.
    pub retry_delay: Duration,
    /// collections copied at the same time.
    pub collection_concurrent: usize,
    /// stream existing documents into freshly created capped collections.
    pub backfill_capped: bool,
}

impl Default for CopyOptions {
    fn default() -> Self {
        CopyOptions {
            batch_size: 1000,
            insert_attempts: 3,
            retry_delay: Duration::from_secs(2),
            collection_concurrent: 4,
            backfill_capped: true,
        }
    }
}

impl From<&SyncConf> for CopyOptions {
    fn from(conf: &SyncConf) -> Self {
        CopyOptions {
            batch_size: conf.get_batch_size(),
            insert_attempts: conf.get_insert_attempts(),
            retry_delay: conf.get_retry_delay(),
            collection_concurrent: conf.get_collection_concurrent(),
            backfill_capped: conf.backfill_capped(),
        }
    }
}

/// Document counters of one collection copy.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CopyStats {
    /// documents written to target.
    pub documents: u64,
    /// insert calls made.
    pub batches: u64,
}

/// Result of copying one collection.
#[derive(Debug, Default)]
pub struct CollectionOutcome {
    /// whether the source collection is capped.
    pub capped: bool,
    /// documents copied.
    pub stats: CopyStats,
    /// index reconciliation result.
    pub indexes: IndexReport,
}

/// Status of one collection task, sent back from a worker.
#[derive(Debug)]
pub enum SyncTableStatus {
    /// collection copied.
    Done(CollectionOutcome),
    /// collection already exists on target, nothing done.
    Skipped,
    /// shutdown was requested before the task started.
    Cancelled,
    /// copy failed, earlier batches stay on target.
    Failed(SyncError),
}

/// Outcome of a whole bulk copy pass.
#[derive(Debug, Default)]
pub struct BulkCopyReport {
    /// copied collections.
    pub copied: Vec<(String, CollectionOutcome)>,
    /// collections already on target.
    pub skipped: Vec<String>,
    /// collections not started because of shutdown.
    pub cancelled: Vec<String>,
    /// collections which failed.
    pub failed: Vec<(String, SyncError)>,
}

impl BulkCopyReport {
    fn record(&mut self, coll_name: String, status: SyncTableStatus) {
        match status {
            SyncTableStatus::Done(outcome) => self.copied.push((coll_name, outcome)),
            SyncTableStatus::Skipped => self.skipped.push(coll_name),
            SyncTableStatus::Cancelled => self.cancelled.push(coll_name),
            SyncTableStatus::Failed(e) => self.failed.push((coll_name, e)),
        }
    }

    fn sort(&mut self) {
        self.copied.sort_by(|a, b| a.0.cmp(&b.0));
        self.skipped.sort();
        self.cancelled.sort();
        self.failed.sort_by(|a, b| a.0.cmp(&b.0));
    }
}

/// Insert one batch, retried with a fixed delay.
///
/// Documents already on target are left as they are, they come from the change feed or from
/// an earlier attempt.  Returns how many documents were written.
fn insert_batch(
    target: &dyn DocumentStore,
    coll_name: &str,
    docs: &[Document],
    opts: &CopyOptions,
) -> Result<u64> {
    retry(opts.insert_attempts, opts.retry_delay, |attempt| {
        debug!(%coll_name, attempt, size = docs.len(), "Insert batch.");
        target.insert_missing(coll_name, docs)
    })
}

/// Stream every document of `coll_name` from `source` into `target` in batches.
///
/// Batches keep source order, the remaining partial batch is flushed at the end.  An empty
/// collection makes no insert call.
pub fn copy_documents(
    source: &dyn DocumentStore,
    target: &dyn DocumentStore,
    coll_name: &str,
    opts: &CopyOptions,
) -> Result<CopyStats> {
    let buf_size = opts.batch_size.max(1);
    let mut stats = CopyStats::default();
    let mut buffer = Vec::with_capacity(buf_size);

    for doc in source.scan(coll_name)? {
        buffer.push(doc?);
        if buffer.len() >= buf_size {
            let mut data_to_write = Vec::with_capacity(buf_size);
            std::mem::swap(&mut buffer, &mut data_to_write);
            stats.documents += insert_batch(target, coll_name, &data_to_write, opts)?;
            stats.batches += 1;
        }
    }

    if !buffer.is_empty() {
        stats.documents += insert_batch(target, coll_name, &buffer, opts)?;
        stats.batches += 1;
    }
    Ok(stats)
}

/// Copy one collection which doesn't exist on `target` yet.
///
/// Capped collections get a capped container with the same bounds, their documents are
/// backfilled oldest first when [CopyOptions::backfill_capped] is set.  Other collections are
/// created with their source options.  Indexes are reconciled last.
pub fn copy_collection(
    source: &dyn DocumentStore,
    target: &dyn DocumentStore,
    coll_name: &str,
    opts: &CopyOptions,
) -> Result<CollectionOutcome> {
    info!(%coll_name, "Copying collection to target database...");
    let options = source.collection_options(coll_name)?;
    let capped = is_capped(&options);

    metadata::create_like_source(target, coll_name, options)?;
    let stats = if capped && !opts.backfill_capped {
        CopyStats::default()
    } else {
        copy_documents(source, target, coll_name, opts)?
    };

    let indexes = index::reconcile_indexes(source, target, coll_name)?;
    info!(
        %coll_name,
        documents = stats.documents,
        batches = stats.batches,
        "Collection copied successfully."
    );
    Ok(CollectionOutcome {
        capped,
        stats,
        indexes,
    })
}

/// Which collections a bulk copy pass works on.
///
/// Taken before anything else writes to target, so a collection created afterwards by the
/// change feed is still copied.
#[derive(Debug, Clone, Default)]
pub struct CopyPlan {
    coll_names: Vec<String>,
    existing: HashSet<String>,
}

impl CopyPlan {
    /// Snapshot ordinary source collections and every collection name on target.
    pub fn snapshot(source: &dyn DocumentStore, target: &dyn DocumentStore) -> Result<Self> {
        Ok(CopyPlan {
            coll_names: source.list_collection_names(Some(CollectionKind::Collection))?,
            existing: target.list_collection_names(None)?.into_iter().collect(),
        })
    }

    /// source collections to go through.
    pub fn collections(&self) -> &[String] {
        &self.coll_names
    }

    /// whether `coll_name` already existed on target and will be skipped.
    pub fn is_existing(&self, coll_name: &str) -> bool {
        self.existing.contains(coll_name)
    }
}

/// Copy every ordinary collection of `source` which doesn't exist on `target`.
///
/// Same as [copy_planned] with a plan taken now.
pub fn copy_all_collections(
    source: &dyn DocumentStore,
    target: &dyn DocumentStore,
    opts: &CopyOptions,
    shutdown: &Shutdown,
) -> Result<BulkCopyReport> {
    let plan = CopyPlan::snapshot(source, target)?;
    copy_planned(source, target, plan, opts, shutdown)
}

/// Copy the collections of `plan` which didn't exist on target when it was taken.
///
/// Collections are drained from a queue by `opts.collection_concurrent` workers.  A failing
/// collection is logged and reported, the others go on.  Once `shutdown` is triggered, workers
/// stop taking new collections, a collection already started is finished.
pub fn copy_planned(
    source: &dyn DocumentStore,
    target: &dyn DocumentStore,
    plan: CopyPlan,
    opts: &CopyOptions,
    shutdown: &Shutdown,
) -> Result<BulkCopyReport> {
    let CopyPlan {
        coll_names,
        existing,
    } = plan;
    let workers = opts.collection_concurrent.max(1);
    info!(total = coll_names.len(), workers, "Full state: begin to copy collections.");

    let pool = ThreadPoolBuilder::new().num_threads(workers).build()?;
    let (queue_sender, queue_receiver) = channel::unbounded::<String>();
    for coll_name in coll_names {
        // the receiver is alive, send can't fail.
        let _ = queue_sender.send(coll_name);
    }
    drop(queue_sender);

    let (status_sender, status_receiver) = channel::unbounded();
    let existing = &existing;
    pool.scope(|s| {
        for _ in 0..workers {
            let queue_receiver = queue_receiver.clone();
            let status_sender = status_sender.clone();
            s.spawn(move |_| {
                while let Ok(coll_name) = queue_receiver.recv() {
                    let status = if shutdown.is_triggered() {
                        SyncTableStatus::Cancelled
                    } else if existing.contains(&coll_name) {
                        info!(%coll_name, "Collection already exists in target database.");
                        SyncTableStatus::Skipped
                    } else {
                        match copy_collection(source, target, &coll_name, opts) {
                            Ok(outcome) => SyncTableStatus::Done(outcome),
                            Err(e) => {
                                error!(%coll_name, ?e, "Failed to copy collection.");
                                SyncTableStatus::Failed(e)
                            }
                        }
                    };
                    let _ = status_sender.send((coll_name, status));
                }
            });
        }
    });
    drop(status_sender);

    let mut report = BulkCopyReport::default();
    for (coll_name, status) in status_receiver {
        report.record(coll_name, status);
    }
    report.sort();

    if !report.cancelled.is_empty() {
        warn!(cancelled = ?report.cancelled, "Full state: shutdown requested, some collections are not copied.");
    }
    info!(
        copied = report.copied.len(),
        skipped = report.skipped.len(),
        failed = report.failed.len(),
        "Full state: copy collections complete."
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MemoryStore;
    use bson::doc;

    fn fast_opts(batch_size: usize) -> CopyOptions {
        CopyOptions {
            batch_size,
            retry_delay: Duration::from_millis(1),
            ..CopyOptions::default()
        }
    }

    #[test]
    fn test_copy_documents_batches() {
        for (n, b, expected_batches) in [(0usize, 3usize, 0u64), (1, 3, 1), (3, 3, 1), (7, 3, 3), (10, 1, 10)] {
            let source = MemoryStore::new();
            let target = MemoryStore::new();
            let docs: Vec<Document> = (0..n as i32).map(|i| doc! {"_id": i, "v": i * 2}).collect();
            if !docs.is_empty() {
                source.insert_many("a", &docs).unwrap();
            }

            let stats = copy_documents(&source, &target, "a", &fast_opts(b)).unwrap();
            assert_eq!(stats.batches, expected_batches);
            assert_eq!(stats.documents, n as u64);
            assert_eq!(target.insert_batches("a").len() as u64, expected_batches);
            assert_eq!(target.documents("a"), docs);
        }
    }

    #[test]
    fn test_copy_documents_retries_transient_failure() {
        let source = MemoryStore::new();
        let target = MemoryStore::new();
        source
            .insert_many("a", &[doc! {"_id": 1}, doc! {"_id": 2}])
            .unwrap();
        target.fail_next_inserts(2);

        let stats = copy_documents(&source, &target, "a", &fast_opts(10)).unwrap();
        assert_eq!(stats.batches, 1);
        assert_eq!(target.documents("a").len(), 2);
    }

    #[test]
    fn test_copy_documents_gives_up_after_attempts() {
        let source = MemoryStore::new();
        let target = MemoryStore::new();
        source
            .insert_many("a", &[doc! {"_id": 1}, doc! {"_id": 2}, doc! {"_id": 3}])
            .unwrap();
        target.fail_next_inserts(3);

        let res = copy_documents(&source, &target, "a", &fast_opts(2));
        assert!(matches!(res, Err(SyncError::StoreFault(_))));
        assert!(target.documents("a").is_empty());
    }

    #[test]
    fn test_copy_collection_keeps_options_and_indexes() {
        let source = MemoryStore::new();
        let target = MemoryStore::new();
        source
            .create_collection("a", &doc! {"validator": {"x": {"$type": "int"}}})
            .unwrap();
        source
            .create_index(
                "a",
                &crate::IndexDescriptor::new("x_1", doc! {"x": 1}, doc! {"v": 2}),
            )
            .unwrap();
        source.insert_many("a", &[doc! {"_id": 1, "x": 1}]).unwrap();

        let outcome = copy_collection(&source, &target, "a", &fast_opts(10)).unwrap();
        assert!(!outcome.capped);
        assert_eq!(outcome.stats.documents, 1);
        assert_eq!(outcome.indexes.created, vec!["x_1"]);
        assert_eq!(
            target.collection_options("a").unwrap(),
            doc! {"validator": {"x": {"$type": "int"}}}
        );
    }
}
