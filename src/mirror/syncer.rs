use super::feed::{ChangeFeedApplier, FeedExit};
use super::full::{self, BulkCopyReport, CopyOptions, CopyPlan};
use super::metadata::{self, ViewReport};
use super::validate::{Difference, Validator};
use crate::config::{MirrorConfig, SyncConf, ValidateConf};
use crate::error::Result;
use crate::shutdown::Shutdown;
use crate::store::DocumentStore;
use crossbeam::channel::Receiver;
use crossbeam::select;
use std::sync::Arc;
use tracing::{info, warn};

/// What a complete [Mirror::run] did.
#[derive(Debug, Default)]
pub struct MirrorReport {
    /// bulk copy outcome.
    pub bulk: BulkCopyReport,
    /// view copy outcome, None if views are not copied.
    pub views: Option<ViewReport>,
    /// validation findings, None if validation is disabled.
    pub differences: Option<Vec<Difference>>,
    /// why the change feed ended, None if it didn't run.
    pub feed: Option<FeedExit>,
}

/// Mirror one database from source to target: bulk copy, validation and change feed.
pub struct Mirror {
    source: Arc<dyn DocumentStore>,
    target: Arc<dyn DocumentStore>,
    sync: SyncConf,
    validate: ValidateConf,
}

impl Mirror {
    /// create a mirror from global configuration.
    pub fn new(
        source: Arc<dyn DocumentStore>,
        target: Arc<dyn DocumentStore>,
        conf: &MirrorConfig,
    ) -> Self {
        Self::with_confs(
            source,
            target,
            conf.get_sync().clone(),
            conf.get_validate().clone(),
        )
    }

    /// create a mirror from separate sync and validation settings.
    pub fn with_confs(
        source: Arc<dyn DocumentStore>,
        target: Arc<dyn DocumentStore>,
        sync: SyncConf,
        validate: ValidateConf,
    ) -> Self {
        Mirror {
            source,
            target,
            sync,
            validate,
        }
    }

    /// Copy every collection absent on target, then views.
    pub fn sync_full(&self, shutdown: &Shutdown) -> Result<(BulkCopyReport, Option<ViewReport>)> {
        let plan = CopyPlan::snapshot(self.source.as_ref(), self.target.as_ref())?;
        self.sync_planned(plan, shutdown)
    }

    fn sync_planned(
        &self,
        plan: CopyPlan,
        shutdown: &Shutdown,
    ) -> Result<(BulkCopyReport, Option<ViewReport>)> {
        let opts = CopyOptions::from(&self.sync);
        let bulk = full::copy_planned(
            self.source.as_ref(),
            self.target.as_ref(),
            plan,
            &opts,
            shutdown,
        )?;
        if !self.sync.copy_views() || shutdown.is_triggered() {
            return Ok((bulk, None));
        }
        let views = metadata::copy_views(self.source.as_ref(), self.target.as_ref())?;
        info!(
            created = views.created.len(),
            existing = views.existing.len(),
            failed = views.failed.len(),
            "Views copied."
        );
        Ok((bulk, Some(views)))
    }

    /// Run a full validation pass, every difference is logged.
    pub fn validate(&self) -> Result<Vec<Difference>> {
        info!("Validation: begin to compare source and target.");
        let differences = Validator::new(
            self.source.as_ref(),
            self.target.as_ref(),
            self.validate.get_unique_field(),
        )
        .validate_all()?;
        for diff in differences.iter() {
            warn!(%diff, "Difference found.");
        }
        info!(total = differences.len(), "Validation: complete.");
        Ok(differences)
    }

    /// Start the change feed on its own thread.
    pub fn start_change_feed(&self, shutdown: &Shutdown) -> Result<Receiver<FeedExit>> {
        ChangeFeedApplier::new(self.source.clone(), self.target.clone()).spawn(shutdown.clone())
    }

    /// Run everything the configuration enables.
    ///
    /// Which collections to copy is decided first, then the change feed starts, then bulk copy
    /// and validation run.  Documents the feed writes before bulk copy reaches them are kept.
    /// When the feed is streaming, this blocks until `shutdown` is triggered or the feed ends on
    /// its own.
    pub fn run(&self, shutdown: &Shutdown) -> Result<MirrorReport> {
        let plan = CopyPlan::snapshot(self.source.as_ref(), self.target.as_ref())?;
        let feed_done = if self.sync.change_feed() {
            Some(self.start_change_feed(shutdown)?)
        } else {
            None
        };

        let (bulk, views) = self.sync_planned(plan, shutdown)?;
        let differences = if self.validate.enabled() && !shutdown.is_triggered() {
            Some(self.validate()?)
        } else {
            None
        };

        let feed = feed_done.map(|done| {
            select! {
                recv(done) -> exit => exit.ok(),
                recv(shutdown.receiver()) -> _ => {
                    info!("Shutdown requested, waiting for change feed to stop.");
                    done.recv().ok()
                }
            }
        });
        let feed = feed.flatten();
        if let Some(exit) = feed.as_ref() {
            info!(?exit, "Change feed ended.");
        }

        Ok(MirrorReport {
            bulk,
            views,
            differences,
            feed,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MemoryStore;
    use bson::doc;

    #[test]
    fn test_run_without_feed_returns_after_validation() {
        let source = Arc::new(MemoryStore::new());
        let target = Arc::new(MemoryStore::new());
        source
            .insert_many("a", &[doc! {"_id": 1}, doc! {"_id": 2}])
            .unwrap();

        let mut conf = MirrorConfig::new("src".to_string(), "dst".to_string(), "memory".to_string());
        conf.get_sync_mut().set_change_feed(false);
        let mirror = Mirror::new(source, target.clone(), &conf);
        let report = mirror.run(&Shutdown::new()).unwrap();

        assert_eq!(report.bulk.copied.len(), 1);
        assert_eq!(report.differences, Some(vec![]));
        assert!(report.feed.is_none());
        assert_eq!(target.documents("a").len(), 2);
    }
}
