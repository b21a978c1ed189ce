//! Keep target following source by replaying the source change feed.

use super::metadata;
use crate::change_event::ChangeEvent;
use crate::error::{Result, SyncError};
use crate::shutdown::Shutdown;
use crate::store::{ChangeFeed, DocumentStore};
use crossbeam::channel::{self, Receiver};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Subscription state of a [ChangeFeedApplier].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedState {
    /// not subscribed, the initial state.
    Unsubscribed,
    /// subscribed and applying events.
    Streaming,
}

/// Why a change feed task ended.
#[derive(Debug)]
pub enum FeedExit {
    /// source can't serve a change feed, with the reason.
    NotCapable(String),
    /// shutdown was requested.
    Shutdown,
    /// the feed broke or an event couldn't be applied.
    Failed(SyncError),
}

/// Replays source change events against target, one event at a time.
pub struct ChangeFeedApplier {
    source: Arc<dyn DocumentStore>,
    target: Arc<dyn DocumentStore>,
    state: FeedState,
    applied: u64,
    // collections known to exist on target.
    prepared: HashSet<String>,
}

impl ChangeFeedApplier {
    /// create an unsubscribed applier.
    pub fn new(source: Arc<dyn DocumentStore>, target: Arc<dyn DocumentStore>) -> Self {
        ChangeFeedApplier {
            source,
            target,
            state: FeedState::Unsubscribed,
            applied: 0,
            prepared: HashSet::new(),
        }
    }

    /// current subscription state.
    pub fn state(&self) -> FeedState {
        self.state
    }

    /// number of events applied so far.
    pub fn applied(&self) -> u64 {
        self.applied
    }

    fn subscribe(&mut self) -> std::result::Result<Box<dyn ChangeFeed>, FeedExit> {
        let label = self.source.label().to_string();
        match self.source.supports_change_feed() {
            Ok(true) => {}
            Ok(false) => {
                let reason = format!("{} is not a replica set", label);
                warn!(%reason, "Change feed is not supported, skip incremental sync.");
                return Err(FeedExit::NotCapable(reason));
            }
            Err(e) => {
                let reason = format!("capability probe on {} failed: {}", label, e);
                warn!(%reason, "Change feed is not supported, skip incremental sync.");
                return Err(FeedExit::NotCapable(reason));
            }
        }

        match self.source.watch() {
            Ok(feed) => {
                self.state = FeedState::Streaming;
                info!(source = %label, "Change feed subscribed, applying events to target.");
                Ok(feed)
            }
            Err(e) => {
                error!(source = %label, ?e, "Failed to subscribe change feed.");
                Err(FeedExit::Failed(e))
            }
        }
    }

    // an insert upserts, which would create a missing collection with default options.
    fn prepare_collection(&mut self, coll_name: &str) -> Result<()> {
        if self.prepared.contains(coll_name) {
            return Ok(());
        }
        let exists = self
            .target
            .list_collection_names(None)?
            .iter()
            .any(|name| name == coll_name);
        if !exists {
            match metadata::copy_collection_options(
                self.source.as_ref(),
                self.target.as_ref(),
                coll_name,
            ) {
                Ok(_) => info!(%coll_name, "Change feed: collection created in target database."),
                // dropped on source since, the insert creates it with defaults.
                Err(SyncError::CollectionNotFound(_)) => {}
                Err(e) => return Err(e),
            }
        }
        self.prepared.insert(coll_name.to_string());
        Ok(())
    }

    fn apply(&mut self, event: &ChangeEvent) -> Result<()> {
        if let ChangeEvent::Insert { ns, .. } = event {
            self.prepare_collection(&ns.coll)?;
        }
        event.apply(self.target.as_ref())
    }

    /// Subscribe and apply events until `shutdown` is triggered or something fails.
    ///
    /// Shutdown is checked between events, an event which is being applied always completes.
    pub fn run(&mut self, shutdown: &Shutdown) -> FeedExit {
        let mut feed = match self.subscribe() {
            Ok(feed) => feed,
            Err(exit) => return exit,
        };

        let exit = loop {
            if shutdown.is_triggered() {
                info!(applied = self.applied, "Change feed: shutdown requested, stop applying.");
                break FeedExit::Shutdown;
            }
            match feed.next_event() {
                Ok(Some(event)) => {
                    debug!(operation = event.operation(), coll = %event.namespace().coll, id = %event.id(), "Apply change event.");
                    if let Err(e) = self.apply(&event) {
                        error!(
                            operation = event.operation(),
                            coll = %event.namespace().coll,
                            id = %event.id(),
                            ?e,
                            "Failed to apply change event, change feed stopped."
                        );
                        break FeedExit::Failed(e);
                    }
                    self.applied += 1;
                }
                Ok(None) => continue,
                Err(e) => {
                    error!(?e, "Change feed broken, change feed stopped.");
                    break FeedExit::Failed(e);
                }
            }
        };
        self.state = FeedState::Unsubscribed;
        exit
    }

    /// Run the applier on a dedicated thread.
    ///
    /// The returned receiver yields the exit reason once the thread ends.
    pub fn spawn(self, shutdown: Shutdown) -> Result<Receiver<FeedExit>> {
        let (sender, receiver) = channel::bounded(1);
        let mut applier = self;
        std::thread::Builder::new()
            .name("change feed".to_string())
            .spawn(move || {
                let exit = applier.run(&shutdown);
                let _ = sender.send(exit);
            })?;
        Ok(receiver)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MemoryStore;
    use bson::doc;
    use std::time::Duration;

    #[test]
    fn test_not_capable_stays_unsubscribed() {
        let source: Arc<dyn DocumentStore> = Arc::new(MemoryStore::standalone());
        let target: Arc<dyn DocumentStore> = Arc::new(MemoryStore::new());
        let mut applier = ChangeFeedApplier::new(source, target);
        let exit = applier.run(&Shutdown::new());
        assert!(matches!(exit, FeedExit::NotCapable(_)));
        assert_eq!(applier.state(), FeedState::Unsubscribed);
        assert_eq!(applier.applied(), 0);
    }

    #[test]
    fn test_shutdown_before_start() {
        let source: Arc<dyn DocumentStore> =
            Arc::new(MemoryStore::new().with_feed_poll(Duration::from_millis(5)));
        let target: Arc<dyn DocumentStore> = Arc::new(MemoryStore::new());
        let shutdown = Shutdown::new();
        shutdown.trigger();
        let mut applier = ChangeFeedApplier::new(source, target);
        assert!(matches!(applier.run(&shutdown), FeedExit::Shutdown));
    }

    #[test]
    fn test_insert_creates_collection_with_source_options() {
        let source = Arc::new(MemoryStore::new().with_feed_poll(Duration::from_millis(5)));
        let target = Arc::new(MemoryStore::new());
        source
            .create_collection("a", &doc! {"validator": {"x": {"$type": "int"}}})
            .unwrap();
        source
            .create_collection("log", &doc! {"capped": true, "size": 4096, "max": 5})
            .unwrap();
        let shutdown = Shutdown::new();
        let done = ChangeFeedApplier::new(source.clone(), target.clone())
            .spawn(shutdown.clone())
            .unwrap();
        std::thread::sleep(Duration::from_millis(50));

        source.insert_many("a", &[doc! {"_id": 1, "x": 1}]).unwrap();
        source.insert_many("log", &[doc! {"_id": 1}]).unwrap();
        let mut synced = false;
        for _ in 0..100 {
            if target.documents("a").len() == 1 && target.documents("log").len() == 1 {
                synced = true;
                break;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        assert!(synced);
        assert_eq!(
            target.collection_options("a").unwrap(),
            doc! {"validator": {"x": {"$type": "int"}}}
        );
        assert_eq!(
            target.collection_options("log").unwrap(),
            doc! {"capped": true, "size": 4096, "max": 5}
        );

        shutdown.trigger();
        let exit = done.recv_timeout(Duration::from_secs(5)).unwrap();
        assert!(matches!(exit, FeedExit::Shutdown));
    }

    #[test]
    fn test_spawned_applier_replays_writes() {
        let source = Arc::new(MemoryStore::new().with_feed_poll(Duration::from_millis(5)));
        let target = Arc::new(MemoryStore::new());
        let shutdown = Shutdown::new();
        let done = ChangeFeedApplier::new(source.clone(), target.clone())
            .spawn(shutdown.clone())
            .unwrap();

        // wait until the thread subscribed, writes before that are not seen.
        std::thread::sleep(Duration::from_millis(50));
        source
            .insert_many("a", &[doc! {"_id": 1, "x": 1}, doc! {"_id": 2}])
            .unwrap();
        source.delete_one("a", &bson::Bson::Int32(2)).unwrap();

        let mut synced = false;
        for _ in 0..100 {
            if target.documents("a") == vec![doc! {"_id": 1, "x": 1}] {
                synced = true;
                break;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        assert!(synced);

        shutdown.trigger();
        let exit = done.recv_timeout(Duration::from_secs(5)).unwrap();
        assert!(matches!(exit, FeedExit::Shutdown));
    }
}
