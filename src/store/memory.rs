//! In process [DocumentStore], holding one database in memory.
//!
//! It behaves like a small mongodb database: `_id` is unique, an `_id_` index comes with every
//! collection, capped collections evict their oldest documents, writes are published to change
//! feed subscribers.  It's used to dry-run the engines and in tests.

use super::{
    is_capped, ChangeFeed, CollectionInfo, CollectionKind, DocumentScan, DocumentStore,
    DuplicateGroup, IndexDescriptor,
};
use crate::bson_helper::{get_path, id_key, set_path, unset_path};
use crate::change_event::{ChangeEvent, FieldUpdate, Namespace};
use crate::{Result, SyncError, ID_KEY};
use bson::{doc, Bson, Document};
use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

const DEFAULT_DB_NAME: &str = "memory";
const DEFAULT_FEED_POLL: Duration = Duration::from_millis(50);

#[derive(Debug, Default)]
struct MemoryCollection {
    options: Document,
    docs: Vec<Document>,
    ids: HashSet<Vec<u8>>,
    indexes: Vec<IndexDescriptor>,
    insert_batches: Vec<usize>,
}

impl MemoryCollection {
    fn new(options: Document) -> Self {
        let indexes = if options.contains_key("viewOn") {
            vec![]
        } else {
            vec![IndexDescriptor::new(
                "_id_",
                doc! {ID_KEY: 1},
                doc! {"v": 2},
            )]
        };
        MemoryCollection {
            options,
            docs: vec![],
            ids: HashSet::new(),
            indexes,
            insert_batches: vec![],
        }
    }

    fn kind(&self) -> CollectionKind {
        if self.options.contains_key("viewOn") {
            CollectionKind::View
        } else {
            CollectionKind::Collection
        }
    }

    fn position(&self, id: &Bson) -> Result<Option<usize>> {
        let key = id_key(id)?;
        if !self.ids.contains(&key) {
            return Ok(None);
        }
        for (idx, doc) in self.docs.iter().enumerate() {
            if let Some(doc_id) = doc.get(ID_KEY) {
                if id_key(doc_id)? == key {
                    return Ok(Some(idx));
                }
            }
        }
        Ok(None)
    }

    // drop oldest documents until the capped bounds hold again.
    fn evict(&mut self) -> Result<()> {
        if !is_capped(&self.options) {
            return Ok(());
        }
        let max = self
            .options
            .get("max")
            .and_then(crate::bson_helper::as_i64)
            .filter(|m| *m > 0);
        let size = self
            .options
            .get("size")
            .and_then(crate::bson_helper::as_i64)
            .filter(|s| *s > 0);

        if let Some(max) = max {
            let overflow = (self.docs.len() as i64 - max).max(0) as usize;
            self.remove_oldest(overflow)?;
        }
        if let Some(size) = size {
            let mut total = 0i64;
            let mut sizes = Vec::with_capacity(self.docs.len());
            for d in self.docs.iter() {
                let mut buf = vec![];
                d.to_writer(&mut buf)?;
                total += buf.len() as i64;
                sizes.push(buf.len() as i64);
            }
            let mut evicted = 0;
            while total > size && evicted < sizes.len() {
                total -= sizes[evicted];
                evicted += 1;
            }
            self.remove_oldest(evicted)?;
        }
        Ok(())
    }

    fn push(&mut self, doc: Document, key: Vec<u8>) {
        self.ids.insert(key);
        self.docs.push(doc);
    }

    fn remove_at(&mut self, idx: usize) -> Result<()> {
        let doc = self.docs.remove(idx);
        if let Some(id) = doc.get(ID_KEY) {
            self.ids.remove(&id_key(id)?);
        }
        Ok(())
    }

    fn remove_oldest(&mut self, count: usize) -> Result<()> {
        for _ in 0..count.min(self.docs.len()) {
            self.remove_at(0)?;
        }
        Ok(())
    }
}

#[derive(Default)]
struct MemoryState {
    collections: BTreeMap<String, MemoryCollection>,
    subscribers: Vec<Sender<ChangeEvent>>,
    failing_inserts: usize,
}

impl MemoryState {
    fn publish(&mut self, event: ChangeEvent) {
        self.subscribers
            .retain(|sender| sender.send(event.clone()).is_ok());
    }

    fn collection_mut(&mut self, coll: &str) -> &mut MemoryCollection {
        self.collections
            .entry(coll.to_string())
            .or_insert_with(|| MemoryCollection::new(Document::new()))
    }
}

/// A database living in memory.
pub struct MemoryStore {
    label: String,
    db_name: String,
    replica_set: bool,
    feed_poll: Duration,
    state: Mutex<MemoryState>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    /// create an empty store which can serve a change feed.
    pub fn new() -> Self {
        MemoryStore {
            label: "memory".to_string(),
            db_name: DEFAULT_DB_NAME.to_string(),
            replica_set: true,
            feed_poll: DEFAULT_FEED_POLL,
            state: Mutex::new(MemoryState::default()),
        }
    }

    /// create an empty store which refuses change feeds, like a standalone server.
    pub fn standalone() -> Self {
        MemoryStore {
            replica_set: false,
            ..Self::new()
        }
    }

    /// set endpoint label.
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    /// set database name carried by change events.
    pub fn with_db_name(mut self, db_name: impl Into<String>) -> Self {
        self.db_name = db_name.into();
        self
    }

    /// set how long a change feed waits for an event before yielding `None`.
    pub fn with_feed_poll(mut self, poll: Duration) -> Self {
        self.feed_poll = poll;
        self
    }

    /// Snapshot of every document in `coll`, in natural order.
    pub fn documents(&self, coll: &str) -> Vec<Document> {
        self.lock()
            .collections
            .get(coll)
            .map(|c| c.docs.clone())
            .unwrap_or_default()
    }

    /// Sizes of every successful `insert_many` call against `coll`, in call order.
    pub fn insert_batches(&self, coll: &str) -> Vec<usize> {
        self.lock()
            .collections
            .get(coll)
            .map(|c| c.insert_batches.clone())
            .unwrap_or_default()
    }

    /// Make the next `count` calls to `insert_many` fail without writing anything.
    pub fn fail_next_inserts(&self, count: usize) {
        self.lock().failing_inserts = count;
    }

    /// Close every open change feed, subscribers see the feed as dropped.
    pub fn close_feeds(&self) {
        self.lock().subscribers.clear();
    }

    /// Publish `event` to change feed subscribers without touching data.
    pub fn publish(&self, event: ChangeEvent) {
        self.lock().publish(event);
    }

    // with `skip_existing` duplicated ids are left out, otherwise they fail the whole call
    // before anything is written.
    fn insert_docs(&self, coll: &str, docs: &[Document], skip_existing: bool) -> Result<u64> {
        let mut state = self.lock();
        if state.failing_inserts > 0 {
            state.failing_inserts -= 1;
            return Err(SyncError::StoreFault(format!(
                "injected insert failure on {}",
                coll
            )));
        }

        let ns = self.ns(coll);
        let collection = state.collection_mut(coll);
        let mut accepted = Vec::with_capacity(docs.len());
        let mut seen = HashSet::with_capacity(docs.len());
        for d in docs.iter() {
            let id = d.get(ID_KEY).cloned().ok_or_else(|| {
                SyncError::StoreFault(format!("document without _id inserted into {}", coll))
            })?;
            let key = id_key(&id)?;
            if collection.ids.contains(&key) || !seen.insert(key.clone()) {
                if skip_existing {
                    continue;
                }
                return Err(SyncError::DuplicateKey {
                    coll: coll.to_string(),
                    id,
                });
            }
            accepted.push((id, d, key));
        }
        for (_, d, key) in accepted.iter() {
            collection.push((*d).clone(), key.clone());
        }
        collection.insert_batches.push(docs.len());
        collection.evict()?;

        let inserted = accepted.len() as u64;
        for (id, d, _) in accepted {
            state.publish(ChangeEvent::Insert {
                ns: ns.clone(),
                id,
                document: d.clone(),
            });
        }
        Ok(inserted)
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        // writes are single steps, a poisoned lock still holds consistent data.
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn ns(&self, coll: &str) -> Namespace {
        Namespace::new(self.db_name.clone(), coll)
    }
}

fn matches_filter(doc: &Document, filter: &Document) -> bool {
    filter
        .iter()
        .all(|(path, expected)| get_path(doc, path) == Some(expected))
}

impl DocumentStore for MemoryStore {
    fn label(&self) -> &str {
        &self.label
    }

    fn list_collection_names(&self, kind: Option<CollectionKind>) -> Result<Vec<String>> {
        Ok(self
            .list_collections(kind)?
            .into_iter()
            .map(|info| info.name)
            .collect())
    }

    fn list_collections(&self, kind: Option<CollectionKind>) -> Result<Vec<CollectionInfo>> {
        let state = self.lock();
        Ok(state
            .collections
            .iter()
            .filter(|(_, c)| match kind {
                None => true,
                Some(CollectionKind::Capped) => {
                    c.kind() == CollectionKind::Collection && is_capped(&c.options)
                }
                Some(k) => c.kind() == k,
            })
            .map(|(name, c)| CollectionInfo {
                name: name.clone(),
                kind: c.kind(),
                options: c.options.clone(),
            })
            .collect())
    }

    fn create_collection(&self, coll: &str, options: &Document) -> Result<()> {
        let mut state = self.lock();
        if !state.collections.contains_key(coll) {
            state
                .collections
                .insert(coll.to_string(), MemoryCollection::new(options.clone()));
        }
        Ok(())
    }

    fn list_indexes(&self, coll: &str) -> Result<Vec<IndexDescriptor>> {
        Ok(self
            .lock()
            .collections
            .get(coll)
            .map(|c| c.indexes.clone())
            .unwrap_or_default())
    }

    fn create_index(&self, coll: &str, index: &IndexDescriptor) -> Result<()> {
        let mut state = self.lock();
        let collection = state.collection_mut(coll);
        match collection.indexes.iter_mut().find(|i| i.name == index.name) {
            Some(existing) if existing.same_definition(index) => Ok(()),
            Some(_) => Err(SyncError::StoreFault(format!(
                "index {} already exists with different options",
                index.name
            ))),
            None => {
                collection.indexes.push(index.clone());
                Ok(())
            }
        }
    }

    fn scan(&self, coll: &str) -> Result<DocumentScan<'_>> {
        let docs = self.documents(coll);
        Ok(Box::new(docs.into_iter().map(Ok)))
    }

    fn insert_many(&self, coll: &str, docs: &[Document]) -> Result<()> {
        self.insert_docs(coll, docs, false).map(|_| ())
    }

    fn insert_missing(&self, coll: &str, docs: &[Document]) -> Result<u64> {
        self.insert_docs(coll, docs, true)
    }

    fn replace_one(&self, coll: &str, id: &Bson, doc: &Document, upsert: bool) -> Result<()> {
        let mut state = self.lock();
        let ns = self.ns(coll);
        let mut replacement = doc! {ID_KEY: id.clone()};
        for (k, v) in doc.iter().filter(|(k, _)| k.as_str() != ID_KEY) {
            replacement.insert(k.clone(), v.clone());
        }

        let position = match state.collections.get(coll) {
            Some(collection) => collection.position(id)?,
            None => None,
        };
        if position.is_none() && !upsert {
            return Ok(());
        }
        let collection = state.collection_mut(coll);
        let event = match position {
            Some(idx) => {
                collection.docs[idx] = replacement.clone();
                ChangeEvent::Replace {
                    ns,
                    id: id.clone(),
                    document: replacement,
                }
            }
            None => {
                collection.push(replacement.clone(), id_key(id)?);
                collection.evict()?;
                ChangeEvent::Insert {
                    ns,
                    id: id.clone(),
                    document: replacement,
                }
            }
        };
        state.publish(event);
        Ok(())
    }

    fn update_one(&self, coll: &str, id: &Bson, update: &FieldUpdate) -> Result<()> {
        let mut state = self.lock();
        let ns = self.ns(coll);
        let collection = match state.collections.get_mut(coll) {
            Some(collection) => collection,
            None => return Ok(()),
        };
        let idx = match collection.position(id)? {
            Some(idx) => idx,
            None => return Ok(()),
        };

        let mut updated = collection.docs[idx].clone();
        for (path, value) in update.set.iter() {
            if path == ID_KEY {
                return Err(SyncError::StoreFault(format!(
                    "can't modify _id of {} in {}",
                    id, coll
                )));
            }
            if !set_path(&mut updated, path, value.clone()) {
                return Err(SyncError::StoreFault(format!(
                    "can't set {} of {} in {}",
                    path, id, coll
                )));
            }
        }
        for path in update.unset.iter() {
            unset_path(&mut updated, path);
        }
        collection.docs[idx] = updated;

        state.publish(ChangeEvent::Update {
            ns,
            id: id.clone(),
            update: update.clone(),
        });
        Ok(())
    }

    fn delete_one(&self, coll: &str, id: &Bson) -> Result<()> {
        let mut state = self.lock();
        let ns = self.ns(coll);
        let removed = match state.collections.get_mut(coll) {
            Some(collection) => match collection.position(id)? {
                Some(idx) => {
                    collection.remove_at(idx)?;
                    true
                }
                None => false,
            },
            None => false,
        };
        if removed {
            state.publish(ChangeEvent::Delete { ns, id: id.clone() });
        }
        Ok(())
    }

    fn count_documents(&self, coll: &str, filter: Document) -> Result<u64> {
        Ok(self
            .lock()
            .collections
            .get(coll)
            .map(|c| c.docs.iter().filter(|d| matches_filter(d, &filter)).count() as u64)
            .unwrap_or(0))
    }

    fn find_duplicates(&self, coll: &str, field: &str) -> Result<Vec<DuplicateGroup>> {
        let docs = self.documents(coll);
        // groups in order of first occurrence, `positions` maps a value key to its group.
        let mut groups: Vec<DuplicateGroup> = vec![];
        let mut positions: HashMap<Vec<u8>, usize> = HashMap::new();
        for d in docs.iter() {
            let value = get_path(d, field).cloned().unwrap_or(Bson::Null);
            let key = id_key(&value)?;
            match positions.get(&key) {
                Some(idx) => groups[*idx].count += 1,
                None => {
                    positions.insert(key, groups.len());
                    groups.push(DuplicateGroup { value, count: 1 });
                }
            }
        }
        groups.retain(|group| group.count > 1);
        Ok(groups)
    }

    fn supports_change_feed(&self) -> Result<bool> {
        Ok(self.replica_set)
    }

    fn watch(&self) -> Result<Box<dyn ChangeFeed>> {
        if !self.replica_set {
            return Err(SyncError::StoreFault(
                "change feed is only supported on replica sets".to_string(),
            ));
        }
        let (sender, receiver) = channel::unbounded();
        self.lock().subscribers.push(sender);
        Ok(Box::new(MemoryFeed {
            receiver,
            poll: self.feed_poll,
        }))
    }
}

/// Change feed of a [MemoryStore].
pub struct MemoryFeed {
    receiver: Receiver<ChangeEvent>,
    poll: Duration,
}

impl ChangeFeed for MemoryFeed {
    fn next_event(&mut self) -> Result<Option<ChangeEvent>> {
        match self.receiver.recv_timeout(self.poll) {
            Ok(event) => Ok(Some(event)),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => {
                Err(SyncError::FeedClosed("memory store closed the feed".to_string()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_and_scan_keep_order() {
        let store = MemoryStore::new();
        store
            .insert_many("a", &[doc! {"_id": 2}, doc! {"_id": 1}])
            .unwrap();
        store.insert_many("a", &[doc! {"_id": 3}]).unwrap();
        let ids: Vec<Bson> = store
            .scan("a")
            .unwrap()
            .map(|d| d.unwrap().get("_id").cloned().unwrap())
            .collect();
        assert_eq!(ids, vec![Bson::Int32(2), Bson::Int32(1), Bson::Int32(3)]);
        assert_eq!(store.insert_batches("a"), vec![2, 1]);
    }

    #[test]
    fn test_insert_duplicate_key_writes_nothing() {
        let store = MemoryStore::new();
        store.insert_many("a", &[doc! {"_id": 1}]).unwrap();
        let res = store.insert_many("a", &[doc! {"_id": 2}, doc! {"_id": 1}]);
        assert!(matches!(res, Err(SyncError::DuplicateKey { .. })));
        assert_eq!(store.count_documents("a", doc! {}).unwrap(), 1);
    }

    #[test]
    fn test_insert_missing_skips_existing_ids() {
        let store = MemoryStore::new();
        store.insert_many("a", &[doc! {"_id": 1, "v": "old"}]).unwrap();
        let inserted = store
            .insert_missing(
                "a",
                &[
                    doc! {"_id": 1, "v": "new"},
                    doc! {"_id": 2, "v": "new"},
                    doc! {"_id": 2, "v": "again"},
                ],
            )
            .unwrap();
        assert_eq!(inserted, 1);
        assert_eq!(
            store.documents("a"),
            vec![doc! {"_id": 1, "v": "old"}, doc! {"_id": 2, "v": "new"}]
        );
        assert_eq!(store.insert_batches("a"), vec![1, 3]);
    }

    #[test]
    fn test_numeric_ids_of_equal_value_collide() {
        let store = MemoryStore::new();
        store.insert_many("a", &[doc! {"_id": 1}]).unwrap();
        assert!(matches!(
            store.insert_many("a", &[doc! {"_id": 1i64}]),
            Err(SyncError::DuplicateKey { .. })
        ));
        assert_eq!(store.insert_missing("a", &[doc! {"_id": 1.0}]).unwrap(), 0);
        store.delete_one("a", &Bson::Double(1.0)).unwrap();
        assert!(store.documents("a").is_empty());
    }

    #[test]
    fn test_update_of_missing_collection_creates_nothing() {
        let store = MemoryStore::new();
        let id = Bson::Int32(1);
        store
            .update_one("a", &id, &FieldUpdate::new(doc! {"x": 1}, vec![]))
            .unwrap();
        store.replace_one("a", &id, &doc! {"x": 1}, false).unwrap();
        assert!(store.list_collection_names(None).unwrap().is_empty());
    }

    #[test]
    fn test_create_collection_adds_id_index_and_tolerates_exists() {
        let store = MemoryStore::new();
        store.create_collection("a", &doc! {}).unwrap();
        store.insert_many("a", &[doc! {"_id": 1}]).unwrap();
        store.create_collection("a", &doc! {"capped": true}).unwrap();
        assert_eq!(store.count_documents("a", doc! {}).unwrap(), 1);
        assert_eq!(store.collection_options("a").unwrap(), doc! {});
        let indexes = store.list_indexes("a").unwrap();
        assert_eq!(indexes.len(), 1);
        assert_eq!(indexes[0].name, "_id_");
    }

    #[test]
    fn test_list_collections_by_kind() {
        let store = MemoryStore::new();
        store.create_collection("plain", &doc! {}).unwrap();
        store
            .create_collection("capped", &doc! {"capped": true, "size": 4096})
            .unwrap();
        store
            .create_collection("view", &doc! {"viewOn": "plain", "pipeline": []})
            .unwrap();

        assert_eq!(
            store
                .list_collection_names(Some(CollectionKind::Collection))
                .unwrap(),
            vec!["capped", "plain"]
        );
        assert_eq!(
            store
                .list_collection_names(Some(CollectionKind::Capped))
                .unwrap(),
            vec!["capped"]
        );
        assert_eq!(
            store.list_collection_names(Some(CollectionKind::View)).unwrap(),
            vec!["view"]
        );
        assert_eq!(store.list_collection_names(None).unwrap().len(), 3);
        assert!(matches!(
            store.collection_options("missing"),
            Err(SyncError::CollectionNotFound(_))
        ));
    }

    #[test]
    fn test_capped_max_evicts_oldest() {
        let store = MemoryStore::new();
        store
            .create_collection("log", &doc! {"capped": true, "size": 1_000_000, "max": 2})
            .unwrap();
        store
            .insert_many("log", &[doc! {"_id": 1}, doc! {"_id": 2}, doc! {"_id": 3}])
            .unwrap();
        assert_eq!(store.documents("log"), vec![doc! {"_id": 2}, doc! {"_id": 3}]);
    }

    #[test]
    fn test_update_replace_delete_missing_document_is_noop() {
        let store = MemoryStore::new();
        store.insert_many("a", &[doc! {"_id": 1, "x": 1}]).unwrap();
        let id = Bson::Int32(9);
        store
            .update_one("a", &id, &FieldUpdate::new(doc! {"x": 2}, vec![]))
            .unwrap();
        store.replace_one("a", &id, &doc! {"x": 3}, false).unwrap();
        store.delete_one("a", &id).unwrap();
        store.delete_one("not_exists", &id).unwrap();
        assert_eq!(store.documents("a"), vec![doc! {"_id": 1, "x": 1}]);
    }

    #[test]
    fn test_replace_upsert() {
        let store = MemoryStore::new();
        let id = Bson::Int32(1);
        store.replace_one("a", &id, &doc! {"x": 1}, true).unwrap();
        store
            .replace_one("a", &id, &doc! {"_id": 1, "x": 2}, true)
            .unwrap();
        assert_eq!(store.documents("a"), vec![doc! {"_id": 1, "x": 2}]);
    }

    #[test]
    fn test_find_duplicates() {
        let store = MemoryStore::new();
        store
            .insert_many(
                "a",
                &[
                    doc! {"_id": 1, "code": "A"},
                    doc! {"_id": 2, "code": "B"},
                    doc! {"_id": 3, "code": "A"},
                    doc! {"_id": 4},
                    doc! {"_id": 5},
                ],
            )
            .unwrap();
        let dups = store.find_duplicates("a", "code").unwrap();
        assert_eq!(
            dups,
            vec![
                DuplicateGroup {
                    value: Bson::String("A".to_string()),
                    count: 2
                },
                DuplicateGroup {
                    value: Bson::Null,
                    count: 2
                },
            ]
        );
        assert!(store.find_duplicates("a", "_id").unwrap().is_empty());
    }

    #[test]
    fn test_find_duplicates_merges_numeric_types() {
        let store = MemoryStore::new();
        store
            .insert_many(
                "a",
                &[
                    doc! {"_id": 1, "n": 7},
                    doc! {"_id": 2, "n": 7i64},
                    doc! {"_id": 3, "n": 7.0},
                    doc! {"_id": 4, "n": 7.5},
                ],
            )
            .unwrap();
        assert_eq!(
            store.find_duplicates("a", "n").unwrap(),
            vec![DuplicateGroup {
                value: Bson::Int32(7),
                count: 3
            }]
        );
    }

    #[test]
    fn test_count_with_filter() {
        let store = MemoryStore::new();
        store
            .insert_many(
                "a",
                &[doc! {"_id": 1, "s": {"t": 1}}, doc! {"_id": 2, "s": {"t": 2}}],
            )
            .unwrap();
        assert_eq!(store.count_documents("a", doc! {"s.t": 2}).unwrap(), 1);
        assert_eq!(store.count_documents("a", doc! {}).unwrap(), 2);
        assert_eq!(store.count_documents("b", doc! {}).unwrap(), 0);
    }

    #[test]
    fn test_feed_receives_writes_and_closes() {
        let store = MemoryStore::new().with_db_name("training");
        let mut feed = store.watch().unwrap();
        assert_eq!(feed.next_event().unwrap(), None);

        store.insert_many("a", &[doc! {"_id": 1}]).unwrap();
        store.delete_one("a", &Bson::Int32(1)).unwrap();
        assert_eq!(
            feed.next_event().unwrap(),
            Some(ChangeEvent::Insert {
                ns: Namespace::new("training", "a"),
                id: Bson::Int32(1),
                document: doc! {"_id": 1},
            })
        );
        assert_eq!(
            feed.next_event().unwrap(),
            Some(ChangeEvent::Delete {
                ns: Namespace::new("training", "a"),
                id: Bson::Int32(1),
            })
        );

        store.close_feeds();
        assert!(matches!(feed.next_event(), Err(SyncError::FeedClosed(_))));
    }

    #[test]
    fn test_standalone_refuses_feed() {
        let store = MemoryStore::standalone();
        assert!(!store.supports_change_feed().unwrap());
        assert!(store.watch().is_err());
    }

    #[test]
    fn test_injected_insert_failures() {
        let store = MemoryStore::new();
        store.fail_next_inserts(1);
        assert!(store.insert_many("a", &[doc! {"_id": 1}]).is_err());
        store.insert_many("a", &[doc! {"_id": 1}]).unwrap();
        assert_eq!(store.insert_batches("a"), vec![1]);
    }
}
