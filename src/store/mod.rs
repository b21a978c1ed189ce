//! Collection handle abstraction, the only way engines reach a database.
//!
//! A [DocumentStore] is bound to one working database of one deployment.  Source and target
//! are two values of the same trait, created once at process start and passed to every engine.

pub mod memory;
pub mod mongo;

use crate::change_event::{ChangeEvent, FieldUpdate};
use crate::{Result, SyncError};
use bson::{Bson, Document};

/// Collection type filter used when enumerating collections.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollectionKind {
    /// ordinary collection, capped ones included.
    Collection,
    /// read-only view defined by a pipeline.
    View,
    /// capped collection only.
    Capped,
}

/// Name and creation options of one collection.
#[derive(Debug, Clone, PartialEq)]
pub struct CollectionInfo {
    /// collection name.
    pub name: String,
    /// `Collection` or `View`.
    pub kind: CollectionKind,
    /// creation options, as reported by the server.
    pub options: Document,
}

impl CollectionInfo {
    /// Returns true if the collection is capped.
    pub fn is_capped(&self) -> bool {
        is_capped(&self.options)
    }
}

/// Returns true if creation `options` describe a capped collection.
pub fn is_capped(options: &Document) -> bool {
    options.get_bool("capped").unwrap_or(false)
}

/// Lazy full scan over a collection.
pub type DocumentScan<'a> = Box<dyn Iterator<Item = Result<Document>> + Send + 'a>;

/// One index definition.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexDescriptor {
    /// index name, unique in one collection.
    pub name: String,
    /// ordered key specification.
    pub key: Document,
    /// every other index option (unique, sparse, expireAfterSeconds, partialFilterExpression...).
    pub options: Document,
}

/// transport only index field, excluded from comparison.
const INDEX_NS_KEY: &str = "ns";

impl IndexDescriptor {
    /// create index descriptor.
    pub fn new(name: impl Into<String>, key: Document, options: Document) -> Self {
        IndexDescriptor {
            name: name.into(),
            key,
            options,
        }
    }

    /// Parse an index document returned by `listIndexes`.
    ///
    /// The `ns` field is dropped, it only tells where the index lives.
    pub fn from_document(mut doc: Document) -> Result<Self> {
        let key = doc.get_document("key")?.clone();
        let name = doc.get_str("name")?.to_string();
        doc.remove("key");
        doc.remove("name");
        doc.remove(INDEX_NS_KEY);
        Ok(IndexDescriptor {
            name,
            key,
            options: doc,
        })
    }

    /// Convert to an index document accepted by `createIndexes`.
    pub fn to_document(&self) -> Document {
        let mut doc = Document::new();
        doc.insert("key", self.key.clone());
        doc.insert("name", self.name.clone());
        for (k, v) in self.options.iter() {
            if k != INDEX_NS_KEY {
                doc.insert(k.clone(), v.clone());
            }
        }
        doc
    }

    /// Compare two descriptors the way reconciliation does: key order matters, option
    /// order doesn't, `ns` is ignored.
    pub fn same_definition(&self, other: &IndexDescriptor) -> bool {
        if self.name != other.name || self.key != other.key {
            return false;
        }
        let lhs: Vec<_> = self
            .options
            .iter()
            .filter(|(k, _)| k.as_str() != INDEX_NS_KEY)
            .collect();
        let rhs: Vec<_> = other
            .options
            .iter()
            .filter(|(k, _)| k.as_str() != INDEX_NS_KEY)
            .collect();
        lhs.len() == rhs.len()
            && lhs
                .iter()
                .all(|(k, v)| other.options.get(k.as_str()) == Some(*v))
    }
}

/// One value occurring more than once for a field.
#[derive(Debug, Clone, PartialEq)]
pub struct DuplicateGroup {
    /// the duplicated value, null when the field is missing.
    pub value: Bson,
    /// how many documents carry it.
    pub count: u64,
}

/// A subscription to database wide change events.
pub trait ChangeFeed: Send {
    /// Wait for the next event.
    ///
    /// `Ok(None)` means the wait elapsed without an event, callers use this chance to check
    /// whether they should stop.  An error means the feed is gone.
    fn next_event(&mut self) -> Result<Option<ChangeEvent>>;
}

/// Collection level operations against one database.
pub trait DocumentStore: Send + Sync {
    /// endpoint label, used in logs.
    fn label(&self) -> &str;

    /// List collection names, optionally filtered by `kind`.
    fn list_collection_names(&self, kind: Option<CollectionKind>) -> Result<Vec<String>>;

    /// List collections with their creation options, optionally filtered by `kind`.
    fn list_collections(&self, kind: Option<CollectionKind>) -> Result<Vec<CollectionInfo>>;

    /// Read creation options of `coll`.
    fn collection_options(&self, coll: &str) -> Result<Document> {
        self.list_collections(None)?
            .into_iter()
            .find(|info| info.name == coll)
            .map(|info| info.options)
            .ok_or_else(|| SyncError::CollectionNotFound(coll.to_string()))
    }

    /// Create `coll` with `options`, an existing collection is not an error.
    fn create_collection(&self, coll: &str, options: &Document) -> Result<()>;

    /// List indexes of `coll`.
    fn list_indexes(&self, coll: &str) -> Result<Vec<IndexDescriptor>>;

    /// Create one index on `coll`.
    fn create_index(&self, coll: &str, index: &IndexDescriptor) -> Result<()>;

    /// Scan every document of `coll` in natural order.
    fn scan(&self, coll: &str) -> Result<DocumentScan<'_>>;

    /// Insert `docs` into `coll` in one call.
    fn insert_many(&self, coll: &str, docs: &[Document]) -> Result<()>;

    /// Insert `docs` into `coll`, skipping documents whose `_id` is already there.
    ///
    /// Returns how many documents were written.
    fn insert_missing(&self, coll: &str, docs: &[Document]) -> Result<u64>;

    /// Replace the document whose `_id` is `id`, insert it when `upsert` is set.
    fn replace_one(&self, coll: &str, id: &Bson, doc: &Document, upsert: bool) -> Result<()>;

    /// Apply field level `update` to the document whose `_id` is `id`.
    fn update_one(&self, coll: &str, id: &Bson, update: &FieldUpdate) -> Result<()>;

    /// Delete the document whose `_id` is `id`.
    fn delete_one(&self, coll: &str, id: &Bson) -> Result<()>;

    /// Count documents matching `filter`.
    fn count_documents(&self, coll: &str, filter: Document) -> Result<u64>;

    /// Group `coll` by `field`, return values occurring more than once.
    fn find_duplicates(&self, coll: &str, field: &str) -> Result<Vec<DuplicateGroup>>;

    /// Probe whether the deployment can serve a change feed.
    fn supports_change_feed(&self) -> Result<bool>;

    /// Subscribe to change events of the whole database.
    fn watch(&self) -> Result<Box<dyn ChangeFeed>>;
}
