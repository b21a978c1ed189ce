//! Provide structured change event definition.
//!
//! Basically, use [ChangeEvent::from_stream_event] to parse a mongodb change stream event, and
//! then use [apply](ChangeEvent::apply) to replay it against a target store.

use bson::{doc, Bson, Document};
use mongodb::change_stream::event::{ChangeStreamEvent, OperationType};
use tracing::warn;

use crate::store::DocumentStore;
use crate::{Result, SyncError, ID_KEY};

/// Namespace an event belongs to.
#[derive(Debug, Clone, PartialEq)]
pub struct Namespace {
    /// database name.
    pub db: String,
    /// collection name.
    pub coll: String,
}

impl Namespace {
    /// construct a namespace from `db` and `coll`.
    pub fn new(db: impl Into<String>, coll: impl Into<String>) -> Self {
        Namespace {
            db: db.into(),
            coll: coll.into(),
        }
    }
}

/// Field level update: set some fields, remove some others.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct FieldUpdate {
    /// dotted field path to new value.
    pub set: Document,
    /// dotted field paths to remove.
    pub unset: Vec<String>,
}

impl FieldUpdate {
    /// create a field update.
    pub fn new(set: Document, unset: Vec<String>) -> Self {
        FieldUpdate { set, unset }
    }

    /// Returns true if the update changes nothing.
    pub fn is_empty(&self) -> bool {
        self.set.is_empty() && self.unset.is_empty()
    }

    /// Build mongodb update document, `None` if the update is empty.
    ///
    /// # Example
    /// ```
    /// use bson::doc;
    /// use mongo_mirror::FieldUpdate;
    ///
    /// let update = FieldUpdate::new(doc! {"status": "active"}, vec!["temp_flag".to_string()]);
    /// assert_eq!(
    ///     update.to_update_document(),
    ///     Some(doc! {"$set": {"status": "active"}, "$unset": {"temp_flag": ""}})
    /// );
    /// ```
    pub fn to_update_document(&self) -> Option<Document> {
        let mut update = Document::new();
        if !self.set.is_empty() {
            update.insert("$set", self.set.clone());
        }
        if !self.unset.is_empty() {
            let unset: Document = self
                .unset
                .iter()
                .map(|field| (field.clone(), Bson::String(String::new())))
                .collect();
            update.insert("$unset", unset);
        }
        if update.is_empty() {
            None
        } else {
            Some(update)
        }
    }
}

/// Structured change event.
#[derive(Debug, Clone, PartialEq)]
pub enum ChangeEvent {
    /// a new document.
    Insert {
        /// where the document lives.
        ns: Namespace,
        /// document `_id`.
        id: Bson,
        /// full inserted document.
        document: Document,
    },
    /// some fields of a document changed.
    Update {
        /// where the document lives.
        ns: Namespace,
        /// document `_id`.
        id: Bson,
        /// changed and removed fields.
        update: FieldUpdate,
    },
    /// a document was replaced as a whole.
    Replace {
        /// where the document lives.
        ns: Namespace,
        /// document `_id`.
        id: Bson,
        /// the new document.
        document: Document,
    },
    /// a document was removed.
    Delete {
        /// where the document lived.
        ns: Namespace,
        /// document `_id`.
        id: Bson,
    },
}

impl ChangeEvent {
    /// Parse a mongodb change stream event.
    ///
    /// It returns None when the operation isn't a document level change (drop, rename,
    /// invalidate...), these are logged and ignored.
    pub fn from_stream_event(event: ChangeStreamEvent<Document>) -> Result<Option<Self>> {
        let ns = match event.ns.as_ref() {
            Some(ns) => match ns.coll.as_ref() {
                Some(coll) => Namespace::new(ns.db.clone(), coll.clone()),
                None => {
                    warn!(operation=?event.operation_type, "Get a change event without collection, ignored.");
                    return Ok(None);
                }
            },
            None => {
                warn!(operation=?event.operation_type, "Get a change event without namespace, ignored.");
                return Ok(None);
            }
        };

        let id = match event.document_key.as_ref().and_then(|key| key.get(ID_KEY)) {
            Some(id) => id.clone(),
            None => {
                return Err(SyncError::MalformedEvent(format!(
                    "{:?} event on {}.{} has no document key",
                    event.operation_type, ns.db, ns.coll
                )))
            }
        };

        match event.operation_type {
            OperationType::Insert => {
                let document = event.full_document.ok_or_else(|| {
                    SyncError::MalformedEvent(format!("insert event of {} has no document", id))
                })?;
                Ok(Some(ChangeEvent::Insert { ns, id, document }))
            }
            OperationType::Replace => {
                let document = event.full_document.ok_or_else(|| {
                    SyncError::MalformedEvent(format!("replace event of {} has no document", id))
                })?;
                Ok(Some(ChangeEvent::Replace { ns, id, document }))
            }
            OperationType::Update => {
                let description = event.update_description.ok_or_else(|| {
                    SyncError::MalformedEvent(format!("update event of {} has no description", id))
                })?;
                Ok(Some(ChangeEvent::Update {
                    ns,
                    id,
                    update: FieldUpdate::new(
                        description.updated_fields,
                        description.removed_fields,
                    ),
                }))
            }
            OperationType::Delete => Ok(Some(ChangeEvent::Delete { ns, id })),
            other => {
                warn!(operation=?other, coll=%ns.coll, "Get a change event which can't be handled.");
                Ok(None)
            }
        }
    }

    /// namespace of the event.
    pub fn namespace(&self) -> &Namespace {
        match self {
            ChangeEvent::Insert { ns, .. }
            | ChangeEvent::Update { ns, .. }
            | ChangeEvent::Replace { ns, .. }
            | ChangeEvent::Delete { ns, .. } => ns,
        }
    }

    /// `_id` of the affected document.
    pub fn id(&self) -> &Bson {
        match self {
            ChangeEvent::Insert { id, .. }
            | ChangeEvent::Update { id, .. }
            | ChangeEvent::Replace { id, .. }
            | ChangeEvent::Delete { id, .. } => id,
        }
    }

    /// short operation name, used in logs.
    pub fn operation(&self) -> &'static str {
        match self {
            ChangeEvent::Insert { .. } => "insert",
            ChangeEvent::Update { .. } => "update",
            ChangeEvent::Replace { .. } => "replace",
            ChangeEvent::Delete { .. } => "delete",
        }
    }

    /// Apply event represent in `self` against `target`.
    ///
    /// Inserts are written as upserting replaces so that replaying an insert which already
    /// reached the target converges.  Changes to a document the target doesn't hold are no-op.
    ///
    /// # Example
    /// ```
    /// use bson::{doc, Bson};
    /// use mongo_mirror::{ChangeEvent, DocumentStore, FieldUpdate, MemoryStore, Namespace};
    ///
    /// let target = MemoryStore::new();
    /// target.insert_many("users", &[doc! {"_id": 42, "status": "new", "temp_flag": true, "age": 3}]).unwrap();
    /// let event = ChangeEvent::Update {
    ///     ns: Namespace::new("training", "users"),
    ///     id: Bson::Int32(42),
    ///     update: FieldUpdate::new(doc! {"status": "active"}, vec!["temp_flag".to_string()]),
    /// };
    /// event.apply(&target).unwrap();
    /// assert_eq!(target.documents("users"), vec![doc! {"_id": 42, "status": "active", "age": 3}]);
    /// ```
    pub fn apply(&self, target: &dyn DocumentStore) -> Result<()> {
        match self {
            ChangeEvent::Insert { ns, id, document } => {
                target.replace_one(&ns.coll, id, document, true)
            }
            ChangeEvent::Update { ns, id, update } => {
                if update.is_empty() {
                    warn!(coll=%ns.coll, %id, "Update event changes nothing, ignored.");
                    return Ok(());
                }
                target.update_one(&ns.coll, id, update)
            }
            ChangeEvent::Replace { ns, id, document } => {
                target.replace_one(&ns.coll, id, document, false)
            }
            ChangeEvent::Delete { ns, id } => target.delete_one(&ns.coll, id),
        }
    }
}

/// Build the `_id` equality filter for `id`.
pub fn id_filter(id: &Bson) -> Document {
    doc! { ID_KEY: id.clone() }
}
