//! [DocumentStore] implementation against a mongodb deployment, using the blocking driver api.

use super::{
    ChangeFeed, CollectionInfo, CollectionKind, DocumentScan, DocumentStore, DuplicateGroup,
    IndexDescriptor,
};
use crate::bson_helper::as_i64;
use crate::change_event::{id_filter, ChangeEvent, FieldUpdate};
use crate::{Result, SyncError, ADMIN_DB_NAME};
use bson::{doc, Bson, Document};
use mongodb::change_stream::event::ChangeStreamEvent;
use mongodb::error::{BulkWriteFailure, Error as MongoError, ErrorKind, Result as MongoResult};
use mongodb::options::{
    ChangeStreamOptions, FindOptions, FullDocumentType, InsertManyOptions, ReplaceOptions,
};
use mongodb::sync::{ChangeStream, Client, Collection, Database};
use std::time::Duration;
use tracing::debug;

/// server error code when a collection already exists.
const NAMESPACE_EXISTS: i32 = 48;
/// server error code of a unique index violation.
const DUPLICATE_KEY: i32 = 11000;
/// how many documents the server returns in one scan batch.
const SCAN_BATCH_SIZE: u32 = 1000;
const DEFAULT_FEED_POLL: Duration = Duration::from_secs(1);

/// A mongodb database endpoint.
#[derive(Clone, Debug)]
pub struct MongoStore {
    uri: String,
    db_name: String,
    client: Client,
    feed_poll: Duration,
}

impl MongoStore {
    /// create a new store for database `db_name` at `uri`.
    ///
    /// The driver connects lazily, use [check_permissions](MongoStore::check_permissions) to make
    /// sure the server is reachable.
    pub fn connect(uri: &str, db_name: &str) -> Result<Self> {
        let client = Client::with_uri_str(uri)?;
        Ok(MongoStore {
            uri: uri.to_string(),
            db_name: db_name.to_string(),
            client,
            feed_poll: DEFAULT_FEED_POLL,
        })
    }

    /// set how long the change feed waits on the server before yielding `None`.
    pub fn with_feed_poll(mut self, poll: Duration) -> Self {
        self.feed_poll = poll;
        self
    }

    /// Check if we have enough permissions to run mirror progress.
    pub fn check_permissions(&self) -> Result<()> {
        if let Err(e) = self.db().list_collection_names(None) {
            return Err(SyncError::PermissionError {
                uri: self.uri.clone(),
                db: self.db_name.clone(),
                detail: e,
            });
        }
        Ok(())
    }

    /// get working database.
    pub fn db(&self) -> Database {
        self.client.database(&self.db_name)
    }

    fn coll(&self, name: &str) -> Collection<Document> {
        self.db().collection(name)
    }

    fn kind_filter(kind: Option<CollectionKind>) -> Option<Document> {
        kind.map(|k| match k {
            CollectionKind::Collection => doc! {"type": "collection"},
            CollectionKind::View => doc! {"type": "view"},
            CollectionKind::Capped => doc! {"type": "collection", "options.capped": true},
        })
    }
}

impl DocumentStore for MongoStore {
    fn label(&self) -> &str {
        &self.uri
    }

    fn list_collection_names(&self, kind: Option<CollectionKind>) -> Result<Vec<String>> {
        Ok(self.db().list_collection_names(Self::kind_filter(kind))?)
    }

    fn list_collections(&self, kind: Option<CollectionKind>) -> Result<Vec<CollectionInfo>> {
        // go through `run_command` to keep options untyped, typed options can't represent
        // collations without locale.  Collection specs are small, ask for them in one batch.
        let mut cmd = doc! {"listCollections": 1, "cursor": {"batchSize": i32::MAX}};
        if let Some(filter) = Self::kind_filter(kind) {
            cmd.insert("filter", filter);
        }
        let result = self.db().run_command(cmd, None)?;
        let specs = result.get_document("cursor")?.get_array("firstBatch")?;

        let mut infos = Vec::with_capacity(specs.len());
        for spec in specs {
            let spec = match spec {
                Bson::Document(d) => d,
                _ => continue,
            };
            let kind = match spec.get_str("type") {
                Ok("view") => CollectionKind::View,
                _ => CollectionKind::Collection,
            };
            infos.push(CollectionInfo {
                name: spec.get_str("name")?.to_string(),
                kind,
                options: spec.get_document("options").cloned().unwrap_or_default(),
            });
        }
        Ok(infos)
    }

    fn create_collection(&self, coll: &str, options: &Document) -> Result<()> {
        let mut cmd = doc! {"create": coll};
        for (k, v) in options.iter() {
            cmd.insert(k.clone(), v.clone());
        }
        let result = self.db().run_command(cmd, None).map(|_| ());

        if cmd_result_is_ok(&result, NAMESPACE_EXISTS) {
            Ok(())
        } else {
            result.map_err(SyncError::from)
        }
    }

    fn list_indexes(&self, coll: &str) -> Result<Vec<IndexDescriptor>> {
        let result = self.db().run_command(doc! {"listIndexes": coll}, None)?;
        // a collection holds at most 64 indexes, the first batch contains all of them.
        let indexes = result.get_document("cursor")?.get_array("firstBatch")?;
        indexes
            .iter()
            .filter_map(|index| match index {
                Bson::Document(d) => Some(IndexDescriptor::from_document(d.clone())),
                _ => None,
            })
            .collect()
    }

    fn create_index(&self, coll: &str, index: &IndexDescriptor) -> Result<()> {
        self.db().run_command(
            doc! {
                "createIndexes": coll,
                "indexes": [index.to_document()],
            },
            None,
        )?;
        Ok(())
    }

    fn scan(&self, coll: &str) -> Result<DocumentScan<'_>> {
        let cursor = self.coll(coll).find(
            None,
            FindOptions::builder().batch_size(SCAN_BATCH_SIZE).build(),
        )?;
        Ok(Box::new(cursor.map(|doc| doc.map_err(SyncError::from))))
    }

    fn insert_many(&self, coll: &str, docs: &[Document]) -> Result<()> {
        self.coll(coll).insert_many(docs, None)?;
        Ok(())
    }

    fn insert_missing(&self, coll: &str, docs: &[Document]) -> Result<u64> {
        let options = InsertManyOptions::builder().ordered(false).build();
        match self.coll(coll).insert_many(docs, options) {
            Ok(result) => Ok(result.inserted_ids.len() as u64),
            Err(e) => {
                let skipped = match e.kind.as_ref() {
                    ErrorKind::BulkWrite(failure) => duplicate_keys_only(failure),
                    _ => None,
                };
                match skipped {
                    Some(skipped) => {
                        debug!("{} documents already exist in {}, skipped", skipped, coll);
                        Ok(docs.len().saturating_sub(skipped) as u64)
                    }
                    None => Err(e.into()),
                }
            }
        }
    }

    fn replace_one(&self, coll: &str, id: &Bson, doc: &Document, upsert: bool) -> Result<()> {
        let result = self.coll(coll).replace_one(
            id_filter(id),
            doc,
            ReplaceOptions::builder().upsert(upsert).build(),
        )?;
        if result.matched_count == 0 && result.upserted_id.is_none() {
            debug!(%coll, %id, "Replace target document doesn't exist.");
        }
        Ok(())
    }

    fn update_one(&self, coll: &str, id: &Bson, update: &FieldUpdate) -> Result<()> {
        let update_doc = match update.to_update_document() {
            Some(u) => u,
            None => return Ok(()),
        };
        let result = self.coll(coll).update_one(id_filter(id), update_doc, None)?;
        if result.matched_count == 0 {
            debug!(%coll, %id, "Update target document doesn't exist.");
        }
        Ok(())
    }

    fn delete_one(&self, coll: &str, id: &Bson) -> Result<()> {
        let result = self.coll(coll).delete_one(id_filter(id), None)?;
        if result.deleted_count == 0 {
            debug!(%coll, %id, "Delete target document doesn't exist.");
        }
        Ok(())
    }

    fn count_documents(&self, coll: &str, filter: Document) -> Result<u64> {
        Ok(self.coll(coll).count_documents(filter, None)?)
    }

    fn find_duplicates(&self, coll: &str, field: &str) -> Result<Vec<DuplicateGroup>> {
        let cursor = self.coll(coll).aggregate(
            vec![
                doc! {"$group": {"_id": format!("${}", field), "count": {"$sum": 1}}},
                doc! {"$match": {"count": {"$gt": 1}}},
            ],
            None,
        )?;

        let mut groups = vec![];
        for group in cursor {
            let mut group = group?;
            let count = group.get("count").and_then(as_i64).unwrap_or(0) as u64;
            let value = group.remove("_id").unwrap_or(Bson::Null);
            groups.push(DuplicateGroup { value, count });
        }
        Ok(groups)
    }

    fn supports_change_feed(&self) -> Result<bool> {
        let status = self
            .client
            .database(ADMIN_DB_NAME)
            .run_command(doc! {"replSetGetStatus": 1}, None)?;
        Ok(status.get("ok").and_then(as_i64) == Some(1))
    }

    fn watch(&self) -> Result<Box<dyn ChangeFeed>> {
        let stream = self.db().watch(
            Vec::<Document>::new(),
            ChangeStreamOptions::builder()
                .full_document(Some(FullDocumentType::UpdateLookup))
                .max_await_time(Some(self.feed_poll))
                .build(),
        )?;
        Ok(Box::new(MongoFeed { stream }))
    }
}

/// Change feed backed by a database change stream.
pub struct MongoFeed {
    stream: ChangeStream<ChangeStreamEvent<Document>>,
}

impl ChangeFeed for MongoFeed {
    fn next_event(&mut self) -> Result<Option<ChangeEvent>> {
        match self.stream.next_if_any()? {
            Some(event) => ChangeEvent::from_stream_event(event),
            None if self.stream.is_alive() => Ok(None),
            None => Err(SyncError::FeedClosed(
                "server closed the change stream".to_string(),
            )),
        }
    }
}

fn cmd_result_is_ok<T>(result: &MongoResult<T>, valid_err_code: i32) -> bool {
    match result {
        Ok(_) => true,
        Err(e) => cmd_err_code_is(e, valid_err_code),
    }
}

// how many writes failed, when every failure is a duplicate key.
fn duplicate_keys_only(failure: &BulkWriteFailure) -> Option<usize> {
    if failure.write_concern_error.is_some() {
        return None;
    }
    let errors = failure.write_errors.as_ref()?;
    if errors.iter().all(|err| err.code == DUPLICATE_KEY) {
        Some(errors.len())
    } else {
        None
    }
}

fn cmd_err_code_is(error: &MongoError, code: i32) -> bool {
    match error.kind.as_ref() {
        ErrorKind::Command(err) => err.code == code,
        _ => false,
    }
}
