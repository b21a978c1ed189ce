use bson::document::ValueAccessError;
use bson::Bson;
use mongodb::error::Error as MongoError;
use std::result::Result as StdResult;
use thiserror::Error;

/// Everything which can go wrong while mirroring.
#[derive(Error, Debug)]
pub enum SyncError {
    /// mongodb driver error.
    #[error("Mongodb error: {0}")]
    MongoError(#[from] MongoError),
    /// endpoint can't be used with the given credentials.
    #[error("Check permission for database {db:?} failed, connection string: {uri:?}, detailed: {detail:?}")]
    PermissionError {
        /// connection string.
        uri: String,
        /// database which was checked.
        db: String,
        /// driver error returned by the check.
        detail: MongoError,
    },
    /// a document field is missing or has an unexpected type.
    #[error("Bson value access error: {0}")]
    BsonError(#[from] ValueAccessError),
    /// value can't be encoded as bson.
    #[error("Bson serialize error: {0}")]
    BsonSerError(#[from] bson::ser::Error),
    /// the named collection doesn't exist.
    #[error("Collection {0:?} not found")]
    CollectionNotFound(String),
    /// an insert hit an `_id` which already exists.
    #[error("Duplicate key {id} in collection {coll:?}")]
    DuplicateKey {
        /// collection name.
        coll: String,
        /// the duplicated identifier.
        id: Bson,
    },
    /// an index key holds a value the server won't accept.
    #[error("Invalid index key {field}={value} in index {index:?}")]
    InvalidIndexKey {
        /// index name.
        index: String,
        /// key field.
        field: String,
        /// rejected key value.
        value: Bson,
    },
    /// change event lacks what's needed to replay it.
    #[error("Malformed change event: {0}")]
    MalformedEvent(String),
    /// the change feed ended on the server side.
    #[error("Change feed closed: {0}")]
    FeedClosed(String),
    /// a store refused an operation.
    #[error("Store fault: {0}")]
    StoreFault(String),
    /// file or thread error.
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    /// configuration file can't be parsed.
    #[error("Invalid configuration: {0}")]
    ConfigError(#[from] toml::de::Error),
    /// bulk copy workers can't be started.
    #[error("Can't build worker pool: {0}")]
    PoolError(#[from] rayon::ThreadPoolBuildError),
}

/// Result with [SyncError].
pub type Result<T> = StdResult<T, SyncError>;
