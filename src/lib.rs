//! Mongo mirror lib, which copies one mongodb database into another deployment, keeps it
//! following the source through a change feed, and verifies that both sides agree.
//!
//! The engines never talk to a server directly, they go through the [DocumentStore] trait.
//! [MongoStore] implements it against a mongodb deployment, [MemoryStore] keeps everything
//! in process.
//!
//! # Mirror example:
//! ```no_run
//! use mongo_mirror::{Mirror, MirrorConfig, MongoStore, Shutdown};
//! use std::sync::Arc;
//!
//! let conf = MirrorConfig::new(
//!     "mongodb://localhost:27017".to_string(),
//!     "mongodb://localhost:27018".to_string(),
//!     "training".to_string(),
//! );
//! let db = conf.get_sync().get_db();
//! let source = MongoStore::connect(conf.get_src_url(), db).unwrap();
//! let target = MongoStore::connect(conf.get_dst_url(), db).unwrap();
//! let mirror = Mirror::new(Arc::new(source), Arc::new(target), &conf);
//! mirror.run(&Shutdown::new()).unwrap();
//! ```
//!
//! # Validation example:
//! ```
//! use bson::doc;
//! use mongo_mirror::mirror::validate::Validator;
//! use mongo_mirror::{DocumentStore, MemoryStore};
//!
//! let source = MemoryStore::new();
//! let target = MemoryStore::new();
//! source.insert_many("a", &[doc! {"_id": 1, "x": 1}]).unwrap();
//! target.insert_many("a", &[doc! {"_id": 1, "x": 2}]).unwrap();
//!
//! let differences = Validator::new(&source, &target, "_id").validate_all().unwrap();
//! assert_eq!(differences.len(), 1);
//! ```

#![warn(missing_docs)]

#[doc(hidden)]
pub mod bson_helper;
pub mod change_event;
pub mod config;
mod error;
pub mod logging;
pub mod mirror;
pub mod retry;
pub mod shutdown;
pub mod store;

/// mongodb internal database for admin.
const ADMIN_DB_NAME: &str = "admin";
/// document identifier key name.
pub const ID_KEY: &str = "_id";

pub use change_event::{ChangeEvent, FieldUpdate, Namespace};
pub use config::{MirrorConfig, SyncConf, ValidateConf};
pub use error::{Result, SyncError};
pub use mirror::{Difference, Mirror, MirrorReport};
pub use shutdown::Shutdown;
pub use store::memory::MemoryStore;
pub use store::mongo::MongoStore;
pub use store::{ChangeFeed, CollectionKind, DocumentStore, DuplicateGroup, IndexDescriptor};
