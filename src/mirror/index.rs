//! Reconcile indexes of one collection between source and target.

use crate::store::{DocumentStore, IndexDescriptor};
use crate::{Result, SyncError};
use bson::Bson;
use std::collections::HashMap;
use tracing::{debug, error, info, warn};

/// Direction or type token allowed in an index key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexToken {
    /// `1`
    Ascending,
    /// `-1`
    Descending,
    /// `"2d"`
    Geo2d,
    /// `"2dsphere"`
    Geo2dSphere,
    /// `"text"`
    Text,
    /// `"hashed"`
    Hashed,
}

impl IndexToken {
    /// Parse one key value, None if it's not an allowed token.
    pub fn parse(value: &Bson) -> Option<Self> {
        match value {
            Bson::Int32(1) | Bson::Int64(1) => Some(IndexToken::Ascending),
            Bson::Int32(-1) | Bson::Int64(-1) => Some(IndexToken::Descending),
            Bson::Double(v) if *v == 1.0 => Some(IndexToken::Ascending),
            Bson::Double(v) if *v == -1.0 => Some(IndexToken::Descending),
            Bson::String(s) => match s.as_str() {
                "2d" => Some(IndexToken::Geo2d),
                "2dsphere" => Some(IndexToken::Geo2dSphere),
                "text" => Some(IndexToken::Text),
                "hashed" => Some(IndexToken::Hashed),
                _ => None,
            },
            _ => None,
        }
    }
}

/// Check that every key entry of `index` is an allowed token.
///
/// The first offending field is reported.
pub fn validate_key(index: &IndexDescriptor) -> Result<()> {
    for (field, value) in index.key.iter() {
        if IndexToken::parse(value).is_none() {
            return Err(SyncError::InvalidIndexKey {
                index: index.name.clone(),
                field: field.clone(),
                value: value.clone(),
            });
        }
    }
    Ok(())
}

/// What reconciliation did to each source index.
#[derive(Debug, Default, PartialEq)]
pub struct IndexReport {
    /// identical on both sides.
    pub unchanged: Vec<String>,
    /// created on target.
    pub created: Vec<String>,
    /// skipped because of an invalid key.
    pub skipped: Vec<String>,
    /// creation failed on target.
    pub failed: Vec<String>,
}

/// Create every index of `coll_name` which is absent or different on `target`.
///
/// Invalid or failing indexes are logged and skipped, they never stop the remaining ones.
pub fn reconcile_indexes(
    source: &dyn DocumentStore,
    target: &dyn DocumentStore,
    coll_name: &str,
) -> Result<IndexReport> {
    let source_indexes = source.list_indexes(coll_name)?;
    let target_indexes: HashMap<String, IndexDescriptor> = target
        .list_indexes(coll_name)?
        .into_iter()
        .map(|index| (index.name.clone(), index))
        .collect();

    let mut report = IndexReport::default();
    for index in source_indexes {
        let index_name = index.name.clone();
        let target_index = target_indexes.get(&index_name);
        if let Some(target_index) = target_index {
            if target_index.same_definition(&index) {
                debug!(%coll_name, %index_name, "Index already exists in target.");
                report.unchanged.push(index_name);
                continue;
            }
        }
        warn!(%coll_name, %index_name, source=?index, target=?target_index, "Indexes differ.");

        if let Err(e) = validate_key(&index) {
            error!(%coll_name, %index_name, %e, "Invalid index specifier, skipping this index.");
            report.skipped.push(index_name);
            continue;
        }

        match target.create_index(coll_name, &index) {
            Ok(()) => {
                info!(%coll_name, %index_name, "Created index in target.");
                report.created.push(index_name);
            }
            Err(e) => {
                error!(%coll_name, %index_name, ?e, "Failed to create index in target.");
                report.failed.push(index_name);
            }
        }
    }
    Ok(report)
}
