//! Copy collection level metadata: creation options, capped settings and views.

use crate::store::{is_capped, CollectionKind, DocumentStore};
use crate::Result;
use bson::{doc, Document};
use std::collections::HashSet;
use tracing::{error, info, warn};

const COLLATION_KEY: &str = "collation";
const LOCALE_KEY: &str = "locale";

/// Drop `collation` from `options` when it carries no `locale`, such collation is not portable.
pub fn portable_options(coll_name: &str, mut options: Document) -> Document {
    let missing_locale = match options.get_document(COLLATION_KEY) {
        Ok(collation) => !collation.contains_key(LOCALE_KEY),
        // present but not a document, the server won't accept it either.
        Err(_) => options.contains_key(COLLATION_KEY),
    };
    if missing_locale {
        warn!(%coll_name, "Skipping collation due to missing locale.");
        options.remove(COLLATION_KEY);
    }
    options
}

/// Read options of `coll_name` on `source` and create the collection on `target` with them,
/// see [create_like_source].
///
/// Returns the options the collection was created with.
pub fn copy_collection_options(
    source: &dyn DocumentStore,
    target: &dyn DocumentStore,
    coll_name: &str,
) -> Result<Document> {
    let options = source.collection_options(coll_name)?;
    create_like_source(target, coll_name, options)
}

/// Create `coll_name` on `target` with portable `options`, makes exactly one creation call.
pub fn create_with_options(
    target: &dyn DocumentStore,
    coll_name: &str,
    options: Document,
) -> Result<Document> {
    let options = portable_options(coll_name, options);
    if options.is_empty() {
        info!(%coll_name, "Creating collection without additional options.");
    } else {
        info!(%coll_name, ?options, "Creating collection with options.");
    }
    target.create_collection(coll_name, &options)?;
    Ok(options)
}

/// Keep only the capped bounds of `options`.
pub fn capped_options(options: &Document) -> Document {
    let mut capped = doc! {"capped": true};
    for key in ["size", "max"] {
        if let Some(value) = options.get(key) {
            capped.insert(key, value.clone());
        }
    }
    capped
}

/// Create capped collection `coll_name` on `target` with the bounds found in source `options`.
pub fn copy_capped_collection(
    target: &dyn DocumentStore,
    coll_name: &str,
    options: &Document,
) -> Result<Document> {
    let capped = capped_options(options);
    target.create_collection(coll_name, &capped)?;
    info!(%coll_name, ?capped, "Capped collection created in target database.");
    Ok(capped)
}

/// Create `coll_name` on `target` the way bulk copy does, from its source `options`.
///
/// Capped collections keep only their bounds, others go through [create_with_options].
pub fn create_like_source(
    target: &dyn DocumentStore,
    coll_name: &str,
    options: Document,
) -> Result<Document> {
    if is_capped(&options) {
        copy_capped_collection(target, coll_name, &options)
    } else {
        create_with_options(target, coll_name, options)
    }
}

/// What happened to source views.
#[derive(Debug, Default)]
pub struct ViewReport {
    /// views created on target.
    pub created: Vec<String>,
    /// views which already exist on target.
    pub existing: Vec<String>,
    /// views which failed to create.
    pub failed: Vec<String>,
}

/// Create every view of `source` which doesn't exist on `target`.
///
/// A view's pipeline and `viewOn` are kept as is, its collation goes through the same locale
/// check as collections.  A failed view is logged and doesn't stop the others.
pub fn copy_views(source: &dyn DocumentStore, target: &dyn DocumentStore) -> Result<ViewReport> {
    let existing: HashSet<String> = target.list_collection_names(None)?.into_iter().collect();
    let mut report = ViewReport::default();

    for view in source.list_collections(Some(CollectionKind::View))? {
        let view_name = view.name;
        if existing.contains(&view_name) {
            info!(%view_name, "View already exists in target database.");
            report.existing.push(view_name);
            continue;
        }

        let mut options = Document::new();
        for key in ["viewOn", "pipeline", COLLATION_KEY] {
            if let Some(value) = view.options.get(key) {
                options.insert(key, value.clone());
            }
        }
        let options = portable_options(&view_name, options);
        match target.create_collection(&view_name, &options) {
            Ok(()) => {
                info!(%view_name, ?options, "View created in target database.");
                report.created.push(view_name);
            }
            Err(e) => {
                error!(%view_name, ?e, "Failed to create view in target database.");
                report.failed.push(view_name);
            }
        }
    }
    Ok(report)
}
