//! Deep comparison between source and target, findings are reported, never corrected.

use crate::bson_helper::{id_key, is_null_or_nan, scalar_eq};
use crate::error::Result;
use crate::store::{CollectionKind, DocumentStore, IndexDescriptor};
use crate::ID_KEY;
use bson::{doc, Bson, Document};
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use tracing::{error, info, warn};

/// Which store a finding is about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    /// the store being copied from.
    Source,
    /// the store being copied to.
    Target,
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Source => write!(f, "source"),
            Side::Target => write!(f, "target"),
        }
    }
}

/// What differs.
#[derive(Debug, Clone, PartialEq)]
pub enum DifferenceKind {
    /// document counts differ, documents were not compared.
    CountMismatch {
        /// count on source.
        source: u64,
        /// count on target.
        target: u64,
    },
    /// an index is absent or defined differently on one side.
    IndexMismatch {
        /// index name.
        name: String,
        /// source definition, None if source doesn't have it.
        source: Option<IndexDescriptor>,
        /// target definition, None if target doesn't have it.
        target: Option<IndexDescriptor>,
    },
    /// a source document has no counterpart on target.
    MissingDocument {
        /// `_id` of the source document.
        id: Bson,
    },
    /// a field exists on one side only.
    MissingField {
        /// document `_id`.
        id: Bson,
        /// dotted field path.
        path: String,
        /// the side lacking the field.
        missing_on: Side,
    },
    /// two arrays have different lengths, elements were not compared.
    ArrayLength {
        /// document `_id`.
        id: Bson,
        /// dotted field path.
        path: String,
        /// source length.
        source: usize,
        /// target length.
        target: usize,
    },
    /// two values differ.
    ValueMismatch {
        /// document `_id`.
        id: Bson,
        /// dotted field path.
        path: String,
        /// source value.
        source: Bson,
        /// target value.
        target: Bson,
    },
    /// a value of the unique field occurs more than once.
    Duplicate {
        /// store holding the duplicates.
        side: Side,
        /// checked field.
        field: String,
        /// duplicated value.
        value: Bson,
        /// number of documents holding it.
        count: u64,
    },
}

/// One finding of the validation.
#[derive(Debug, Clone, PartialEq)]
pub struct Difference {
    /// collection name.
    pub collection: String,
    /// what differs.
    pub kind: DifferenceKind,
}

impl Difference {
    fn new(collection: &str, kind: DifferenceKind) -> Self {
        Difference {
            collection: collection.to_string(),
            kind,
        }
    }
}

impl fmt::Display for Difference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let coll = &self.collection;
        match &self.kind {
            DifferenceKind::CountMismatch { source, target } => write!(
                f,
                "collection '{}': document counts differ, source has {}, target has {}",
                coll, source, target
            ),
            DifferenceKind::IndexMismatch { name, source, target } => write!(
                f,
                "collection '{}': index '{}' differs, source={:?} vs target={:?}",
                coll, name, source, target
            ),
            DifferenceKind::MissingDocument { id } => write!(
                f,
                "collection '{}': document with _id={} is missing in target",
                coll, id
            ),
            DifferenceKind::MissingField { id, path, missing_on } => write!(
                f,
                "collection '{}': document with _id={}: field '{}' is missing in {}",
                coll, id, path, missing_on
            ),
            DifferenceKind::ArrayLength {
                id,
                path,
                source,
                target,
            } => write!(
                f,
                "collection '{}': document with _id={}: array '{}' lengths differ, source has {} elements, target has {} elements",
                coll, id, path, source, target
            ),
            DifferenceKind::ValueMismatch {
                id,
                path,
                source,
                target,
            } => write!(
                f,
                "collection '{}': document with _id={}: field '{}' differs, source={} vs target={}",
                coll, id, path, source, target
            ),
            DifferenceKind::Duplicate {
                side,
                field,
                value,
                count,
            } => write!(
                f,
                "collection '{}': {} has {} documents with {}={}",
                coll, side, count, field, value
            ),
        }
    }
}

fn join_path(parent: &str, key: &str) -> String {
    if parent.is_empty() {
        key.to_string()
    } else {
        format!("{}.{}", parent, key)
    }
}

fn compare_values(
    coll: &str,
    id: &Bson,
    path: &str,
    source: &Bson,
    target: &Bson,
    out: &mut Vec<Difference>,
) {
    if is_null_or_nan(source) && is_null_or_nan(target) {
        return;
    }
    match (source, target) {
        (Bson::Document(s), Bson::Document(t)) => compare_fields(coll, id, path, s, t, out),
        (Bson::Array(s), Bson::Array(t)) => {
            if s.len() != t.len() {
                out.push(Difference::new(
                    coll,
                    DifferenceKind::ArrayLength {
                        id: id.clone(),
                        path: path.to_string(),
                        source: s.len(),
                        target: t.len(),
                    },
                ));
                return;
            }
            for (idx, (s, t)) in s.iter().zip(t.iter()).enumerate() {
                compare_values(coll, id, &join_path(path, &idx.to_string()), s, t, out);
            }
        }
        (s, t) => {
            if !scalar_eq(s, t) {
                out.push(Difference::new(
                    coll,
                    DifferenceKind::ValueMismatch {
                        id: id.clone(),
                        path: path.to_string(),
                        source: s.clone(),
                        target: t.clone(),
                    },
                ));
            }
        }
    }
}

fn compare_fields(
    coll: &str,
    id: &Bson,
    parent: &str,
    source: &Document,
    target: &Document,
    out: &mut Vec<Difference>,
) {
    for (key, value) in source.iter() {
        let path = join_path(parent, key);
        match target.get(key) {
            Some(other) => compare_values(coll, id, &path, value, other, out),
            None => out.push(Difference::new(
                coll,
                DifferenceKind::MissingField {
                    id: id.clone(),
                    path,
                    missing_on: Side::Target,
                },
            )),
        }
    }
    for key in target.keys() {
        if !source.contains_key(key) {
            out.push(Difference::new(
                coll,
                DifferenceKind::MissingField {
                    id: id.clone(),
                    path: join_path(parent, key),
                    missing_on: Side::Source,
                },
            ));
        }
    }
}

/// Compare two versions of one document, field by field and recursively.
///
/// # Example
/// ```
/// use bson::doc;
/// use mongo_mirror::mirror::validate::{compare_documents, DifferenceKind, Side};
///
/// let diffs = compare_documents("users", &doc! {"_id": 1, "a": 1}, &doc! {"_id": 1});
/// assert_eq!(diffs.len(), 1);
/// assert!(matches!(
///     &diffs[0].kind,
///     DifferenceKind::MissingField { path, missing_on: Side::Target, .. } if path == "a"
/// ));
/// ```
pub fn compare_documents(coll: &str, source: &Document, target: &Document) -> Vec<Difference> {
    let id = source.get(ID_KEY).cloned().unwrap_or(Bson::Null);
    let mut out = vec![];
    compare_fields(coll, &id, "", source, target, &mut out);
    out
}

/// Compare two document sets of `coll`, target documents are matched by `_id`.
pub fn compare_collections(
    coll: &str,
    source_docs: &[Document],
    target_docs: &[Document],
) -> Result<Vec<Difference>> {
    let mut target_by_id = HashMap::with_capacity(target_docs.len());
    for doc in target_docs {
        let id = doc.get(ID_KEY).unwrap_or(&Bson::Null);
        target_by_id.insert(id_key(id)?, doc);
    }

    let mut differences = vec![];
    for doc in source_docs {
        let id = doc.get(ID_KEY).unwrap_or(&Bson::Null);
        match target_by_id.get(&id_key(id)?) {
            Some(target_doc) => differences.extend(compare_documents(coll, doc, target_doc)),
            None => differences.push(Difference::new(
                coll,
                DifferenceKind::MissingDocument { id: id.clone() },
            )),
        }
    }
    Ok(differences)
}

/// Compare index sets of `coll`, both directions.
pub fn compare_indexes(
    coll: &str,
    source_indexes: Vec<IndexDescriptor>,
    target_indexes: Vec<IndexDescriptor>,
) -> Vec<Difference> {
    let mut target_by_name: HashMap<String, IndexDescriptor> = target_indexes
        .into_iter()
        .map(|index| (index.name.clone(), index))
        .collect();

    let mut differences = vec![];
    for index in source_indexes {
        let target = target_by_name.remove(&index.name);
        let same = matches!(&target, Some(t) if t.same_definition(&index));
        if !same {
            differences.push(Difference::new(
                coll,
                DifferenceKind::IndexMismatch {
                    name: index.name.clone(),
                    source: Some(index),
                    target,
                },
            ));
        }
    }

    let mut target_only: Vec<IndexDescriptor> = target_by_name.into_values().collect();
    target_only.sort_by(|a, b| a.name.cmp(&b.name));
    for index in target_only {
        differences.push(Difference::new(
            coll,
            DifferenceKind::IndexMismatch {
                name: index.name.clone(),
                source: None,
                target: Some(index),
            },
        ));
    }
    differences
}

fn fetch_documents(store: &dyn DocumentStore, coll: &str) -> Result<Vec<Document>> {
    let docs = store.scan(coll)?.collect::<Result<Vec<_>>>()?;
    info!(store = store.label(), %coll, fetched = docs.len(), "Documents fetched.");
    Ok(docs)
}

/// Runs validation passes between two stores.
pub struct Validator<'a> {
    source: &'a dyn DocumentStore,
    target: &'a dyn DocumentStore,
    unique_field: String,
}

impl<'a> Validator<'a> {
    /// create a validator, duplicates are searched on `unique_field`.
    pub fn new(
        source: &'a dyn DocumentStore,
        target: &'a dyn DocumentStore,
        unique_field: &str,
    ) -> Self {
        Validator {
            source,
            target,
            unique_field: unique_field.to_string(),
        }
    }

    /// Validate every ordinary collection present on both stores, in name order.
    ///
    /// A collection which can't be read is logged and left out, the others go on.
    pub fn validate_all(&self) -> Result<Vec<Difference>> {
        let source_colls: BTreeSet<String> = self
            .source
            .list_collection_names(Some(CollectionKind::Collection))?
            .into_iter()
            .collect();
        let target_colls: BTreeSet<String> = self
            .target
            .list_collection_names(Some(CollectionKind::Collection))?
            .into_iter()
            .collect();
        let common: Vec<&String> = source_colls.intersection(&target_colls).collect();
        if common.is_empty() {
            warn!("No common collections found between source and target.");
            return Ok(vec![]);
        }

        let mut differences = vec![];
        for coll in common {
            match self.validate_collection(coll) {
                Ok(found) => differences.extend(found),
                Err(e) => error!(%coll, ?e, "Failed to validate collection."),
            }
        }
        Ok(differences)
    }

    /// Validate one collection.
    ///
    /// A count mismatch is reported alone, documents and duplicates aren't checked then.
    pub fn validate_collection(&self, coll: &str) -> Result<Vec<Difference>> {
        info!(%coll, "Comparing collection.");
        let source_count = self.source.count_documents(coll, doc! {})?;
        let target_count = self.target.count_documents(coll, doc! {})?;
        if source_count != target_count {
            warn!(%coll, source_count, target_count, "Document counts differ, skip comparing documents.");
            return Ok(vec![Difference::new(
                coll,
                DifferenceKind::CountMismatch {
                    source: source_count,
                    target: target_count,
                },
            )]);
        }

        let mut differences = compare_indexes(
            coll,
            self.source.list_indexes(coll)?,
            self.target.list_indexes(coll)?,
        );

        let source_docs = fetch_documents(self.source, coll)?;
        let target_docs = fetch_documents(self.target, coll)?;
        differences.extend(compare_collections(coll, &source_docs, &target_docs)?);

        for (side, store) in [(Side::Source, self.source), (Side::Target, self.target)] {
            let groups = store.find_duplicates(coll, &self.unique_field)?;
            if groups.is_empty() {
                info!(%coll, %side, field = %self.unique_field, "No duplicates found.");
            }
            for group in groups {
                differences.push(Difference::new(
                    coll,
                    DifferenceKind::Duplicate {
                        side,
                        field: self.unique_field.clone(),
                        value: group.value,
                        count: group.count,
                    },
                ));
            }
        }

        if differences.is_empty() {
            info!(%coll, "No differences found.");
        } else {
            info!(%coll, total = differences.len(), "Differences found.");
        }
        Ok(differences)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MemoryStore;

    #[test]
    fn test_symmetric_missing_field() {
        let diffs = compare_documents("c", &doc! {"_id": 1}, &doc! {"_id": 1, "extra": 2});
        assert_eq!(
            diffs,
            vec![Difference::new(
                "c",
                DifferenceKind::MissingField {
                    id: Bson::Int32(1),
                    path: "extra".to_string(),
                    missing_on: Side::Source,
                }
            )]
        );
    }

    #[test]
    fn test_null_and_nan_are_equal() {
        let source = doc! {"_id": 1, "a": Bson::Null, "b": {"c": f64::NAN}, "d": [Bson::Null]};
        let target = doc! {"_id": 1, "a": f64::NAN, "b": {"c": Bson::Null}, "d": [f64::NAN]};
        assert!(compare_documents("c", &source, &target).is_empty());

        let diffs = compare_documents("c", &doc! {"_id": 1, "a": Bson::Null}, &doc! {"_id": 1, "a": 0});
        assert_eq!(diffs.len(), 1);
    }

    #[test]
    fn test_nested_paths() {
        let source = doc! {"_id": 1, "a": {"b": [1, {"c": "x"}], "d": [1, 2]}};
        let target = doc! {"_id": 1, "a": {"b": [1, {"c": "y"}], "d": [1]}};
        let diffs = compare_documents("c", &source, &target);
        assert_eq!(
            diffs,
            vec![
                Difference::new(
                    "c",
                    DifferenceKind::ValueMismatch {
                        id: Bson::Int32(1),
                        path: "a.b.1.c".to_string(),
                        source: Bson::String("x".to_string()),
                        target: Bson::String("y".to_string()),
                    }
                ),
                Difference::new(
                    "c",
                    DifferenceKind::ArrayLength {
                        id: Bson::Int32(1),
                        path: "a.d".to_string(),
                        source: 2,
                        target: 1,
                    }
                ),
            ]
        );
    }

    #[test]
    fn test_numeric_types_compare_by_value() {
        let diffs = compare_documents(
            "c",
            &doc! {"_id": 1, "a": 1, "b": 2.5},
            &doc! {"_id": 1, "a": 1i64, "b": 2.5},
        );
        assert!(diffs.is_empty());
        let diffs = compare_documents("c", &doc! {"_id": 1, "a": 1}, &doc! {"_id": 1, "a": 1.5});
        assert_eq!(diffs.len(), 1);
    }

    #[test]
    fn test_compare_collections_missing_document() {
        let diffs = compare_collections(
            "c",
            &[doc! {"_id": 1}, doc! {"_id": 2}],
            &[doc! {"_id": 2}, doc! {"_id": 3}],
        )
        .unwrap();
        assert_eq!(
            diffs,
            vec![Difference::new(
                "c",
                DifferenceKind::MissingDocument { id: Bson::Int32(1) }
            )]
        );
    }

    #[test]
    fn test_compare_indexes_both_directions() {
        let source = vec![
            IndexDescriptor::new("_id_", doc! {"_id": 1}, doc! {"v": 2}),
            IndexDescriptor::new("a_1", doc! {"a": 1}, doc! {"v": 2}),
        ];
        let target = vec![
            IndexDescriptor::new("_id_", doc! {"_id": 1}, doc! {"v": 2, "ns": "db.c"}),
            IndexDescriptor::new("b_1", doc! {"b": 1}, doc! {"v": 2}),
        ];
        let names: Vec<(String, bool, bool)> = compare_indexes("c", source, target)
            .into_iter()
            .map(|d| match d.kind {
                DifferenceKind::IndexMismatch { name, source, target } => {
                    (name, source.is_some(), target.is_some())
                }
                other => panic!("unexpected difference {:?}", other),
            })
            .collect();
        assert_eq!(
            names,
            vec![("a_1".to_string(), true, false), ("b_1".to_string(), false, true)]
        );
    }

    #[test]
    fn test_count_mismatch_skips_documents() {
        let source = MemoryStore::new();
        let target = MemoryStore::new();
        source
            .insert_many("c", &[doc! {"_id": 1}, doc! {"_id": 2}])
            .unwrap();
        target.insert_many("c", &[doc! {"_id": 1, "x": 1}]).unwrap();

        let diffs = Validator::new(&source, &target, "_id")
            .validate_collection("c")
            .unwrap();
        assert_eq!(
            diffs,
            vec![Difference::new(
                "c",
                DifferenceKind::CountMismatch { source: 2, target: 1 }
            )]
        );
    }

    #[test]
    fn test_duplicate_values_reported() {
        let source = MemoryStore::new();
        let target = MemoryStore::new();
        let docs = vec![
            doc! {"_id": 1, "code": "A"},
            doc! {"_id": 2, "code": "A"},
            doc! {"_id": 3, "code": "A"},
            doc! {"_id": 4, "code": "B"},
        ];
        source.insert_many("c", &docs).unwrap();
        target.insert_many("c", &docs).unwrap();

        let diffs = Validator::new(&source, &target, "code")
            .validate_collection("c")
            .unwrap();
        assert_eq!(diffs.len(), 2);
        for (diff, side) in diffs.iter().zip([Side::Source, Side::Target]) {
            assert_eq!(
                diff.kind,
                DifferenceKind::Duplicate {
                    side,
                    field: "code".to_string(),
                    value: Bson::String("A".to_string()),
                    count: 3,
                }
            );
        }
    }

    #[test]
    fn test_display() {
        let diff = Difference::new(
            "users",
            DifferenceKind::MissingField {
                id: Bson::Int32(7),
                path: "a.b".to_string(),
                missing_on: Side::Target,
            },
        );
        assert_eq!(
            diff.to_string(),
            "collection 'users': document with _id=7: field 'a.b' is missing in target"
        );
    }
}
