use crate::Result;
use bson::{doc, Bson, Document};

/// Returns true when `value` is null or a NaN double.
pub fn is_null_or_nan(value: &Bson) -> bool {
    match value {
        Bson::Null | Bson::Undefined => true,
        Bson::Double(f) => f.is_nan(),
        _ => false,
    }
}

/// Encode an identifier into bytes usable as a lookup key.
///
/// Numbers of equal value map to the same key whatever their bson type, the way a unique
/// index or `$group` treats `1`, `NumberLong(1)` and `1.0`.  Other values map to the same
/// key only if they are the same bson value.
pub fn id_key(id: &Bson) -> Result<Vec<u8>> {
    let mut buf = vec![];
    doc! { "k": canonical_number(id) }.to_writer(&mut buf)?;
    Ok(buf)
}

// integral numbers become int64, recursing into documents and arrays.
fn canonical_number(value: &Bson) -> Bson {
    match value {
        Bson::Int32(v) => Bson::Int64(*v as i64),
        Bson::Double(v) if v.fract() == 0.0 && v.abs() < i64::MAX as f64 => {
            Bson::Int64(*v as i64)
        }
        Bson::Array(items) => Bson::Array(items.iter().map(canonical_number).collect()),
        Bson::Document(d) => Bson::Document(
            d.iter()
                .map(|(k, v)| (k.clone(), canonical_number(v)))
                .collect(),
        ),
        other => other.clone(),
    }
}

/// Compare two scalars, numeric types compare by value.
pub fn scalar_eq(left: &Bson, right: &Bson) -> bool {
    if let (Some(l), Some(r)) = (as_int(left), as_int(right)) {
        return l == r;
    }
    match (as_f64(left), as_f64(right)) {
        (Some(l), Some(r)) => l == r,
        _ => left == right,
    }
}

fn as_int(value: &Bson) -> Option<i64> {
    match value {
        Bson::Int32(v) => Some(*v as i64),
        Bson::Int64(v) => Some(*v),
        _ => None,
    }
}

fn as_f64(value: &Bson) -> Option<f64> {
    match value {
        Bson::Int32(v) => Some(*v as f64),
        Bson::Int64(v) => Some(*v as f64),
        Bson::Double(v) => Some(*v),
        _ => None,
    }
}

/// Read an integer out of a bson value which may be int32, int64 or double.
pub fn as_i64(value: &Bson) -> Option<i64> {
    match value {
        Bson::Int32(v) => Some(*v as i64),
        Bson::Int64(v) => Some(*v),
        Bson::Double(v) if v.fract() == 0.0 => Some(*v as i64),
        _ => None,
    }
}

/// Get value at dotted `path` in `doc`, numeric segments index into arrays.
pub fn get_path<'a>(doc: &'a Document, path: &str) -> Option<&'a Bson> {
    let mut segments = path.split('.');
    let mut current = doc.get(segments.next()?)?;
    for seg in segments {
        current = match current {
            Bson::Document(d) => d.get(seg)?,
            Bson::Array(arr) => arr.get(seg.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}

/// Set value at dotted `path`, creating intermediate documents when they are missing.
///
/// Returns false if the path goes through a scalar.
pub fn set_path(doc: &mut Document, path: &str, value: Bson) -> bool {
    match path.split_once('.') {
        None => {
            doc.insert(path, value);
            true
        }
        Some((head, rest)) => {
            if !doc.contains_key(head) {
                doc.insert(head, Document::new());
            }
            match doc.get_mut(head) {
                Some(child) => set_in_bson(child, rest, value),
                None => false,
            }
        }
    }
}

fn set_in_bson(target: &mut Bson, path: &str, value: Bson) -> bool {
    match target {
        Bson::Document(d) => set_path(d, path, value),
        Bson::Array(arr) => {
            let (head, rest) = match path.split_once('.') {
                Some((h, r)) => (h, Some(r)),
                None => (path, None),
            };
            let idx = match head.parse::<usize>() {
                Ok(idx) => idx,
                Err(_) => return false,
            };
            while arr.len() <= idx {
                arr.push(Bson::Null);
            }
            match rest {
                None => {
                    arr[idx] = value;
                    true
                }
                Some(rest) => {
                    if !matches!(arr[idx], Bson::Document(_) | Bson::Array(_)) {
                        arr[idx] = Bson::Document(Document::new());
                    }
                    set_in_bson(&mut arr[idx], rest, value)
                }
            }
        }
        _ => false,
    }
}

/// Remove value at dotted `path`.  Missing paths are ignored, array slots become null.
pub fn unset_path(doc: &mut Document, path: &str) {
    match path.split_once('.') {
        None => {
            doc.remove(path);
        }
        Some((head, rest)) => {
            if let Some(child) = doc.get_mut(head) {
                unset_in_bson(child, rest);
            }
        }
    }
}

fn unset_in_bson(target: &mut Bson, path: &str) {
    match target {
        Bson::Document(d) => unset_path(d, path),
        Bson::Array(arr) => {
            let (head, rest) = match path.split_once('.') {
                Some((h, r)) => (h, Some(r)),
                None => (path, None),
            };
            if let Ok(idx) = head.parse::<usize>() {
                if let Some(slot) = arr.get_mut(idx) {
                    match rest {
                        None => *slot = Bson::Null,
                        Some(rest) => unset_in_bson(slot, rest),
                    }
                }
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_null_or_nan() {
        assert!(is_null_or_nan(&Bson::Null));
        assert!(is_null_or_nan(&Bson::Double(f64::NAN)));
        assert!(!is_null_or_nan(&Bson::Double(0.0)));
        assert!(!is_null_or_nan(&Bson::String("".to_string())));
    }

    #[test]
    fn test_id_key() {
        assert_eq!(
            id_key(&Bson::Int32(42)).unwrap(),
            id_key(&Bson::Int32(42)).unwrap()
        );
        assert_ne!(
            id_key(&Bson::Int32(42)).unwrap(),
            id_key(&Bson::String("42".to_string())).unwrap()
        );
    }

    #[test]
    fn test_id_key_merges_numeric_types() {
        let key = id_key(&Bson::Int32(1)).unwrap();
        assert_eq!(id_key(&Bson::Int64(1)).unwrap(), key);
        assert_eq!(id_key(&Bson::Double(1.0)).unwrap(), key);
        assert_ne!(id_key(&Bson::Double(1.5)).unwrap(), key);
        assert_eq!(
            id_key(&Bson::Document(doc! {"a": 1, "b": [2.0]})).unwrap(),
            id_key(&Bson::Document(doc! {"a": 1i64, "b": [2]})).unwrap()
        );
        assert_ne!(
            id_key(&Bson::Document(doc! {"a": 1, "b": 2})).unwrap(),
            id_key(&Bson::Document(doc! {"b": 2, "a": 1})).unwrap()
        );
    }

    #[test]
    fn test_scalar_eq() {
        assert!(scalar_eq(&Bson::Int32(1), &Bson::Int64(1)));
        assert!(scalar_eq(&Bson::Int32(1), &Bson::Double(1.0)));
        assert!(!scalar_eq(&Bson::Int32(1), &Bson::Int32(2)));
        assert!(!scalar_eq(&Bson::Int32(1), &Bson::String("1".to_string())));
        assert!(scalar_eq(
            &Bson::String("a".to_string()),
            &Bson::String("a".to_string())
        ));
    }

    #[test]
    fn test_set_and_unset_path() {
        let mut d = doc! {"a": {"b": 1}, "arr": [1, {"c": 2}]};
        assert!(set_path(&mut d, "a.b", Bson::Int32(5)));
        assert!(set_path(&mut d, "x.y.z", Bson::Int32(7)));
        assert!(set_path(&mut d, "arr.1.c", Bson::Int32(3)));
        assert_eq!(get_path(&d, "a.b"), Some(&Bson::Int32(5)));
        assert_eq!(get_path(&d, "x.y.z"), Some(&Bson::Int32(7)));
        assert_eq!(get_path(&d, "arr.1.c"), Some(&Bson::Int32(3)));

        unset_path(&mut d, "a.b");
        unset_path(&mut d, "not.there");
        assert_eq!(get_path(&d, "a.b"), None);
        assert_eq!(d.get_document("a").unwrap(), &doc! {});
    }

    #[test]
    fn test_set_path_through_scalar_fails() {
        let mut d = doc! {"a": 1};
        assert!(!set_path(&mut d, "a.b", Bson::Int32(2)));
        assert_eq!(d, doc! {"a": 1});
    }
}
