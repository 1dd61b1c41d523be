//! Dotted-path access into nested JSON values
//!
//! `"colors.primary"` addresses `value["colors"]["primary"]`. Array elements
//! are addressed by decimal index (`"items.0.title"`). An empty path or a
//! single segment is a plain key lookup.
//!
//! Lookups never fail: a missing segment or a scalar in the middle of the
//! path resolves to the caller's default.

use serde_json::{Map, Value};

/// Split a dotted path into its segments.
///
/// An empty path is a single empty segment so that `""` is looked up as a key.
pub fn segments(path: &str) -> impl Iterator<Item = &str> {
    path.split('.')
}

fn step<'a>(value: &'a Value, segment: &str) -> Option<&'a Value> {
    match value {
        Value::Object(map) => map.get(segment),
        Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    }
}

/// Borrow the value at `path`, if every segment exists.
pub fn get_path_ref<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    get_segments(value, segments(path))
}

/// Like [`get_path_ref`], for segments that may themselves contain dots.
pub fn get_segments<'a, 's, I>(value: &'a Value, segments: I) -> Option<&'a Value>
where
    I: IntoIterator<Item = &'s str>,
{
    segments.into_iter().try_fold(value, step)
}

/// Get a clone of the value at `path`, or `default` when any segment is missing.
///
/// # Example
///
/// ```
/// use serde_json::json;
/// use zukit_store_core::path::get_path;
///
/// let options = json!({ "colors": { "primary": "#fff" } });
/// assert_eq!(get_path(&options, "colors.primary", json!(null)), json!("#fff"));
/// assert_eq!(get_path(&options, "colors.accent", json!("red")), json!("red"));
/// assert_eq!(get_path(&options, "colors.primary.deep", json!(0)), json!(0));
/// ```
pub fn get_path(value: &Value, path: &str, default: Value) -> Value {
    get_path_ref(value, path).cloned().unwrap_or(default)
}

/// Whether every segment of `path` exists.
pub fn has_path(value: &Value, path: &str) -> bool {
    get_path_ref(value, path).is_some()
}

/// Set `new` at `path`, creating intermediate objects as needed.
///
/// Scalars (and `null`) found on the way are replaced by empty objects.
/// Array segments are followed when the index exists; otherwise the array
/// is left alone and replaced by an object as well.
///
/// Returns a mutable reference to the stored value.
pub fn set_path<'a>(value: &'a mut Value, path: &str, new: Value) -> &'a mut Value {
    set_segments(value, segments(path), new)
}

/// Like [`set_path`], for segments that may themselves contain dots.
pub fn set_segments<'a, 's, I>(value: &'a mut Value, segments: I, new: Value) -> &'a mut Value
where
    I: IntoIterator<Item = &'s str>,
{
    let mut current = value;
    for segment in segments {
        current = child_mut(current, segment);
    }
    *current = new;
    current
}

fn child_mut<'a>(value: &'a mut Value, segment: &str) -> &'a mut Value {
    let index = match &*value {
        Value::Array(items) => segment.parse::<usize>().ok().filter(|i| *i < items.len()),
        _ => None,
    };
    match index {
        Some(i) => &mut value[i],
        None => {
            if !value.is_object() {
                *value = Value::Object(Map::new());
            }
            // indexing an object by key inserts `null` for a missing entry
            &mut value[segment]
        }
    }
}

/// Remove the value at `path`, returning it.
///
/// The parent containers are left in place, even if they become empty.
pub fn delete_path(value: &mut Value, path: &str) -> Option<Value> {
    let (parent, leaf) = match path.rsplit_once('.') {
        Some((parent, leaf)) => (get_path_mut(value, parent)?, leaf),
        None => (value, path),
    };
    match parent {
        Value::Object(map) => map.remove(leaf),
        Value::Array(items) => {
            let i = leaf.parse::<usize>().ok().filter(|i| *i < items.len())?;
            Some(items.remove(i))
        }
        _ => None,
    }
}

fn get_path_mut<'a>(value: &'a mut Value, path: &str) -> Option<&'a mut Value> {
    segments(path).try_fold(value, |current, segment| match current {
        Value::Object(map) => map.get_mut(segment),
        Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get_mut(i)),
        _ => None,
    })
}

/// Whether `prefix` names `path` itself or one of its ancestors.
///
/// Comparison is per segment, so `"color"` is not a prefix of `"colors.primary"`.
pub fn is_path_prefix(prefix: &str, path: &str) -> bool {
    path == prefix
        || path
            .strip_prefix(prefix)
            .is_some_and(|rest| rest.starts_with('.'))
}
