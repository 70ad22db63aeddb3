// Path walking over nested JSON objects and arrays
//
// Paths are `/`-separated; empty segments are skipped. Walking for a write
// creates missing object levels, never arrays.

use serde_json::{Map, Value};

use super::StoreError;

/// Split a path into its non-empty segments
pub fn split_path(path: &str) -> Vec<&str> {
    path.split('/').filter(|s| !s.is_empty()).collect()
}

/// Parse an array index segment; `None` if it is not an integer
pub(crate) fn parse_index(segment: &str) -> Option<i64> {
    segment.parse::<i64>().ok()
}

/// Human readable JSON type name for error messages
pub(crate) fn type_name(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Walk down `root` along `path` and return the node reached.
///
/// Missing (or null) object keys are filled with empty objects on the way.
/// Array levels require an in-range integer index.
pub fn walk_tree<'a>(root: &'a mut Value, path: &[&str]) -> Result<&'a mut Value, StoreError> {
    let mut node = root;
    for seg in path.iter().filter(|s| !s.is_empty()) {
        node = match node {
            Value::Array(items) => {
                let len = items.len();
                let ix = parse_index(seg).ok_or_else(|| {
                    StoreError::Path(format!(
                        "Array index '{seg}' in '{}' is not an int",
                        path.join("/")
                    ))
                })?;
                if ix < 0 || ix as usize >= len {
                    return Err(StoreError::Path(format!(
                        "Array index '{seg}' in '{}' > {len}",
                        path.join("/")
                    )));
                }
                &mut items[ix as usize]
            }
            Value::Object(map) => {
                let child = map
                    .entry(seg.to_string())
                    .or_insert_with(|| Value::Object(Map::new()));
                if child.is_null() {
                    *child = Value::Object(Map::new());
                }
                child
            }
            other => {
                return Err(StoreError::Path(format!(
                    "Level '{seg}' of '{}' is not traversable: {}",
                    path.join("/"),
                    type_name(other)
                )))
            }
        };
    }
    Ok(node)
}

/// Read-only counterpart of [`walk_tree`]: never creates anything.
///
/// Returns `Ok(None)` when an object level is missing, errors on the same
/// malformed paths the write walk rejects.
pub fn lookup<'a>(root: &'a Value, path: &[&str]) -> Result<Option<&'a Value>, StoreError> {
    let mut node = root;
    for seg in path.iter().filter(|s| !s.is_empty()) {
        node = match node {
            Value::Array(items) => {
                let ix = parse_index(seg).ok_or_else(|| {
                    StoreError::Path(format!(
                        "Array index '{seg}' in '{}' is not an int",
                        path.join("/")
                    ))
                })?;
                match usize::try_from(ix).ok().and_then(|ix| items.get(ix)) {
                    Some(v) => v,
                    None => return Ok(None),
                }
            }
            Value::Object(map) => match map.get(*seg) {
                Some(v) => v,
                None => return Ok(None),
            },
            Value::Null => return Ok(None),
            other => {
                return Err(StoreError::Path(format!(
                    "Level '{seg}' of '{}' is not traversable: {}",
                    path.join("/"),
                    type_name(other)
                )))
            }
        };
    }
    Ok(Some(node))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_split_path_skips_empty_segments() {
        assert_eq!(split_path("/a//b/"), vec!["a", "b"]);
        assert!(split_path("///").is_empty());
    }

    #[test]
    fn test_walk_creates_object_levels() {
        let mut root = json!({});
        let node = walk_tree(&mut root, &["a", "", "b"]).unwrap();
        assert_eq!(node, &json!({}));
        assert_eq!(root, json!({"a": {"b": {}}}));
    }

    #[test]
    fn test_walk_replaces_null_level() {
        let mut root = json!({"a": null});
        walk_tree(&mut root, &["a", "b"]).unwrap();
        assert_eq!(root, json!({"a": {"b": {}}}));
    }

    #[test]
    fn test_walk_array_index() {
        let mut root = json!({"a": [{"x": 1}, {"x": 2}]});
        let node = walk_tree(&mut root, &["a", "1"]).unwrap();
        assert_eq!(node["x"], 2);

        let err = walk_tree(&mut root, &["a", "2"]).unwrap_err();
        assert!(matches!(err, StoreError::Path(_)));
        let err = walk_tree(&mut root, &["a", "-1"]).unwrap_err();
        assert!(matches!(err, StoreError::Path(_)));
        let err = walk_tree(&mut root, &["a", "x"]).unwrap_err();
        assert!(err.to_string().contains("is not an int"));
    }

    #[test]
    fn test_walk_through_scalar_fails() {
        let mut root = json!({"a": 5});
        let err = walk_tree(&mut root, &["a", "b"]).unwrap_err();
        assert!(err.to_string().contains("not traversable"));
    }

    #[test]
    fn test_lookup_has_no_side_effects() {
        let root = json!({"a": {"b": [1, 2]}});
        assert_eq!(lookup(&root, &["a", "b", "1"]).unwrap(), Some(&json!(2)));
        assert_eq!(lookup(&root, &["a", "b", "7"]).unwrap(), None);
        assert_eq!(lookup(&root, &["x", "y"]).unwrap(), None);
        assert!(lookup(&root, &["a", "b", "q"]).is_err());
        assert_eq!(root, json!({"a": {"b": [1, 2]}}));
    }
}
