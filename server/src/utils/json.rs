//! JSON utility functions

use serde_json::{Map, Value as JsonValue};

/// Converts a JsonValue to Option<String>, returning None for null values.
///
/// Keeps `JsonValue::Null` out of VARCHAR columns as the literal text `"null"`.
pub fn json_to_opt_string(value: &JsonValue) -> Option<String> {
    if value.is_null() {
        None
    } else {
        serde_json::to_string(value).ok()
    }
}

/// Parse a stored JSON dump, mapping NULL or unparseable text to `Null`.
pub fn parse_json_dump(dump: Option<&str>) -> JsonValue {
    match dump {
        Some(s) => serde_json::from_str(s).unwrap_or_else(|e| {
            tracing::warn!(error = %e, "Stored JSON dump is not valid JSON");
            JsonValue::Null
        }),
        None => JsonValue::Null,
    }
}

/// Rebuild a value with object keys sorted at every level.
pub fn canonicalize(value: &JsonValue) -> JsonValue {
    match value {
        JsonValue::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let mut sorted = Map::with_capacity(map.len());
            for key in keys {
                sorted.insert(key.clone(), canonicalize(&map[key]));
            }
            JsonValue::Object(sorted)
        }
        JsonValue::Array(items) => JsonValue::Array(items.iter().map(canonicalize).collect()),
        other => other.clone(),
    }
}

/// Compact JSON text with sorted keys; identical content yields identical text.
pub fn canonical_json(value: &JsonValue) -> String {
    canonicalize(value).to_string()
}

/// Walk a dotted path (already split) into a JSON value.
pub fn get_path<'a>(value: &'a JsonValue, path: &[&str]) -> Option<&'a JsonValue> {
    path.iter().try_fold(value, |current, segment| match current {
        JsonValue::Object(map) => map.get(*segment),
        JsonValue::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    })
}

/// Total order over JSON values used for in-memory sorting.
///
/// null < bool < number < string < array < object; containers compare by
/// their serialized text.
pub fn compare_json(a: &JsonValue, b: &JsonValue) -> std::cmp::Ordering {
    use std::cmp::Ordering;

    fn rank(v: &JsonValue) -> u8 {
        match v {
            JsonValue::Null => 0,
            JsonValue::Bool(_) => 1,
            JsonValue::Number(_) => 2,
            JsonValue::String(_) => 3,
            JsonValue::Array(_) => 4,
            JsonValue::Object(_) => 5,
        }
    }

    match (a, b) {
        (JsonValue::Bool(x), JsonValue::Bool(y)) => x.cmp(y),
        (JsonValue::Number(x), JsonValue::Number(y)) => {
            let (x, y) = (x.as_f64().unwrap_or(0.0), y.as_f64().unwrap_or(0.0));
            x.partial_cmp(&y).unwrap_or(Ordering::Equal)
        }
        (JsonValue::String(x), JsonValue::String(y)) => x.cmp(y),
        (JsonValue::Array(_), JsonValue::Array(_))
        | (JsonValue::Object(_), JsonValue::Object(_)) => a.to_string().cmp(&b.to_string()),
        _ => rank(a).cmp(&rank(b)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::cmp::Ordering;

    #[test]
    fn test_null_returns_none() {
        assert_eq!(json_to_opt_string(&JsonValue::Null), None);
        assert_eq!(json_to_opt_string(&json!({"a": 1})), Some(r#"{"a":1}"#.into()));
    }

    #[test]
    fn test_canonical_json_sorts_nested_keys() {
        let a = json!({"b": 1, "a": {"y": [1, {"d": 1, "c": 2}], "x": null}});
        let b = json!({"a": {"x": null, "y": [1, {"c": 2, "d": 1}]}, "b": 1});
        assert_eq!(canonical_json(&a), canonical_json(&b));
        assert_eq!(
            canonical_json(&a),
            r#"{"a":{"x":null,"y":[1,{"c":2,"d":1}]},"b":1}"#
        );
    }

    #[test]
    fn test_array_order_is_significant() {
        assert_ne!(canonical_json(&json!([1, 2])), canonical_json(&json!([2, 1])));
    }

    #[test]
    fn test_parse_json_dump() {
        assert_eq!(parse_json_dump(None), JsonValue::Null);
        assert_eq!(parse_json_dump(Some("{\"k\":1}")), json!({"k": 1}));
        assert_eq!(parse_json_dump(Some("not json")), JsonValue::Null);
    }

    #[test]
    fn test_get_path() {
        let v = json!({"a": {"b": [10, {"c": "x"}]}});
        assert_eq!(get_path(&v, &["a", "b", "1", "c"]), Some(&json!("x")));
        assert_eq!(get_path(&v, &["a", "missing"]), None);
        assert_eq!(get_path(&v, &[]), Some(&v));
    }

    #[test]
    fn test_compare_json() {
        assert_eq!(compare_json(&json!(null), &json!(false)), Ordering::Less);
        assert_eq!(compare_json(&json!(2), &json!(10)), Ordering::Less);
        assert_eq!(compare_json(&json!("b"), &json!("a")), Ordering::Greater);
        assert_eq!(compare_json(&json!(1), &json!("1")), Ordering::Less);
    }
}
