//! Typed accessors over the raw manifest document tree.
//!
//! Manifests are kept as `serde_yaml` values so that keys this crate does not
//! know about survive unchanged into the serialized build descriptor. These
//! helpers enforce the expected shape of the keys we do touch.

use serde_yaml::{Mapping, Sequence, Value};

use crate::{Error, Result};

/// Human readable name of a value's variant, for error messages.
pub fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Sequence(_) => "sequence",
        Value::Mapping(_) => "mapping",
        Value::Tagged(_) => "tagged value",
    }
}

pub(crate) fn type_error(key: &str, expected: &'static str, found: &Value) -> Error {
    Error::Type {
        key: key.to_string(),
        expected,
        found: type_name(found),
    }
}

/// Return the sequence stored under `key`, inserting an empty one if the key
/// is missing. Repeated calls return the same sequence.
pub fn ensure_list<'a>(map: &'a mut Mapping, key: &str) -> Result<&'a mut Sequence> {
    let value = map
        .entry(Value::from(key))
        .or_insert_with(|| Value::Sequence(Sequence::new()));

    match value {
        Value::Sequence(seq) => Ok(seq),
        other => Err(type_error(key, "sequence", other)),
    }
}

/// Return the string stored under `key`.
///
/// A missing key yields `default`, or a validation error when there is no
/// default. A value of another type is a type error.
pub fn ensure_string<'a>(map: &'a Mapping, key: &str, default: Option<&'a str>) -> Result<&'a str> {
    match map.get(key) {
        Some(Value::String(s)) => Ok(s.as_str()),
        Some(other) => Err(type_error(key, "string", other)),
        None => default.ok_or_else(|| Error::Validation(format!("missing required field {key:?}"))),
    }
}

/// Return the items stored under `key` as strings.
///
/// A missing key yields an empty list.
pub fn string_list(map: &Mapping, key: &str) -> Result<Vec<String>> {
    match map.get(key) {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(Value::Sequence(items)) => items
            .iter()
            .map(|item| match item {
                Value::String(s) => Ok(s.clone()),
                other => Err(type_error(key, "string", other)),
            })
            .collect(),
        Some(other) => Err(type_error(key, "sequence", other)),
    }
}

/// Check that `key` is missing or holds a sequence.
pub fn check_list(map: &Mapping, key: &str) -> Result<()> {
    match map.get(key) {
        None | Some(Value::Sequence(_)) => Ok(()),
        Some(other) => Err(type_error(key, "sequence", other)),
    }
}

/// Render a scalar without coercing its type, for display purposes.
pub fn display_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Null => "None".to_string(),
        other => serde_json::to_string(other).unwrap_or_else(|_| type_name(other).to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mapping(yaml: &str) -> Mapping {
        serde_yaml::from_str(yaml).unwrap()
    }

    #[test]
    fn test_ensure_list_missing_key() {
        let mut map = Mapping::new();
        assert!(ensure_list(&mut map, "name").unwrap().is_empty());
        ensure_list(&mut map, "name").unwrap().push(Value::from("value"));

        assert_eq!(map.get("name"), Some(&Value::Sequence(vec![Value::from("value")])));
    }

    #[test]
    fn test_ensure_list_existing() {
        let mut map = mapping("name: [value]");
        let list = ensure_list(&mut map, "name").unwrap();
        assert_eq!(list, &vec![Value::from("value")]);
    }

    #[test]
    fn test_ensure_list_type_error() {
        let mut map = mapping("name: value");
        let err = ensure_list(&mut map, "name").unwrap_err();
        assert!(matches!(err, Error::Type { expected: "sequence", found: "string", .. }));
    }

    #[test]
    fn test_ensure_string() {
        let map = mapping("id: eu.tiliado.App\nbranch: 6");
        assert_eq!(ensure_string(&map, "id", None).unwrap(), "eu.tiliado.App");
        assert_eq!(ensure_string(&map, "missing", Some("master")).unwrap(), "master");
        assert!(matches!(ensure_string(&map, "missing", None), Err(Error::Validation(_))));
        assert!(matches!(ensure_string(&map, "branch", None), Err(Error::Type { .. })));
    }

    #[test]
    fn test_string_list() {
        let map = mapping("stage: ['/app/include/*', '/app/lib/*.a']\nkeep: 3\nnone: ~");
        assert_eq!(
            string_list(&map, "stage").unwrap(),
            vec!["/app/include/*", "/app/lib/*.a"]
        );
        assert!(string_list(&map, "missing").unwrap().is_empty());
        assert!(string_list(&map, "none").unwrap().is_empty());
        assert!(matches!(string_list(&map, "keep"), Err(Error::Type { .. })));
        assert!(string_list(&mapping("stage: [1]"), "stage").is_err());
    }

    #[test]
    fn test_check_list() {
        let map = mapping("sources: []\npost-install: echo");
        assert!(check_list(&map, "sources").is_ok());
        assert!(check_list(&map, "missing").is_ok());
        assert!(matches!(check_list(&map, "post-install"), Err(Error::Type { .. })));
    }

    #[test]
    fn test_display_value_keeps_type() {
        assert_eq!(display_value(&Value::from(3)), "3");
        assert_eq!(display_value(&Value::from("stable")), "stable");
        assert_eq!(display_value(&Value::Null), "None");
    }
}
