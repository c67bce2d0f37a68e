//! Path-based access to schema-less documents.
//!
//! Templates and the children rendered from them are [`DynamicObject`]s:
//! typed metadata plus an opaque `data` value. Everything below `spec` is
//! only ever touched through the helpers here, which centralize the
//! malformed-document error kind.

use k8s_openapi::api::core::v1::ObjectReference;
use kube::ResourceExt;
use kube::api::DynamicObject;
use serde_json::{Map, Value};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DocumentError {
    #[error("expected a mapping at {path:?}")]
    NotAMapping { path: String },

    #[error("missing or incomplete object reference at {path:?}")]
    InvalidReference { path: String },

    #[error("object {name:?} carries no type information")]
    MissingTypes { name: String },
}

fn join(path: &[&str]) -> String {
    path.join(".")
}

/// Follows a path of mapping keys. Missing keys (at any depth) yield
/// `Ok(None)`; a non-mapping value where a mapping is expected is an error.
pub fn get_nested<'a>(doc: &'a Value, path: &[&str]) -> Result<Option<&'a Value>, DocumentError> {
    let mut current = doc;
    for (depth, key) in path.iter().enumerate() {
        let map = current.as_object().ok_or_else(|| DocumentError::NotAMapping {
            path: join(&path[..depth]),
        })?;
        match map.get(*key) {
            Some(value) => current = value,
            None => return Ok(None),
        }
    }
    Ok(Some(current))
}

/// Sets a value under a path of mapping keys, creating intermediate mappings
/// as needed. Fails if an intermediate value exists and is not a mapping.
pub fn set_nested(doc: &mut Value, value: Value, path: &[&str]) -> Result<(), DocumentError> {
    let (last, parents) = path.split_last().expect("set_nested requires a non-empty path");
    let mut current = doc;
    for (depth, key) in parents.iter().enumerate() {
        let map = current
            .as_object_mut()
            .ok_or_else(|| DocumentError::NotAMapping {
                path: join(&path[..depth]),
            })?;
        current = map
            .entry(key.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
    }
    let map = current
        .as_object_mut()
        .ok_or_else(|| DocumentError::NotAMapping {
            path: join(parents),
        })?;
    map.insert(last.to_string(), value);
    Ok(())
}

/// Reads a structured object reference from a path. All four fields must be
/// present strings.
pub fn get_nested_ref(doc: &Value, path: &[&str]) -> Result<ObjectReference, DocumentError> {
    let invalid = || DocumentError::InvalidReference { path: join(path) };
    let value = get_nested(doc, path)?.ok_or_else(invalid)?;

    let field = |key: &str| -> Result<String, DocumentError> {
        value
            .get(key)
            .and_then(Value::as_str)
            .map(str::to_owned)
            .ok_or_else(invalid)
    };

    Ok(ObjectReference {
        api_version: Some(field("apiVersion")?),
        kind: Some(field("kind")?),
        namespace: Some(field("namespace")?),
        name: Some(field("name")?),
        ..Default::default()
    })
}

/// Writes a structured object reference under a path.
pub fn set_nested_ref(
    doc: &mut Value,
    reference: &ObjectReference,
    path: &[&str],
) -> Result<(), DocumentError> {
    let value = serde_json::json!({
        "apiVersion": reference.api_version.clone().unwrap_or_default(),
        "kind": reference.kind.clone().unwrap_or_default(),
        "namespace": reference.namespace.clone().unwrap_or_default(),
        "name": reference.name.clone().unwrap_or_default(),
    });
    set_nested(doc, value, path)
}

/// Builds the reference identifying an untyped document.
pub fn object_reference(obj: &DynamicObject) -> Result<ObjectReference, DocumentError> {
    let types = obj.types.as_ref().ok_or_else(|| DocumentError::MissingTypes {
        name: obj.name_any(),
    })?;
    Ok(ObjectReference {
        api_version: Some(types.api_version.clone()),
        kind: Some(types.kind.clone()),
        namespace: obj.namespace(),
        name: Some(obj.name_any()),
        ..Default::default()
    })
}

/// True when every field asserted by `desired` is already present with the
/// same value in `actual`. Mappings recurse; anything else compares equal.
pub fn is_subset(desired: &Value, actual: &Value) -> bool {
    match (desired, actual) {
        (Value::Object(desired), Value::Object(actual)) => desired
            .iter()
            .all(|(key, value)| actual.get(key).is_some_and(|other| is_subset(value, other))),
        _ => desired == actual,
    }
}
