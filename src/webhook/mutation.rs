//! JSON Patch Synthesis
//!
//! Helpers for building the RFC 6902 patches that mutating webhooks attach to
//! their decisions. Only `add` and `replace` are produced.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Patch target for object labels
pub const LABELS_PATH: &str = "/metadata/labels";

/// Patch target for object annotations
pub const ANNOTATIONS_PATH: &str = "/metadata/annotations";

/// JSON patch operation kind
#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PatchOp {
    Add,
    Replace,
}

/// A single JSON patch step
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct PatchOperation {
    pub op: PatchOp,

    /// Slash-delimited JSON pointer into the target object
    pub path: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
}

impl PatchOperation {
    /// Create an `add` operation
    pub fn add(path: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            op: PatchOp::Add,
            path: path.into(),
            value: Some(value.into()),
        }
    }

    /// Create a `replace` operation
    pub fn replace(path: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            op: PatchOp::Replace,
            path: path.into(),
            value: Some(value.into()),
        }
    }
}

/// A JSON object with a single entry
pub fn key_value(key: &str, value: &str) -> serde_json::Map<String, Value> {
    let mut map = serde_json::Map::new();
    map.insert(key.to_string(), Value::String(value.to_string()));
    map
}

/// Escape a map key for use as a JSON pointer segment (RFC 6901)
pub fn escape_key(key: &str) -> String {
    key.replace('~', "~0").replace('/', "~1")
}

fn member_path(prefix: &str, key: &str) -> String {
    format!("{}/{}", prefix.trim_end_matches('/'), escape_key(key))
}

/// Build the operations that upsert `desired` into the mapping at `prefix`
///
/// Keys are visited in sorted order. A key that already holds a non-empty
/// value is replaced in place. While the mapping itself does not exist yet,
/// the first missing key is added as a whole single-entry mapping at
/// `prefix`; once the mapping exists, missing keys are added at their own
/// sub-path so earlier entries survive.
pub fn build_upsert_patch(
    current: Option<&BTreeMap<String, String>>,
    desired: &BTreeMap<String, String>,
    prefix: &str,
) -> Vec<PatchOperation> {
    let mut mapping_exists = current.is_some_and(|c| !c.is_empty());
    let mut patches = Vec::with_capacity(desired.len());

    for (key, value) in desired {
        let present = current
            .and_then(|c| c.get(key))
            .is_some_and(|v| !v.is_empty());

        if present {
            patches.push(PatchOperation::replace(
                member_path(prefix, key),
                value.as_str(),
            ));
        } else if mapping_exists {
            patches.push(PatchOperation::add(member_path(prefix, key), value.as_str()));
        } else {
            patches.push(PatchOperation::add(prefix, key_value(key, value)));
            mapping_exists = true;
        }
    }

    patches
}

/// Patch operations that set `desired` labels on an object
pub fn update_labels(
    current: Option<&BTreeMap<String, String>>,
    desired: &BTreeMap<String, String>,
) -> Vec<PatchOperation> {
    build_upsert_patch(current, desired, LABELS_PATH)
}

/// Patch operations that set `desired` annotations on an object
pub fn update_annotations(
    current: Option<&BTreeMap<String, String>>,
    desired: &BTreeMap<String, String>,
) -> Vec<PatchOperation> {
    build_upsert_patch(current, desired, ANNOTATIONS_PATH)
}

/// The subset of `desired` whose value differs from `current`
pub fn pending_changes(
    current: Option<&BTreeMap<String, String>>,
    desired: &BTreeMap<String, String>,
) -> BTreeMap<String, String> {
    desired
        .iter()
        .filter(|(k, v)| current.and_then(|c| c.get(*k)) != Some(*v))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}
