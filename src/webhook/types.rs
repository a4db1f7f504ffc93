//! Canonical Admission Types
//!
//! This module defines the schema-independent review and decision types that
//! handlers work with. The wire shapes of each admission API version live in
//! [`super::codec`] and are converted to and from these types there.

use std::collections::BTreeMap;

use k8s_openapi::api::authentication::v1::UserInfo;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;

use super::mutation::PatchOperation;

/// The only media type accepted on the wire
pub const JSON_MIME: &str = "application/json";

/// Status string used on failed decisions
pub const STATUS_FAILURE: &str = "Failure";

/// Group/version/kind of the resource under review
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
pub struct GroupVersionKind {
    #[serde(default)]
    pub group: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub kind: String,
}

/// Group/version/resource of the resource under review
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
pub struct GroupVersionResource {
    #[serde(default)]
    pub group: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub resource: String,
}

/// Kubernetes operation type
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Operation {
    Create,
    Update,
    Delete,
    Connect,
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Operation::Create => write!(f, "CREATE"),
            Operation::Update => write!(f, "UPDATE"),
            Operation::Delete => write!(f, "DELETE"),
            Operation::Connect => write!(f, "CONNECT"),
        }
    }
}

/// Encoding of a decision's patch payload
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PatchType {
    JsonPatch,
}

/// Structured failure attached to a decision
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Status {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<i32>,
}

impl Status {
    /// A `Failure` status with the given message, reason and HTTP code
    pub fn failure(message: impl Into<String>, reason: &str, code: i32) -> Self {
        Self {
            status: Some(STATUS_FAILURE.to_string()),
            message: Some(message.into()),
            reason: Some(reason.to_string()),
            code: Some(code),
        }
    }
}

/// An embedded object, kept as the exact JSON text it arrived as
///
/// Reviews carry objects of arbitrary kinds. Holding them unparsed means
/// numbers outside the `f64`/`u64` range and key order survive a trip
/// through either schema.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(transparent)]
pub struct RawObject(Box<RawValue>);

impl RawObject {
    /// Serialize `value` into a raw object
    pub fn from_value<T: Serialize>(value: &T) -> serde_json::Result<Self> {
        serde_json::value::to_raw_value(value).map(Self)
    }

    /// The JSON text, byte for byte as received
    pub fn get(&self) -> &str {
        self.0.get()
    }

    /// Parse the object into `T`
    pub fn parse<T: DeserializeOwned>(&self) -> serde_json::Result<T> {
        serde_json::from_str(self.0.get())
    }
}

impl PartialEq for RawObject {
    fn eq(&self, other: &Self) -> bool {
        self.get() == other.get()
    }
}

/// One admission request, independent of the wire schema it arrived in
#[derive(Clone, Debug, PartialEq)]
pub struct Review {
    /// Correlation identifier, echoed back on the decision
    pub uid: String,

    pub kind: GroupVersionKind,
    pub resource: GroupVersionResource,
    pub sub_resource: Option<String>,

    /// Kind/resource as originally requested, before any conversion
    pub request_kind: Option<GroupVersionKind>,
    pub request_resource: Option<GroupVersionResource>,
    pub request_sub_resource: Option<String>,

    pub name: Option<String>,
    pub namespace: Option<String>,
    pub operation: Operation,

    /// Principal performing the operation
    pub user_info: UserInfo,

    /// Proposed object state (absent on DELETE)
    pub object: Option<RawObject>,

    /// Prior object state (UPDATE and DELETE)
    pub old_object: Option<RawObject>,

    pub dry_run: Option<bool>,
    pub options: Option<RawObject>,
}

impl Review {
    /// Whether the request must not cause side effects
    pub fn is_dry_run(&self) -> bool {
        self.dry_run.unwrap_or(false)
    }

    /// Metadata of the proposed object, if there is one
    pub fn object_meta(&self) -> serde_json::Result<Option<ObjectMeta>> {
        metadata_of(self.object.as_ref())
    }

    /// Metadata of the prior object, if there is one
    pub fn old_object_meta(&self) -> serde_json::Result<Option<ObjectMeta>> {
        metadata_of(self.old_object.as_ref())
    }
}

// Only `metadata` is parsed; the rest of the object is skipped unread.
#[derive(Deserialize)]
struct MetadataOnly {
    #[serde(default)]
    metadata: Option<ObjectMeta>,
}

fn metadata_of(object: Option<&RawObject>) -> serde_json::Result<Option<ObjectMeta>> {
    match object {
        Some(raw) => raw.parse::<MetadataOnly>().map(|o| o.metadata),
        None => Ok(None),
    }
}

/// The verdict for a [`Review`]
///
/// `uid` is overwritten with the review's identifier at encode time, so
/// handlers do not need to set it.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Decision {
    pub uid: String,
    pub allowed: bool,
    pub result: Option<Status>,
    pub patch: Option<Vec<u8>>,
    pub patch_type: Option<PatchType>,
    pub audit_annotations: Option<BTreeMap<String, String>>,
    pub warnings: Option<Vec<String>>,
}

impl Decision {
    /// Create an allowed decision with no changes
    pub fn allow() -> Self {
        Self {
            allowed: true,
            ..Default::default()
        }
    }

    /// Create a policy denial
    pub fn deny(message: impl Into<String>) -> Self {
        Self {
            allowed: false,
            result: Some(Status::failure(message, "Forbidden", 403)),
            ..Default::default()
        }
    }

    /// Create a denial for an internal failure while evaluating the review
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            allowed: false,
            result: Some(Status::failure(message, "InternalError", 500)),
            ..Default::default()
        }
    }

    /// Attach a JSON patch
    ///
    /// An empty operation list leaves the decision unchanged.
    pub fn with_patch(mut self, operations: &[PatchOperation]) -> serde_json::Result<Self> {
        if operations.is_empty() {
            return Ok(self);
        }
        self.patch = Some(serde_json::to_vec(operations)?);
        self.patch_type = Some(PatchType::JsonPatch);
        Ok(self)
    }

    /// Add an audit annotation
    pub fn with_audit_annotation(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.audit_annotations
            .get_or_insert_with(BTreeMap::new)
            .insert(key.into(), value.into());
        self
    }

    /// Add a warning returned to the API client
    pub fn with_warning(mut self, warning: impl Into<String>) -> Self {
        self.warnings.get_or_insert_with(Vec::new).push(warning.into());
        self
    }

    /// Failure message, if any
    pub fn message(&self) -> Option<&str> {
        self.result.as_ref().and_then(|s| s.message.as_deref())
    }
}
