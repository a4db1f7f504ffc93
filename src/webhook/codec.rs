//! Admission Review Wire Codec
//!
//! Kubernetes sends `AdmissionReview` objects in one of two API versions:
//! `admission.k8s.io/v1` and the legacy `admission.k8s.io/v1beta1`. Their
//! shapes are near-identical but independently versioned. Each version gets
//! its own wire module, generated by [`admission_schema!`] from a single field
//! table, and converts to and from the canonical [`Review`] / [`Decision`]
//! pair in both directions.
//!
//! [`decode`] reports which version matched as a [`SchemaVersion`] so that
//! [`encode`] answers in the same version.

use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::debug;

use super::types::{Decision, Review, JSON_MIME};
use crate::error::{Error, Result};

/// `kind` of every review envelope
pub const REVIEW_KIND: &str = "AdmissionReview";

fn review_kind() -> String {
    REVIEW_KIND.to_string()
}

/// Which wire schema a review arrived in
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SchemaVersion {
    /// `admission.k8s.io/v1`
    V1,
    /// `admission.k8s.io/v1beta1`
    V1Beta1,
}

impl SchemaVersion {
    pub fn api_version(&self) -> &'static str {
        match self {
            SchemaVersion::V1 => v1::API_VERSION,
            SchemaVersion::V1Beta1 => v1beta1::API_VERSION,
        }
    }

    /// Version without the group, e.g. `v1beta1`
    pub fn version(&self) -> &'static str {
        match self {
            SchemaVersion::V1 => "v1",
            SchemaVersion::V1Beta1 => "v1beta1",
        }
    }
}

impl std::fmt::Display for SchemaVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.api_version())
    }
}

/// Generates `From` impls in both directions between two structs that share
/// the listed fields.
///
/// `same` fields are moved as is, `into` fields go through `Into`, and
/// `option_into` fields are `Option`s mapped through `Into`.
macro_rules! bidirectional_from {
    (@one $from:ty => $to:ty, [$($same:ident),*], [$($conv:ident),*], [$($opt:ident),*]) => {
        impl From<$from> for $to {
            fn from(source: $from) -> Self {
                Self {
                    $($same: source.$same,)*
                    $($conv: source.$conv.into(),)*
                    $($opt: source.$opt.map(Into::into),)*
                }
            }
        }
    };
    (
        $left:ident <=> $right:ident {
            same: [$($same:ident),* $(,)?],
            into: [$($conv:ident),* $(,)?],
            option_into: [$($opt:ident),* $(,)?] $(,)?
        }
    ) => {
        bidirectional_from!(@one $left => $right, [$($same),*], [$($conv),*], [$($opt),*]);
        bidirectional_from!(@one $right => $left, [$($same),*], [$($conv),*], [$($opt),*]);
    };
}

/// Generates `From` impls in both directions between two fieldless enums with
/// the same variant names.
macro_rules! bidirectional_enum {
    ($left:ident <=> $right:ident { $($variant:ident),* $(,)? }) => {
        impl From<$left> for $right {
            fn from(source: $left) -> Self {
                match source {
                    $($left::$variant => $right::$variant,)*
                }
            }
        }

        impl From<$right> for $left {
            fn from(source: $right) -> Self {
                match source {
                    $($right::$variant => $left::$variant,)*
                }
            }
        }
    };
}

/// Defines the wire module for one admission API version.
///
/// The envelope's `apiVersion` is a single-variant enum, so a body of another
/// version fails structurally instead of being silently accepted.
macro_rules! admission_schema {
    ($(#[$meta:meta])* $module:ident => $api_version:literal) => {
        $(#[$meta])*
        pub mod $module {
            use std::collections::BTreeMap;

            use k8s_openapi::api::authentication::v1::UserInfo;
            use serde::{Deserialize, Serialize};

            use crate::webhook::types::{
                Decision, GroupVersionKind, GroupVersionResource, Operation as CanonicalOperation,
                PatchType as CanonicalPatchType, RawObject, Review, Status,
            };

            pub const API_VERSION: &str = $api_version;

            #[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq, Eq)]
            pub enum ApiVersion {
                #[serde(rename = $api_version)]
                Matched,
            }

            #[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq, Eq)]
            #[serde(rename_all = "UPPERCASE")]
            pub enum Operation {
                Create,
                Update,
                Delete,
                Connect,
            }

            #[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq, Eq)]
            pub enum PatchType {
                #[serde(rename = "JSONPatch")]
                JsonPatch,
            }

            #[derive(Clone, Debug, Deserialize, Serialize)]
            #[serde(rename_all = "camelCase")]
            pub struct AdmissionReview {
                pub api_version: ApiVersion,

                #[serde(default = "super::review_kind")]
                pub kind: String,

                #[serde(default, skip_serializing_if = "Option::is_none")]
                pub request: Option<AdmissionRequest>,

                #[serde(default, skip_serializing_if = "Option::is_none")]
                pub response: Option<AdmissionResponse>,
            }

            impl AdmissionReview {
                /// A response envelope carrying `decision`, if any
                pub fn respond(decision: Option<Decision>) -> Self {
                    Self {
                        api_version: ApiVersion::Matched,
                        kind: super::review_kind(),
                        request: None,
                        response: decision.map(Into::into),
                    }
                }

                /// A request envelope carrying `review`
                pub fn request(review: Review) -> Self {
                    Self {
                        api_version: ApiVersion::Matched,
                        kind: super::review_kind(),
                        request: Some(review.into()),
                        response: None,
                    }
                }
            }

            #[derive(Clone, Debug, Deserialize, Serialize)]
            #[serde(rename_all = "camelCase")]
            pub struct AdmissionRequest {
                pub uid: String,
                pub kind: GroupVersionKind,
                pub resource: GroupVersionResource,
                #[serde(default, skip_serializing_if = "Option::is_none")]
                pub sub_resource: Option<String>,
                #[serde(default, skip_serializing_if = "Option::is_none")]
                pub request_kind: Option<GroupVersionKind>,
                #[serde(default, skip_serializing_if = "Option::is_none")]
                pub request_resource: Option<GroupVersionResource>,
                #[serde(default, skip_serializing_if = "Option::is_none")]
                pub request_sub_resource: Option<String>,
                #[serde(default, skip_serializing_if = "Option::is_none")]
                pub name: Option<String>,
                #[serde(default, skip_serializing_if = "Option::is_none")]
                pub namespace: Option<String>,
                pub operation: Operation,
                #[serde(default)]
                pub user_info: UserInfo,
                #[serde(default, skip_serializing_if = "Option::is_none")]
                pub object: Option<RawObject>,
                #[serde(default, skip_serializing_if = "Option::is_none")]
                pub old_object: Option<RawObject>,
                #[serde(default, skip_serializing_if = "Option::is_none")]
                pub dry_run: Option<bool>,
                #[serde(default, skip_serializing_if = "Option::is_none")]
                pub options: Option<RawObject>,
            }

            #[derive(Clone, Debug, Deserialize, Serialize)]
            #[serde(rename_all = "camelCase")]
            pub struct AdmissionResponse {
                pub uid: String,
                pub allowed: bool,
                #[serde(rename = "status", default, skip_serializing_if = "Option::is_none")]
                pub result: Option<Status>,
                #[serde(
                    default,
                    with = "super::base64_patch",
                    skip_serializing_if = "Option::is_none"
                )]
                pub patch: Option<Vec<u8>>,
                #[serde(default, skip_serializing_if = "Option::is_none")]
                pub patch_type: Option<PatchType>,
                #[serde(default, skip_serializing_if = "Option::is_none")]
                pub audit_annotations: Option<BTreeMap<String, String>>,
                #[serde(default, skip_serializing_if = "Option::is_none")]
                pub warnings: Option<Vec<String>>,
            }

            bidirectional_enum!(Operation <=> CanonicalOperation {
                Create, Update, Delete, Connect,
            });

            bidirectional_enum!(PatchType <=> CanonicalPatchType { JsonPatch });

            bidirectional_from!(AdmissionRequest <=> Review {
                same: [
                    uid, kind, resource, sub_resource, request_kind, request_resource,
                    request_sub_resource, name, namespace, user_info, object, old_object,
                    dry_run, options,
                ],
                into: [operation],
                option_into: [],
            });

            bidirectional_from!(AdmissionResponse <=> Decision {
                same: [uid, allowed, result, patch, audit_annotations, warnings],
                into: [],
                option_into: [patch_type],
            });
        }
    };
}

admission_schema! {
    /// Wire shapes for `admission.k8s.io/v1`
    v1 => "admission.k8s.io/v1"
}

admission_schema! {
    /// Wire shapes for the legacy `admission.k8s.io/v1beta1`
    v1beta1 => "admission.k8s.io/v1beta1"
}

// Just the `apiVersion` of an envelope, to tell which schema a body claims
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct EnvelopeVersion<V> {
    api_version: V,
}

fn declares_version<V: DeserializeOwned>(body: &[u8]) -> bool {
    serde_json::from_slice::<EnvelopeVersion<V>>(body).is_ok()
}

/// Decode a request body into a canonical review
///
/// The current schema is tried first, then the legacy one. A body that
/// declares the current `apiVersion` but is otherwise malformed reports the
/// current schema's error. Fails without reading the body when it is empty
/// or when `content_type` is not exactly `application/json`.
pub fn decode(body: &[u8], content_type: Option<&str>) -> Result<(SchemaVersion, Review)> {
    if body.is_empty() {
        return Err(Error::BodyEmpty);
    }

    if content_type != Some(JSON_MIME) {
        return Err(Error::UnsupportedContentType {
            received: content_type.unwrap_or_default().to_string(),
        });
    }

    let (schema, request) = match serde_json::from_slice::<v1::AdmissionReview>(body) {
        Ok(review) => (SchemaVersion::V1, review.request.map(Review::from)),
        Err(current_err) if declares_version::<v1::ApiVersion>(body) => {
            return Err(Error::DecodeFailed(current_err));
        }
        Err(current_err) => {
            debug!("Body is not a v1 review ({current_err}), trying v1beta1");
            let review = serde_json::from_slice::<v1beta1::AdmissionReview>(body)
                .map_err(Error::DecodeFailed)?;
            (SchemaVersion::V1Beta1, review.request.map(Review::from))
        }
    };

    let review = request.ok_or(Error::MissingRequest)?;
    Ok((schema, review))
}

/// Encode a decision for `review` in the schema it arrived in
///
/// The decision's `uid` is always taken from the review. `None` produces an
/// envelope without a response.
pub fn encode(schema: SchemaVersion, review: &Review, decision: Option<Decision>) -> Result<Vec<u8>> {
    let decision = decision.map(|mut d| {
        d.uid.clone_from(&review.uid);
        d
    });

    let encoded = match schema {
        SchemaVersion::V1 => serde_json::to_vec(&v1::AdmissionReview::respond(decision)),
        SchemaVersion::V1Beta1 => serde_json::to_vec(&v1beta1::AdmissionReview::respond(decision)),
    };

    encoded.map_err(Error::EncodeFailed)
}

// Patch bytes travel base64-encoded, like any `[]byte` field in the API
mod base64_patch {
    use base64::{engine::general_purpose::STANDARD, Engine};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(bytes: &Option<Vec<u8>>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match bytes {
            Some(bytes) => serializer.serialize_str(&STANDARD.encode(bytes)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Vec<u8>>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let Some(s) = Option::<String>::deserialize(deserializer)? else {
            return Ok(None);
        };
        STANDARD.decode(&s).map(Some).map_err(serde::de::Error::custom)
    }
}
