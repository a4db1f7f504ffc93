//! Label policy
//!
//! Stamps labels and annotations onto matching objects (`mutate`) and
//! rejects objects that lack required labels (`validate`).

use std::collections::BTreeMap;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{default_ignored_namespaces, is_namespace_ignored};
use crate::webhook::mutation::{pending_changes, update_annotations, update_labels};
use crate::webhook::registry::Webhook;
use crate::webhook::selector::matches_object;
use crate::webhook::types::{Decision, Operation, Review};

/// Action that patches labels and annotations in
pub const ACTION_MUTATE: &str = "mutate";

/// Action that checks required labels
pub const ACTION_VALIDATE: &str = "validate";

/// Declarative configuration of a [`LabelPolicy`]
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LabelPolicyConfig {
    pub name: String,

    #[serde(default)]
    pub description: String,

    /// Path prefix the policy is mounted at
    pub path: String,

    /// Only objects matching this selector are considered
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selector: Option<LabelSelector>,

    /// Labels set by `mutate`
    #[serde(default)]
    pub labels: BTreeMap<String, String>,

    /// Annotations set by `mutate`
    #[serde(default)]
    pub annotations: BTreeMap<String, String>,

    /// Label keys that `validate` insists on
    #[serde(default)]
    pub required_labels: Vec<String>,

    #[serde(default = "default_ignored_namespaces")]
    pub ignored_namespaces: Vec<String>,
}

/// Webhook enforcing a [`LabelPolicyConfig`]
#[derive(Clone, Debug)]
pub struct LabelPolicy {
    config: LabelPolicyConfig,
}

impl LabelPolicy {
    pub fn new(config: LabelPolicyConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &LabelPolicyConfig {
        &self.config
    }

    /// Metadata of the object under review, if this policy applies to it
    fn applicable_meta(&self, review: &Review) -> anyhow::Result<Option<ObjectMeta>> {
        let Some(meta) = review.object_meta()? else {
            return Ok(None);
        };

        let namespace = meta.namespace.as_deref().or(review.namespace.as_deref());
        if is_namespace_ignored(namespace, &self.config.ignored_namespaces) {
            debug!(policy = %self.config.name, namespace = ?namespace, "Namespace ignored");
            return Ok(None);
        }

        if let Some(selector) = &self.config.selector {
            if !matches_object(&meta, selector) {
                debug!(policy = %self.config.name, "Selector does not match");
                return Ok(None);
            }
        }

        Ok(Some(meta))
    }

    fn mutate(&self, review: &Review) -> anyhow::Result<Option<Decision>> {
        if matches!(review.operation, Operation::Delete | Operation::Connect) {
            return Ok(None);
        }
        let Some(meta) = self.applicable_meta(review)? else {
            return Ok(None);
        };

        let labels = pending_changes(meta.labels.as_ref(), &self.config.labels);
        let annotations = pending_changes(meta.annotations.as_ref(), &self.config.annotations);

        let mut patch = update_labels(meta.labels.as_ref(), &labels);
        patch.extend(update_annotations(meta.annotations.as_ref(), &annotations));

        if patch.is_empty() {
            return Ok(Some(Decision::allow()));
        }

        let decision = Decision::allow()
            .with_patch(&patch)?
            .with_audit_annotation(
                format!("{}/operations", self.config.name),
                patch.len().to_string(),
            );
        Ok(Some(decision))
    }

    fn validate(&self, review: &Review) -> anyhow::Result<Option<Decision>> {
        if review.operation == Operation::Delete {
            return Ok(Some(Decision::allow()));
        }
        let Some(meta) = self.applicable_meta(review)? else {
            return Ok(None);
        };

        let labels = meta.labels.unwrap_or_default();
        let missing: Vec<&str> = self
            .config
            .required_labels
            .iter()
            .filter(|key| labels.get(*key).map_or(true, |v| v.is_empty()))
            .map(String::as_str)
            .collect();

        if missing.is_empty() {
            Ok(Some(Decision::allow()))
        } else {
            Ok(Some(Decision::deny(format!(
                "missing required labels: {}",
                missing.join(", ")
            ))))
        }
    }
}

impl Webhook for LabelPolicy {
    fn name(&self) -> &str {
        &self.config.name
    }

    fn description(&self) -> &str {
        &self.config.description
    }

    fn path(&self) -> &str {
        &self.config.path
    }

    fn handle(&self, action: &str, review: &Review) -> anyhow::Result<Option<Decision>> {
        match action {
            ACTION_MUTATE => self.mutate(review),
            ACTION_VALIDATE => self.validate(review),
            other => anyhow::bail!(
                "policy {} has no action {other:?} (expected {ACTION_MUTATE} or {ACTION_VALIDATE})",
                self.config.name
            ),
        }
    }
}
