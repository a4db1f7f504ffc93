//! Webhook Registry
//!
//! Webhooks are registered once at startup through [`WebhookRegistryBuilder`]
//! and frozen into a [`WebhookRegistry`], which is then shared read-only by
//! every request.

use tracing::info;

use super::types::{Decision, Review};
use crate::error::{Error, Result};

/// A policy unit mounted under a path prefix
pub trait Webhook: Send + Sync {
    /// Short name, used in logs and metrics
    fn name(&self) -> &str;

    /// Human-readable description
    fn description(&self) -> &str;

    /// Path prefix the webhook is mounted at
    ///
    /// Must start with `/` and must not end with it.
    fn path(&self) -> &str;

    /// Evaluate a review
    ///
    /// `action` is whatever followed the prefix (without the separating `/`),
    /// or `""` when the request targeted the prefix itself. Return `Ok(None)`
    /// when the review is not for this webhook.
    fn handle(&self, action: &str, review: &Review) -> anyhow::Result<Option<Decision>>;
}

/// Split `path` into the action for a webhook mounted at `prefix`
///
/// Returns `None` unless `path` is `prefix` itself or continues it with `/`.
pub fn webhook_action<'p>(path: &'p str, prefix: &str) -> Option<&'p str> {
    let rest = path.strip_prefix(prefix)?;
    if rest.is_empty() {
        return Some("");
    }
    rest.strip_prefix('/')
}

/// Multi-line description of a webhook, each line prefixed with `indent`
pub fn describe_webhook(webhook: &dyn Webhook, indent: &str) -> String {
    format!(
        "{indent}Name:        {}\n{indent}Description: {}\n{indent}Path:        {}",
        webhook.name(),
        webhook.description(),
        webhook.path()
    )
}

fn validate_path(path: &str) -> Result<()> {
    let reason = if path.is_empty() {
        "path must not be empty"
    } else if !path.starts_with('/') {
        "path must start with '/'"
    } else if path.ends_with('/') {
        "path must not end with '/'"
    } else {
        return Ok(());
    };

    Err(Error::InvalidWebhookPath {
        path: path.to_string(),
        reason,
    })
}

/// Collects webhooks in registration order
#[derive(Default)]
pub struct WebhookRegistryBuilder {
    webhooks: Vec<Box<dyn Webhook>>,
}

impl WebhookRegistryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a webhook
    ///
    /// Overlapping prefixes are not detected; the earliest registration wins
    /// at resolve time.
    pub fn register(self, webhook: impl Webhook + 'static) -> Result<Self> {
        self.register_boxed(Box::new(webhook))
    }

    /// Append an already boxed webhook
    pub fn register_boxed(mut self, webhook: Box<dyn Webhook>) -> Result<Self> {
        validate_path(webhook.path())?;
        info!(
            name = webhook.name(),
            path = webhook.path(),
            "Registered webhook"
        );
        self.webhooks.push(webhook);
        Ok(self)
    }

    /// Freeze the registry
    pub fn build(self) -> WebhookRegistry {
        WebhookRegistry {
            webhooks: self.webhooks,
        }
    }
}

/// Frozen, ordered set of webhooks
pub struct WebhookRegistry {
    webhooks: Vec<Box<dyn Webhook>>,
}

impl WebhookRegistry {
    pub fn builder() -> WebhookRegistryBuilder {
        WebhookRegistryBuilder::new()
    }

    /// Find the first webhook owning `path`, with the residual action
    pub fn resolve<'p>(&self, path: &'p str) -> Option<(&dyn Webhook, &'p str)> {
        self.webhooks.iter().find_map(|webhook| {
            webhook_action(path, webhook.path()).map(|action| (webhook.as_ref(), action))
        })
    }

    pub fn iter(&self) -> impl Iterator<Item = &dyn Webhook> {
        self.webhooks.iter().map(|w| w.as_ref())
    }

    pub fn len(&self) -> usize {
        self.webhooks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.webhooks.is_empty()
    }
}

impl std::fmt::Debug for WebhookRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.webhooks.iter().map(|w| w.path()))
            .finish()
    }
}
