//! Webhook Module
//!
//! This module provides the request-handling core of a Kubernetes admission
//! webhook: it accepts `AdmissionReview` payloads, routes them to registered
//! policy handlers and answers in the schema the request arrived in.
//!
//! # Features
//!
//! - **Dual Schema Codec**: `admission.k8s.io/v1` and the legacy `v1beta1`
//! - **Path Routing**: handlers own a path prefix; the remainder is their action
//! - **Decision Support**: label selector evaluation and JSON patch synthesis
//! - **Label Policy**: a configurable built-in mutating/validating policy
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use admission_core::webhook::{
//!     DefaultDecision, Dispatcher, LabelPolicy, WebhookRegistry, WebhookServer,
//! };
//!
//! // Register handlers, then freeze the registry
//! let registry = WebhookRegistry::builder()
//!     .register(LabelPolicy::new(config))?
//!     .build();
//!
//! // Decide what "not applicable" means
//! let dispatcher = Dispatcher::new(Arc::new(registry), DefaultDecision::Allow);
//!
//! // Start the server
//! WebhookServer::new(dispatcher)?
//!     .with_tls(cert_path, key_path)
//!     .start("0.0.0.0:8443".parse()?)
//!     .await?;
//! ```

pub mod codec;
pub mod dispatch;
pub mod mutation;
pub mod policies;
pub mod registry;
pub mod selector;
pub mod types;

#[cfg(feature = "metrics")]
pub mod metrics;

#[cfg(feature = "server")]
pub mod server;

pub use codec::SchemaVersion;
pub use dispatch::{DefaultDecision, Dispatched, Dispatcher};
pub use mutation::{update_annotations, update_labels, PatchOp, PatchOperation};
pub use policies::{LabelPolicy, LabelPolicyConfig};
pub use registry::{describe_webhook, webhook_action, Webhook, WebhookRegistry, WebhookRegistryBuilder};
pub use types::{
    Decision, GroupVersionKind, GroupVersionResource, Operation, RawObject, Review, Status,
};

#[cfg(feature = "server")]
pub use server::{TlsConfig, WebhookServer};
