//! admission-core: request-handling core for Kubernetes admission webhooks
//!
//! This crate decodes admission reviews in either supported API version,
//! routes them to registered policy handlers and encodes their decisions.

pub mod error;
pub mod telemetry;
pub mod webhook;

pub use crate::error::{Error, Result};
