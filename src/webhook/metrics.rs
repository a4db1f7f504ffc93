//! Prometheus metrics for admission traffic
//!
//! # Exported metrics
//! - `admission_requests_total` (counter): answered reviews labeled by webhook, schema and outcome.
//! - `admission_rejections_total` (counter): requests refused before a review envelope could be
//!   produced, labeled by reason.
//! - `admission_request_duration_seconds` (histogram): time spent dispatching, labeled by webhook.

use std::sync::atomic::AtomicU64;
use std::time::Duration;

use once_cell::sync::Lazy;
use prometheus_client::encoding::EncodeLabelSet;
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::histogram::{exponential_buckets, Histogram};
use prometheus_client::registry::Registry;

use super::dispatch::Dispatched;
use crate::error::Error;

/// Labels for answered reviews
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct AdmissionLabels {
    pub webhook: String,
    /// "v1" or "v1beta1"
    pub schema: String,
    /// "allowed", "denied" or "empty"
    pub outcome: String,
}

/// Labels for transport-level rejections
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct RejectionLabels {
    pub reason: String,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct DurationLabels {
    pub webhook: String,
}

/// Counter tracking answered admission reviews
pub static ADMISSION_REQUESTS_TOTAL: Lazy<Family<AdmissionLabels, Counter<u64, AtomicU64>>> =
    Lazy::new(Family::default);

/// Counter tracking requests refused without an envelope
pub static ADMISSION_REJECTIONS_TOTAL: Lazy<Family<RejectionLabels, Counter<u64, AtomicU64>>> =
    Lazy::new(Family::default);

/// Histogram tracking dispatch duration (seconds)
pub static ADMISSION_REQUEST_DURATION_SECONDS: Lazy<Family<DurationLabels, Histogram>> =
    Lazy::new(|| {
        fn dispatch_histogram() -> Histogram {
            // 100µs .. ~3s across 16 buckets.
            Histogram::new(exponential_buckets(0.0001, 2.0, 16))
        }

        Family::new_with_constructor(dispatch_histogram)
    });

/// Global metrics registry
pub static REGISTRY: Lazy<Registry> = Lazy::new(|| {
    let mut registry = Registry::default();

    registry.register(
        "admission_requests",
        "Total number of answered admission reviews",
        ADMISSION_REQUESTS_TOTAL.clone(),
    );
    registry.register(
        "admission_rejections",
        "Total number of admission requests rejected before evaluation",
        ADMISSION_REJECTIONS_TOTAL.clone(),
    );
    registry.register(
        "admission_request_duration_seconds",
        "Duration of admission request dispatch in seconds",
        ADMISSION_REQUEST_DURATION_SECONDS.clone(),
    );

    registry
});

/// Record an answered review and how long it took
pub fn record_decision(dispatched: &Dispatched, elapsed: Duration) {
    ADMISSION_REQUESTS_TOTAL
        .get_or_create(&AdmissionLabels {
            webhook: dispatched.webhook.clone(),
            schema: dispatched.schema.version().to_string(),
            outcome: dispatched.outcome().to_string(),
        })
        .inc();
    ADMISSION_REQUEST_DURATION_SECONDS
        .get_or_create(&DurationLabels {
            webhook: dispatched.webhook.clone(),
        })
        .observe(elapsed.as_secs_f64());
}

/// Record a request that never reached a webhook
pub fn record_rejection(error: &Error) {
    ADMISSION_REJECTIONS_TOTAL
        .get_or_create(&RejectionLabels {
            reason: error.reason().to_string(),
        })
        .inc();
}

/// Render the registry in the Prometheus text exposition format
pub fn encode_text() -> Result<String, std::fmt::Error> {
    let mut buffer = String::new();
    prometheus_client::encoding::text::encode(&mut buffer, &REGISTRY)?;
    Ok(buffer)
}
