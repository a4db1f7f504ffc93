//! Request Dispatcher
//!
//! Runs one admission request end to end: decode the body, route it to a
//! webhook, evaluate, and encode the answer in the schema the request used.
//!
//! Failures before a schema is known (empty body, wrong content type,
//! undecodable body) and unroutable paths come back as `Err` for the
//! transport to report. Once a review is decoded, every handler outcome,
//! including a handler error, produces a well-formed envelope.

use std::sync::Arc;

use tracing::{debug, error, field, instrument, Span};

use super::codec::{self, SchemaVersion};
use super::registry::WebhookRegistry;
use super::types::Decision;
use crate::error::{Error, Result};

/// What to answer when the routed webhook returns "not applicable"
///
/// There is deliberately no `Default`: the surrounding server must choose.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DefaultDecision {
    /// Allow without changes
    Allow,
    /// Deny with a failure status
    Deny,
    /// Send an envelope without a response
    Empty,
}

impl DefaultDecision {
    fn resolve(self, webhook: &str) -> Option<Decision> {
        match self {
            DefaultDecision::Allow => Some(Decision::allow()),
            DefaultDecision::Deny => Some(Decision::deny(format!(
                "webhook {webhook} did not produce a decision"
            ))),
            DefaultDecision::Empty => None,
        }
    }
}

impl std::str::FromStr for DefaultDecision {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "allow" => Ok(DefaultDecision::Allow),
            "deny" => Ok(DefaultDecision::Deny),
            "empty" => Ok(DefaultDecision::Empty),
            other => Err(format!(
                "unknown default decision {other:?} (expected allow, deny or empty)"
            )),
        }
    }
}

impl std::fmt::Display for DefaultDecision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DefaultDecision::Allow => write!(f, "allow"),
            DefaultDecision::Deny => write!(f, "deny"),
            DefaultDecision::Empty => write!(f, "empty"),
        }
    }
}

/// A successfully handled request, ready to send
#[derive(Clone, Debug)]
pub struct Dispatched {
    /// Encoded response envelope
    pub payload: Vec<u8>,

    /// Schema the request arrived in and the payload is written in
    pub schema: SchemaVersion,

    /// Name of the webhook that handled the request
    pub webhook: String,

    pub action: String,

    /// Verdict, or `None` when the envelope carries no response
    pub allowed: Option<bool>,
}

impl Dispatched {
    /// Outcome label: `allowed`, `denied` or `empty`
    pub fn outcome(&self) -> &'static str {
        match self.allowed {
            Some(true) => "allowed",
            Some(false) => "denied",
            None => "empty",
        }
    }
}

/// Routes decoded reviews to registered webhooks
pub struct Dispatcher {
    registry: Arc<WebhookRegistry>,
    default_decision: DefaultDecision,
}

impl Dispatcher {
    pub fn new(registry: Arc<WebhookRegistry>, default_decision: DefaultDecision) -> Self {
        Self {
            registry,
            default_decision,
        }
    }

    pub fn registry(&self) -> &WebhookRegistry {
        &self.registry
    }

    pub fn default_decision(&self) -> DefaultDecision {
        self.default_decision
    }

    /// Handle one request
    #[instrument(
        skip(self, body),
        fields(uid = field::Empty, webhook = field::Empty, action = field::Empty)
    )]
    pub fn dispatch(
        &self,
        path: &str,
        content_type: Option<&str>,
        body: &[u8],
    ) -> Result<Dispatched> {
        let (schema, review) = codec::decode(body, content_type)?;
        let span = Span::current();
        span.record("uid", review.uid.as_str());

        let (webhook, action) = self
            .registry
            .resolve(path)
            .ok_or_else(|| Error::NoMatchingHandler(path.to_string()))?;
        span.record("webhook", webhook.name());
        span.record("action", action);

        debug!(
            schema = %schema,
            operation = %review.operation,
            namespace = ?review.namespace,
            name = ?review.name,
            "Routing admission review"
        );

        let decision = match webhook.handle(action, &review) {
            Ok(Some(decision)) => Some(decision),
            Ok(None) => {
                debug!(default = %self.default_decision, "Webhook returned no decision");
                self.default_decision.resolve(webhook.name())
            }
            Err(e) => {
                error!("Webhook {} failed: {:#}", webhook.name(), e);
                Some(Decision::error(format!(
                    "webhook {} failed: {e:#}",
                    webhook.name()
                )))
            }
        };

        let allowed = decision.as_ref().map(|d| d.allowed);
        let payload = codec::encode(schema, &review, decision).inspect_err(|e| {
            error!("Can't encode the response as JSON: {}", e);
        })?;

        Ok(Dispatched {
            payload,
            schema,
            webhook: webhook.name().to_string(),
            action: action.to_string(),
            allowed,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::webhook::registry::Webhook;
    use crate::webhook::types::{Review, JSON_MIME};
    use serde_json::{json, Value};

    enum Behaviour {
        Allow,
        NotApplicable,
        Fail,
    }

    struct Echo {
        path: &'static str,
        behaviour: Behaviour,
    }

    impl Webhook for Echo {
        fn name(&self) -> &str {
            "echo"
        }

        fn description(&self) -> &str {
            "answers according to its behaviour"
        }

        fn path(&self) -> &str {
            self.path
        }

        fn handle(&self, action: &str, _review: &Review) -> anyhow::Result<Option<Decision>> {
            match self.behaviour {
                Behaviour::Allow => {
                    Ok(Some(Decision::allow().with_audit_annotation("action", action)))
                }
                Behaviour::NotApplicable => Ok(None),
                Behaviour::Fail => anyhow::bail!("database exploded"),
            }
        }
    }

    fn dispatcher(behaviour: Behaviour, default_decision: DefaultDecision) -> Dispatcher {
        let registry = WebhookRegistry::builder()
            .register(Echo {
                path: "/policy",
                behaviour,
            })
            .unwrap()
            .build();
        Dispatcher::new(Arc::new(registry), default_decision)
    }

    fn body(api_version: &str) -> Vec<u8> {
        serde_json::to_vec(&json!({
            "apiVersion": api_version,
            "kind": "AdmissionReview",
            "request": {
                "uid": "uid-1",
                "kind": {"group": "", "version": "v1", "kind": "Pod"},
                "resource": {"group": "", "version": "v1", "resource": "pods"},
                "namespace": "default",
                "operation": "CREATE",
                "userInfo": {"username": "alice"},
                "object": {"metadata": {"name": "p"}}
            }
        }))
        .unwrap()
    }

    fn response_of(dispatched: &Dispatched) -> Value {
        serde_json::from_slice(&dispatched.payload).unwrap()
    }

    #[test]
    fn test_dispatch_passes_action() {
        let d = dispatcher(Behaviour::Allow, DefaultDecision::Deny);
        let out = d
            .dispatch("/policy/validate", Some(JSON_MIME), &body("admission.k8s.io/v1"))
            .unwrap();

        assert_eq!(out.webhook, "echo");
        assert_eq!(out.action, "validate");
        assert_eq!(out.outcome(), "allowed");
        let json = response_of(&out);
        assert_eq!(json["response"]["uid"], "uid-1");
        assert_eq!(json["response"]["auditAnnotations"]["action"], "validate");
    }

    #[test]
    fn test_handler_error_becomes_denial() {
        let d = dispatcher(Behaviour::Fail, DefaultDecision::Allow);
        let out = d
            .dispatch("/policy", Some(JSON_MIME), &body("admission.k8s.io/v1"))
            .unwrap();

        assert_eq!(out.allowed, Some(false));
        let json = response_of(&out);
        assert_eq!(json["response"]["allowed"], false);
        assert_eq!(json["response"]["status"]["status"], "Failure");
        let message = json["response"]["status"]["message"].as_str().unwrap();
        assert!(message.contains("echo"));
        assert!(message.contains("database exploded"));
    }

    #[test]
    fn test_not_applicable_uses_default_decision() {
        let allow = dispatcher(Behaviour::NotApplicable, DefaultDecision::Allow)
            .dispatch("/policy", Some(JSON_MIME), &body("admission.k8s.io/v1"))
            .unwrap();
        assert_eq!(allow.allowed, Some(true));

        let deny = dispatcher(Behaviour::NotApplicable, DefaultDecision::Deny)
            .dispatch("/policy", Some(JSON_MIME), &body("admission.k8s.io/v1"))
            .unwrap();
        assert_eq!(deny.allowed, Some(false));
        assert_eq!(response_of(&deny)["response"]["uid"], "uid-1");

        let empty = dispatcher(Behaviour::NotApplicable, DefaultDecision::Empty)
            .dispatch("/policy", Some(JSON_MIME), &body("admission.k8s.io/v1beta1"))
            .unwrap();
        assert_eq!(empty.outcome(), "empty");
        let json = response_of(&empty);
        assert_eq!(json["apiVersion"], "admission.k8s.io/v1beta1");
        assert!(json.get("response").is_none());
    }

    #[test]
    fn test_unroutable_path() {
        let d = dispatcher(Behaviour::Allow, DefaultDecision::Allow);
        let err = d
            .dispatch("/policyX", Some(JSON_MIME), &body("admission.k8s.io/v1"))
            .unwrap_err();
        assert!(matches!(err, Error::NoMatchingHandler(path) if path == "/policyX"));
    }

    #[test]
    fn test_transport_rejections_never_produce_envelope() {
        let d = dispatcher(Behaviour::Allow, DefaultDecision::Allow);
        assert!(matches!(
            d.dispatch("/policy", Some(JSON_MIME), b""),
            Err(Error::BodyEmpty)
        ));
        assert!(matches!(
            d.dispatch("/policy", Some("text/plain"), &body("admission.k8s.io/v1")),
            Err(Error::UnsupportedContentType { .. })
        ));
        assert!(matches!(
            d.dispatch("/policy", Some(JSON_MIME), b"{}"),
            Err(Error::DecodeFailed(_))
        ));
    }

    #[test]
    fn test_legacy_request_answered_in_legacy_schema() {
        let d = dispatcher(Behaviour::Allow, DefaultDecision::Allow);
        let out = d
            .dispatch("/policy", Some(JSON_MIME), &body("admission.k8s.io/v1beta1"))
            .unwrap();
        assert_eq!(out.schema, SchemaVersion::V1Beta1);
        assert_eq!(response_of(&out)["apiVersion"], "admission.k8s.io/v1beta1");
    }

    #[test]
    fn test_default_decision_parsing() {
        assert_eq!("allow".parse::<DefaultDecision>(), Ok(DefaultDecision::Allow));
        assert_eq!("Deny".parse::<DefaultDecision>(), Ok(DefaultDecision::Deny));
        assert_eq!("empty".parse::<DefaultDecision>(), Ok(DefaultDecision::Empty));
        assert!("maybe".parse::<DefaultDecision>().is_err());
        assert_eq!(DefaultDecision::Deny.to_string(), "deny");
    }
}
