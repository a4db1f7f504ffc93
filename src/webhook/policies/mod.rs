//! Built-in policies
//!
//! Ready-made [`Webhook`](super::registry::Webhook) implementations that can
//! be mounted from a YAML policy file, plus the shared label constants and
//! namespace helpers they use.

pub mod labels;

use std::path::Path;

use serde::Deserialize;
use tracing::info;

use crate::error::{Error, Result};
pub use labels::{LabelPolicy, LabelPolicyConfig};

/// Recommended label: name of the application
pub const LABEL_NAME: &str = "app.kubernetes.io/name";
/// Recommended label: unique name identifying the instance
pub const LABEL_INSTANCE: &str = "app.kubernetes.io/instance";
/// Recommended label: current version of the application
pub const LABEL_VERSION: &str = "app.kubernetes.io/version";
/// Recommended label: component within the architecture
pub const LABEL_COMPONENT: &str = "app.kubernetes.io/component";
/// Recommended label: name of the higher level application this one is part of
pub const LABEL_PART_OF: &str = "app.kubernetes.io/part-of";
/// Recommended label: tool managing the application
pub const LABEL_MANAGED_BY: &str = "app.kubernetes.io/managed-by";

/// Namespaces left alone unless a policy overrides the list
pub const DEFAULT_IGNORED_NAMESPACES: &[&str] = &["kube-system", "kube-public"];

/// Whether `namespace` is one of `ignored`
pub fn is_namespace_ignored(namespace: Option<&str>, ignored: &[String]) -> bool {
    namespace.is_some_and(|ns| ignored.iter().any(|i| i == ns))
}

pub(crate) fn default_ignored_namespaces() -> Vec<String> {
    DEFAULT_IGNORED_NAMESPACES
        .iter()
        .map(|ns| ns.to_string())
        .collect()
}

/// Top-level layout of a policy file
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicyFile {
    #[serde(default)]
    pub policies: Vec<LabelPolicyConfig>,
}

impl PolicyFile {
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml)
            .map_err(|e| Error::ConfigError(format!("Invalid policy file: {e}")))
    }
}

/// Load every policy declared in a YAML file
pub fn load_policy_file(path: impl AsRef<Path>) -> Result<Vec<LabelPolicy>> {
    let path = path.as_ref();
    let contents = std::fs::read_to_string(path).map_err(|e| {
        Error::ConfigError(format!("Failed to read policy file {}: {e}", path.display()))
    })?;
    let file = PolicyFile::from_yaml(&contents)?;

    info!(
        "Loaded {} policies from {}",
        file.policies.len(),
        path.display()
    );
    Ok(file.policies.into_iter().map(LabelPolicy::new).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_is_namespace_ignored() {
        let ignored = default_ignored_namespaces();
        assert!(is_namespace_ignored(Some("kube-system"), &ignored));
        assert!(!is_namespace_ignored(Some("default"), &ignored));
        assert!(!is_namespace_ignored(None, &ignored));
        assert!(!is_namespace_ignored(Some("kube-system"), &[]));
    }

    #[test]
    fn test_load_policy_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
policies:
  - name: team-labels
    description: stamps the owning team
    path: /labels
    labels:
      team: platform
    selector:
      matchLabels:
        tier: web
  - name: required
    path: /required
    requiredLabels: ["{LABEL_NAME}"]
    ignoredNamespaces: []
"#
        )
        .unwrap();

        let policies = load_policy_file(file.path()).unwrap();
        assert_eq!(policies.len(), 2);
        assert_eq!(policies[0].config().name, "team-labels");
        assert_eq!(policies[0].config().labels["team"], "platform");
        assert_eq!(
            policies[0].config().ignored_namespaces,
            default_ignored_namespaces()
        );
        assert!(policies[0].config().selector.is_some());
        assert_eq!(policies[1].config().required_labels, vec![LABEL_NAME]);
        assert!(policies[1].config().ignored_namespaces.is_empty());
    }

    #[test]
    fn test_missing_policy_file_is_config_error() {
        let err = load_policy_file("/nonexistent/policies.yaml").unwrap_err();
        assert!(matches!(err, Error::ConfigError(_)));
    }

    #[test]
    fn test_malformed_policy_file_is_config_error() {
        let err = PolicyFile::from_yaml("policies: [{name: 3, path: ").unwrap_err();
        assert!(matches!(err, Error::ConfigError(msg) if msg.contains("Invalid policy file")));
    }
}
