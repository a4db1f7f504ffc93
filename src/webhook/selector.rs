//! Label selector evaluation

use std::collections::BTreeMap;
use std::str::FromStr;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::{
    LabelSelector, LabelSelectorRequirement, ObjectMeta,
};

/// Operator of a `matchExpressions` entry
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SelectorOperator {
    In,
    NotIn,
    Exists,
    DoesNotExist,
}

impl FromStr for SelectorOperator {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "In" => Ok(SelectorOperator::In),
            "NotIn" => Ok(SelectorOperator::NotIn),
            "Exists" => Ok(SelectorOperator::Exists),
            "DoesNotExist" => Ok(SelectorOperator::DoesNotExist),
            other => Err(format!("unknown label selector operator {other:?}")),
        }
    }
}

/// Whether `labels` satisfy both clauses of `selector`
///
/// An empty selector matches everything.
pub fn matches(labels: &BTreeMap<String, String>, selector: &LabelSelector) -> bool {
    match_labels(labels, selector.match_labels.as_ref())
        && selector
            .match_expressions
            .iter()
            .flatten()
            .all(|expr| match_expression(labels, expr))
}

/// Like [`matches`], for an object whose labels may be unset
pub fn matches_object(meta: &ObjectMeta, selector: &LabelSelector) -> bool {
    match &meta.labels {
        Some(labels) => matches(labels, selector),
        None => matches(&BTreeMap::new(), selector),
    }
}

fn match_labels(
    labels: &BTreeMap<String, String>,
    required: Option<&BTreeMap<String, String>>,
) -> bool {
    let Some(required) = required else {
        return true;
    };
    if labels.len() < required.len() {
        return false;
    }
    required
        .iter()
        .all(|(key, value)| labels.get(key) == Some(value))
}

fn match_expression(labels: &BTreeMap<String, String>, expr: &LabelSelectorRequirement) -> bool {
    // Unknown operators never match
    let Ok(operator) = expr.operator.parse::<SelectorOperator>() else {
        return false;
    };

    let value = labels.get(&expr.key);
    let in_values = |v: &String| expr.values.iter().flatten().any(|candidate| candidate == v);

    match operator {
        SelectorOperator::In => value.is_some_and(in_values),
        SelectorOperator::NotIn => !value.is_some_and(in_values),
        SelectorOperator::Exists => value.is_some(),
        SelectorOperator::DoesNotExist => value.is_none(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels(entries: &[(&str, &str)]) -> BTreeMap<String, String> {
        entries
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn expression(key: &str, operator: &str, values: &[&str]) -> LabelSelector {
        LabelSelector {
            match_labels: None,
            match_expressions: Some(vec![LabelSelectorRequirement {
                key: key.to_string(),
                operator: operator.to_string(),
                values: if values.is_empty() {
                    None
                } else {
                    Some(values.iter().map(|v| v.to_string()).collect())
                },
            }]),
        }
    }

    #[test]
    fn test_match_labels() {
        let selector = LabelSelector {
            match_labels: Some(labels(&[("env", "prod")])),
            match_expressions: None,
        };
        assert!(matches(&labels(&[("env", "prod"), ("tier", "web")]), &selector));
        assert!(!matches(&labels(&[("env", "staging")]), &selector));
        assert!(!matches(&labels(&[]), &selector));
    }

    #[test]
    fn test_exists() {
        let selector = expression("tier", "Exists", &[]);
        assert!(!matches(&labels(&[]), &selector));
        assert!(matches(&labels(&[("tier", "web")]), &selector));
    }

    #[test]
    fn test_does_not_exist() {
        let selector = expression("tier", "DoesNotExist", &[]);
        assert!(matches(&labels(&[("env", "prod")]), &selector));
        assert!(!matches(&labels(&[("tier", "")]), &selector));
    }

    #[test]
    fn test_in() {
        let selector = expression("env", "In", &["prod", "staging"]);
        assert!(matches(&labels(&[("env", "staging")]), &selector));
        assert!(!matches(&labels(&[("env", "dev")]), &selector));
        assert!(!matches(&labels(&[]), &selector));
    }

    #[test]
    fn test_not_in() {
        let selector = expression("env", "NotIn", &["prod"]);
        assert!(matches(&labels(&[]), &selector));
        assert!(matches(&labels(&[("env", "dev")]), &selector));
        assert!(!matches(&labels(&[("env", "prod")]), &selector));
    }

    #[test]
    fn test_unknown_operator_fails() {
        let selector = expression("env", "Gt", &["1"]);
        assert!(!matches(&labels(&[("env", "2")]), &selector));
        assert!("Gt".parse::<SelectorOperator>().is_err());
    }

    #[test]
    fn test_both_clauses_required() {
        let mut selector = expression("tier", "Exists", &[]);
        selector.match_labels = Some(labels(&[("env", "prod")]));

        assert!(matches(&labels(&[("env", "prod"), ("tier", "web")]), &selector));
        assert!(!matches(&labels(&[("env", "prod")]), &selector));
        assert!(!matches(&labels(&[("tier", "web")]), &selector));
    }

    #[test]
    fn test_empty_selector_matches_everything() {
        assert!(matches(&labels(&[]), &LabelSelector::default()));
        assert!(matches_object(&ObjectMeta::default(), &LabelSelector::default()));
    }

    #[test]
    fn test_matches_object_without_labels() {
        let selector = expression("env", "NotIn", &["prod"]);
        assert!(matches_object(&ObjectMeta::default(), &selector));
    }
}
