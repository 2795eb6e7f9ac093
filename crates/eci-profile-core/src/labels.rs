//! Label predicates compiled from Kubernetes `LabelSelector`s.
//!
//! Compilation validates the selector the same way the API machinery does
//! when converting a `LabelSelector` into a selector: operators must be known,
//! set-based operators must carry values, existence operators must not, and
//! keys and values must be syntactically valid labels.

use std::collections::{BTreeMap, BTreeSet};

use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;

use crate::error::PredicateError;

const MAX_NAME_LEN: usize = 63;
const MAX_PREFIX_LEN: usize = 253;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Requirement {
    Equals { key: String, value: String },
    In { key: String, values: BTreeSet<String> },
    NotIn { key: String, values: BTreeSet<String> },
    Exists { key: String },
    DoesNotExist { key: String },
}

impl Requirement {
    fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        match self {
            Self::Equals { key, value } => labels.get(key) == Some(value),
            Self::In { key, values } => labels.get(key).is_some_and(|v| values.contains(v)),
            Self::NotIn { key, values } => labels.get(key).map_or(true, |v| !values.contains(v)),
            Self::Exists { key } => labels.contains_key(key),
            Self::DoesNotExist { key } => !labels.contains_key(key),
        }
    }
}

/// A compiled label predicate. All requirements must hold for a match.
///
/// An empty predicate (from `LabelSelector {}`) matches every label set.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LabelPredicate {
    requirements: Vec<Requirement>,
}

impl LabelPredicate {
    /// Compile a `LabelSelector`.
    ///
    /// # Errors
    ///
    /// Returns a [`PredicateError`] if any requirement is malformed.
    pub fn compile(selector: &LabelSelector) -> Result<Self, PredicateError> {
        let mut requirements = Vec::new();

        for (key, value) in selector.match_labels.iter().flatten() {
            validate_key(key)?;
            validate_value(key, value)?;
            requirements.push(Requirement::Equals {
                key: key.clone(),
                value: value.clone(),
            });
        }

        for expr in selector.match_expressions.iter().flatten() {
            validate_key(&expr.key)?;
            let values: BTreeSet<String> = expr.values.iter().flatten().cloned().collect();
            let key = expr.key.clone();

            let requirement = match expr.operator.as_str() {
                "In" | "NotIn" => {
                    if values.is_empty() {
                        return Err(PredicateError::MissingValues {
                            key,
                            operator: expr.operator.clone(),
                        });
                    }
                    for value in &values {
                        validate_value(&key, value)?;
                    }
                    if expr.operator == "In" {
                        Requirement::In { key, values }
                    } else {
                        Requirement::NotIn { key, values }
                    }
                }
                "Exists" | "DoesNotExist" => {
                    if !values.is_empty() {
                        return Err(PredicateError::UnexpectedValues {
                            key,
                            operator: expr.operator.clone(),
                        });
                    }
                    if expr.operator == "Exists" {
                        Requirement::Exists { key }
                    } else {
                        Requirement::DoesNotExist { key }
                    }
                }
                other => {
                    return Err(PredicateError::UnknownOperator {
                        key,
                        operator: other.to_string(),
                    })
                }
            };
            requirements.push(requirement);
        }

        Ok(Self { requirements })
    }

    /// Whether the predicate holds for the given labels.
    #[must_use]
    pub fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        self.requirements.iter().all(|r| r.matches(labels))
    }

    /// Whether the predicate has no requirements and therefore matches everything.
    #[must_use]
    pub fn is_everything(&self) -> bool {
        self.requirements.is_empty()
    }
}

fn is_label_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.')
}

fn is_label_name(s: &str) -> bool {
    !s.is_empty()
        && s.len() <= MAX_NAME_LEN
        && s.chars().all(is_label_char)
        && s.starts_with(|c: char| c.is_ascii_alphanumeric())
        && s.ends_with(|c: char| c.is_ascii_alphanumeric())
}

fn is_dns_subdomain(s: &str) -> bool {
    !s.is_empty()
        && s.len() <= MAX_PREFIX_LEN
        && s.split('.').all(|part| {
            !part.is_empty()
                && part
                    .chars()
                    .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
                && !part.starts_with('-')
                && !part.ends_with('-')
        })
}

fn validate_key(key: &str) -> Result<(), PredicateError> {
    let valid = match key.split_once('/') {
        Some((prefix, name)) => is_dns_subdomain(prefix) && is_label_name(name),
        None => is_label_name(key),
    };
    if valid {
        Ok(())
    } else {
        Err(PredicateError::InvalidKey(key.to_string()))
    }
}

fn validate_value(key: &str, value: &str) -> Result<(), PredicateError> {
    // Empty values are legal label values.
    if value.is_empty() || is_label_name(value) {
        Ok(())
    } else {
        Err(PredicateError::InvalidValue {
            key: key.to_string(),
            value: value.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelectorRequirement;

    fn labels(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect()
    }

    fn expr(key: &str, operator: &str, values: &[&str]) -> LabelSelectorRequirement {
        LabelSelectorRequirement {
            key: key.to_string(),
            operator: operator.to_string(),
            values: if values.is_empty() {
                None
            } else {
                Some(values.iter().map(|v| (*v).to_string()).collect())
            },
        }
    }

    #[test]
    fn empty_selector_matches_everything() {
        let predicate = LabelPredicate::compile(&LabelSelector::default()).unwrap();
        assert!(predicate.is_everything());
        assert!(predicate.matches(&BTreeMap::new()));
        assert!(predicate.matches(&labels(&[("app", "web")])));
    }

    #[test]
    fn match_labels_require_equality() {
        let selector = LabelSelector {
            match_labels: Some(labels(&[("app", "web"), ("tier", "eci")])),
            ..Default::default()
        };
        let predicate = LabelPredicate::compile(&selector).unwrap();

        assert!(predicate.matches(&labels(&[("app", "web"), ("tier", "eci"), ("x", "y")])));
        assert!(!predicate.matches(&labels(&[("app", "web")])));
        assert!(!predicate.matches(&labels(&[("app", "web"), ("tier", "ecs")])));
    }

    #[test]
    fn set_based_expressions() {
        let selector = LabelSelector {
            match_expressions: Some(vec![
                expr("env", "In", &["prod", "staging"]),
                expr("team", "NotIn", &["infra"]),
                expr("k8s.aliyun.com/eci", "Exists", &[]),
                expr("legacy", "DoesNotExist", &[]),
            ]),
            ..Default::default()
        };
        let predicate = LabelPredicate::compile(&selector).unwrap();

        assert!(predicate.matches(&labels(&[("env", "prod"), ("k8s.aliyun.com/eci", "")])));
        // NotIn holds when the key is missing.
        assert!(predicate.matches(&labels(&[
            ("env", "staging"),
            ("team", "apps"),
            ("k8s.aliyun.com/eci", "true"),
        ])));
        assert!(!predicate.matches(&labels(&[("env", "dev"), ("k8s.aliyun.com/eci", "")])));
        assert!(!predicate.matches(&labels(&[
            ("env", "prod"),
            ("team", "infra"),
            ("k8s.aliyun.com/eci", ""),
        ])));
        assert!(!predicate.matches(&labels(&[("env", "prod")])));
        assert!(!predicate.matches(&labels(&[
            ("env", "prod"),
            ("k8s.aliyun.com/eci", ""),
            ("legacy", "1"),
        ])));
    }

    #[test]
    fn unknown_operator_is_rejected() {
        let selector = LabelSelector {
            match_expressions: Some(vec![expr("env", "Like", &["prod"])]),
            ..Default::default()
        };
        assert!(matches!(
            LabelPredicate::compile(&selector),
            Err(PredicateError::UnknownOperator { .. })
        ));
    }

    #[test]
    fn value_arity_is_checked() {
        let missing = LabelSelector {
            match_expressions: Some(vec![expr("env", "In", &[])]),
            ..Default::default()
        };
        assert!(matches!(
            LabelPredicate::compile(&missing),
            Err(PredicateError::MissingValues { .. })
        ));

        let unexpected = LabelSelector {
            match_expressions: Some(vec![expr("env", "Exists", &["prod"])]),
            ..Default::default()
        };
        assert!(matches!(
            LabelPredicate::compile(&unexpected),
            Err(PredicateError::UnexpectedValues { .. })
        ));
    }

    #[test]
    fn keys_and_values_are_validated() {
        let bad_key = LabelSelector {
            match_labels: Some(labels(&[("-app", "web")])),
            ..Default::default()
        };
        assert_eq!(
            LabelPredicate::compile(&bad_key),
            Err(PredicateError::InvalidKey("-app".to_string()))
        );

        let bad_prefix = LabelSelector {
            match_labels: Some(labels(&[("Example.com/app", "web")])),
            ..Default::default()
        };
        assert!(LabelPredicate::compile(&bad_prefix).is_err());

        let bad_value = LabelSelector {
            match_labels: Some(labels(&[("app", "web server")])),
            ..Default::default()
        };
        assert!(matches!(
            LabelPredicate::compile(&bad_value),
            Err(PredicateError::InvalidValue { .. })
        ));

        let empty_value = LabelSelector {
            match_labels: Some(labels(&[("example.com/app", "")])),
            ..Default::default()
        };
        assert!(LabelPredicate::compile(&empty_value).is_ok());
    }
}
