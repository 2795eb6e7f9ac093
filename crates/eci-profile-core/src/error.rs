//! Error types for selector configuration.
//!
//! A malformed label predicate only poisons the resolution that touches it;
//! these errors carry enough context to say which Selector and which axis.

use std::fmt;

use thiserror::Error;

/// Which side of a Selector a label predicate applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LabelAxis {
    /// Predicate over the labels of the Pod's namespace.
    Namespace,
    /// Predicate over the labels of the Pod itself.
    Object,
}

impl fmt::Display for LabelAxis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Namespace => f.write_str("namespaceLabels"),
            Self::Object => f.write_str("objectLabels"),
        }
    }
}

/// A label selector expression that cannot be compiled into a predicate.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PredicateError {
    /// The requirement operator is not one of `In`, `NotIn`, `Exists`, `DoesNotExist`.
    #[error("unknown operator {operator:?} for key {key:?}")]
    UnknownOperator {
        /// Label key of the requirement.
        key: String,
        /// The operator as written.
        operator: String,
    },

    /// `In` / `NotIn` without any values.
    #[error("operator {operator} on key {key:?} requires at least one value")]
    MissingValues {
        /// Label key of the requirement.
        key: String,
        /// The operator as written.
        operator: String,
    },

    /// `Exists` / `DoesNotExist` with values.
    #[error("operator {operator} on key {key:?} must not have values")]
    UnexpectedValues {
        /// Label key of the requirement.
        key: String,
        /// The operator as written.
        operator: String,
    },

    /// The label key is not a valid qualified name.
    #[error("invalid label key {0:?}")]
    InvalidKey(String),

    /// The label value is not a valid label value.
    #[error("invalid label value {value:?} for key {key:?}")]
    InvalidValue {
        /// Label key the value belongs to.
        key: String,
        /// The offending value.
        value: String,
    },
}

/// A Selector has a label predicate that cannot be evaluated.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("selector {selector}: invalid {axis}: {source}")]
pub struct SelectorConfigError {
    /// Name of the offending Selector.
    pub selector: String,
    /// Which predicate is malformed.
    pub axis: LabelAxis,
    /// What is wrong with it.
    #[source]
    pub source: PredicateError,
}
