//! Patch formats produced by the policies.
//!
//! Two distinct wire formats are used:
//!
//! - [`PatchInstruction`]: one RFC 6902 JSON Patch operation, returned inside an
//!   admission response while the Pod is being created.
//! - [`PatchDocument`]: an RFC 7396 JSON Merge Patch document, sent directly to the
//!   API server to correct a Pod that failed to schedule.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::Toleration;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// JSON Patch operation kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PatchOp {
    /// Add (or overwrite) the member at `path`.
    Add,
    /// Replace the member at `path`; it must already exist.
    Replace,
    /// Remove the member at `path`.
    Remove,
}

/// A single JSON Patch operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatchInstruction {
    /// The operation.
    pub op: PatchOp,
    /// JSON Pointer to the target member.
    pub path: String,
    /// The value to write.
    pub value: Value,
}

impl PatchInstruction {
    /// An `add` operation.
    #[must_use]
    pub fn add(path: impl Into<String>, value: Value) -> Self {
        Self {
            op: PatchOp::Add,
            path: path.into(),
            value,
        }
    }

    /// A `replace` operation.
    #[must_use]
    pub fn replace(path: impl Into<String>, value: Value) -> Self {
        Self {
            op: PatchOp::Replace,
            path: path.into(),
            value,
        }
    }
}

/// Metadata section of a [`PatchDocument`].
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PatchMetadata {
    /// Annotations to set, by key.
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
    /// Labels to set, by key.
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
}

/// Spec section of a [`PatchDocument`].
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PatchSpec {
    /// The complete toleration list; merge patch replaces lists wholesale.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tolerations: Option<Vec<Toleration>>,
}

/// A JSON Merge Patch against a Pod.
///
/// `metadata` and `spec` are always present on the wire; their members are
/// only written when set, so absent keys leave the Pod untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PatchDocument {
    /// Metadata changes.
    pub metadata: PatchMetadata,
    /// Spec changes.
    pub spec: PatchSpec,
}

impl PatchDocument {
    /// An empty document.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set annotations. An absent or empty map leaves the document unchanged.
    #[must_use]
    pub fn with_annotations(mut self, annotations: Option<&BTreeMap<String, String>>) -> Self {
        if let Some(annotations) = annotations.filter(|m| !m.is_empty()) {
            self.metadata.annotations.clone_from(annotations);
        }
        self
    }

    /// Set labels. An absent or empty map leaves the document unchanged.
    #[must_use]
    pub fn with_labels(mut self, labels: Option<&BTreeMap<String, String>>) -> Self {
        if let Some(labels) = labels.filter(|m| !m.is_empty()) {
            self.metadata.labels.clone_from(labels);
        }
        self
    }

    /// Set the full toleration list.
    #[must_use]
    pub fn with_tolerations(mut self, tolerations: Vec<Toleration>) -> Self {
        self.spec.tolerations = Some(tolerations);
        self
    }
}
