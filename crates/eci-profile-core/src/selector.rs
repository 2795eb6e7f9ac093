//! The `Selector` custom resource.
//!
//! A Selector is a cluster-scoped rule written by cluster administrators. It
//! matches Pods by namespace labels and Pod labels, names the scheduling
//! policy to apply, and lists annotations and labels to inject.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::Pod;
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use kube::{CustomResource, ResourceExt};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::error::{LabelAxis, SelectorConfigError};
use crate::labels::LabelPredicate;

/// Specification of a [`Selector`].
#[derive(CustomResource, Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "eci.aliyun.com",
    version = "v1beta1",
    kind = "Selector",
    plural = "selectors",
    derive = "PartialEq",
    derive = "Default"
)]
#[serde(rename_all = "camelCase")]
pub struct SelectorSpec {
    /// Predicate over the labels of the Pod's namespace. Unset matches every namespace.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace_labels: Option<LabelSelector>,

    /// Predicate over the Pod's own labels. Unset matches every Pod.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub object_labels: Option<LabelSelector>,

    /// Annotations and labels to inject into matched Pods.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub effect: Option<SideEffect>,

    /// The scheduling policy. Exactly one variant is expected to be set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub policy: Option<PolicySource>,

    /// Rank among matching Selectors; higher wins. Unset counts as 0.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<i32>,
}

/// Metadata injected into matched Pods.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct SideEffect {
    /// Annotations to add.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub annotations: Option<BTreeMap<String, String>>,

    /// Labels to add.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub labels: Option<BTreeMap<String, String>>,
}

/// One-of wrapper for the scheduling policy.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PolicySource {
    /// Allow both virtual and normal nodes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fair: Option<FairPolicy>,

    /// Never use virtual nodes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub normal_node_only: Option<NormalNodeOnlyPolicy>,

    /// Try normal nodes first, fall back to virtual nodes when unschedulable.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub normal_node_prefer: Option<NormalNodePreferPolicy>,

    /// Always place on virtual nodes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub virtual_node_only: Option<VirtualNodeOnlyPolicy>,

    /// Reserved. Not evaluated.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace_resource_limit: Option<NamespaceResourceLimitPolicy>,
}

/// Marker for the Fair policy.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct FairPolicy {}

/// Marker for the NormalNodeOnly policy.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct NormalNodeOnlyPolicy {}

/// Parameters of the NormalNodePrefer policy.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct NormalNodePreferPolicy {
    /// Cluster CPU usage ratio above which virtual nodes are preferred.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpu_ratio: Option<f64>,

    /// Cluster memory usage ratio above which virtual nodes are preferred.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory_ratio: Option<f64>,
}

/// Marker for the VirtualNodeOnly policy.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct VirtualNodeOnlyPolicy {}

/// Parameters of the reserved NamespaceResourceLimit policy.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct NamespaceResourceLimitPolicy {
    /// Namespace whose usage is limited.
    pub namespace: String,

    /// Resource limits on normal nodes.
    #[serde(default)]
    pub limits: BTreeMap<String, Quantity>,
}

impl SelectorSpec {
    /// The effective priority; unset counts as 0.
    #[must_use]
    pub fn priority(&self) -> i32 {
        self.priority.unwrap_or(0)
    }

    /// Annotations to inject, if any are configured.
    #[must_use]
    pub fn effect_annotations(&self) -> Option<&BTreeMap<String, String>> {
        self.effect
            .as_ref()
            .and_then(|e| e.annotations.as_ref())
            .filter(|m| !m.is_empty())
    }

    /// Labels to inject, if any are configured.
    #[must_use]
    pub fn effect_labels(&self) -> Option<&BTreeMap<String, String>> {
        self.effect
            .as_ref()
            .and_then(|e| e.labels.as_ref())
            .filter(|m| !m.is_empty())
    }
}

impl Selector {
    /// Whether this Selector applies to `pod` living in a namespace labelled `namespace_labels`.
    ///
    /// An unset predicate matches everything on its axis.
    ///
    /// # Errors
    ///
    /// Returns [`SelectorConfigError`] if either predicate is malformed.
    pub fn matches(
        &self,
        pod: &Pod,
        namespace_labels: &BTreeMap<String, String>,
    ) -> Result<bool, SelectorConfigError> {
        if let Some(selector) = &self.spec.namespace_labels {
            if !self
                .compile(selector, LabelAxis::Namespace)?
                .matches(namespace_labels)
            {
                return Ok(false);
            }
        }

        if let Some(selector) = &self.spec.object_labels {
            if !self.compile(selector, LabelAxis::Object)?.matches(pod.labels()) {
                return Ok(false);
            }
        }

        Ok(true)
    }

    /// Whether evaluating this Selector needs the namespace's labels.
    #[must_use]
    pub fn needs_namespace_labels(&self) -> bool {
        self.spec.namespace_labels.is_some()
    }

    fn compile(
        &self,
        selector: &LabelSelector,
        axis: LabelAxis,
    ) -> Result<LabelPredicate, SelectorConfigError> {
        LabelPredicate::compile(selector).map_err(|source| SelectorConfigError {
            selector: self.name_any(),
            axis,
            source,
        })
    }
}
