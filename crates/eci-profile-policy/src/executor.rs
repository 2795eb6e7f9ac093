//! Scheduling policies and the Pod mutations they produce.
//!
//! Each [`PolicyKind`] has two hooks:
//!
//! - `on_pod_creating` runs inside the admission request and returns JSON Patch
//!   operations to apply to the Pod before it is persisted.
//! - `on_pod_unscheduled` runs when the scheduler reports the Pod as unschedulable
//!   and returns a merge-patch document to send to the API server.
//!
//! A third hook, `on_pod_scheduled`, is defined but has no caller.

use std::collections::BTreeMap;

use eci_profile_core::SelectorSpec;
use k8s_openapi::api::core::v1::{Pod, Toleration};

use crate::error::Result;
use crate::patch::{PatchDocument, PatchInstruction};
use crate::toleration::{
    tolerates_virtual_node, virtual_node_selector, with_virtual_node_toleration,
};

const TOLERATIONS_PATH: &str = "/spec/tolerations";
const NODE_SELECTOR_PATH: &str = "/spec/nodeSelector";
const ANNOTATIONS_PATH: &str = "/metadata/annotations";
const LABELS_PATH: &str = "/metadata/labels";

/// The scheduling policy named by a Selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PolicyKind {
    /// Pods may land on either virtual or normal nodes.
    Fair,
    /// Pods never land on virtual nodes.
    NormalNodeOnly,
    /// Pods try normal nodes first and tolerate virtual nodes once unschedulable.
    NormalNodePrefer,
    /// Pods are pinned to virtual nodes.
    VirtualNodeOnly,
}

impl PolicyKind {
    /// The policy for a Selector spec.
    ///
    /// When several variants are set, the first of Fair, VirtualNodeOnly,
    /// NormalNodeOnly and NormalNodePrefer wins. A spec with no recognized
    /// variant (including the reserved NamespaceResourceLimit) is VirtualNodeOnly.
    #[must_use]
    pub fn of(spec: &SelectorSpec) -> Self {
        let Some(policy) = &spec.policy else {
            return Self::VirtualNodeOnly;
        };
        if policy.fair.is_some() {
            Self::Fair
        } else if policy.virtual_node_only.is_some() {
            Self::VirtualNodeOnly
        } else if policy.normal_node_only.is_some() {
            Self::NormalNodeOnly
        } else if policy.normal_node_prefer.is_some() {
            Self::NormalNodePrefer
        } else {
            Self::VirtualNodeOnly
        }
    }

    /// Name of the policy as written in a Selector.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Fair => "Fair",
            Self::NormalNodeOnly => "NormalNodeOnly",
            Self::NormalNodePrefer => "NormalNodePrefer",
            Self::VirtualNodeOnly => "VirtualNodeOnly",
        }
    }

    /// JSON Patch operations to apply to a Pod at admission time.
    ///
    /// # Errors
    ///
    /// Returns an error if a patch value cannot be encoded.
    pub fn on_pod_creating(self, spec: &SelectorSpec, pod: &Pod) -> Result<Vec<PatchInstruction>> {
        let mut patches = Vec::new();

        match self {
            Self::NormalNodeOnly | Self::NormalNodePrefer => return Ok(patches),
            Self::Fair => {
                if let Some(patch) = add_toleration(pod)? {
                    patches.push(patch);
                }
            }
            Self::VirtualNodeOnly => {
                if let Some(patch) = add_toleration(pod)? {
                    patches.push(patch);
                }
                patches.push(PatchInstruction::replace(
                    NODE_SELECTOR_PATH,
                    serde_json::to_value(virtual_node_selector())?,
                ));
            }
        }

        if let Some(annotations) = spec.effect_annotations() {
            patches.push(merged(
                ANNOTATIONS_PATH,
                pod.metadata.annotations.as_ref(),
                annotations,
            )?);
        }
        if let Some(labels) = spec.effect_labels() {
            patches.push(merged(LABELS_PATH, pod.metadata.labels.as_ref(), labels)?);
        }

        Ok(patches)
    }

    /// Merge patch to apply to a Pod the scheduler could not place.
    ///
    /// The selector's annotations and labels are written as-is; merge-patch
    /// semantics leave the Pod's other keys untouched.
    #[must_use]
    pub fn on_pod_unscheduled(self, spec: &SelectorSpec, pod: &Pod) -> Option<PatchDocument> {
        let tolerations = pod_tolerations(pod);

        match self {
            Self::NormalNodeOnly => None,
            Self::Fair => (!tolerates_virtual_node(tolerations)).then(|| {
                PatchDocument::new()
                    .with_tolerations(with_virtual_node_toleration(tolerations))
                    .with_annotations(spec.effect_annotations())
                    .with_labels(spec.effect_labels())
            }),
            Self::NormalNodePrefer => (!tolerates_virtual_node(tolerations)).then(|| {
                PatchDocument::new().with_tolerations(with_virtual_node_toleration(tolerations))
            }),
            Self::VirtualNodeOnly => Some(tolerate_with_effect(spec, tolerations)),
        }
    }

    /// Merge patch for a Pod that has been bound to a node.
    ///
    /// Not invoked anywhere yet.
    #[must_use]
    pub fn on_pod_scheduled(self, spec: &SelectorSpec, pod: &Pod) -> Option<PatchDocument> {
        match self {
            Self::Fair | Self::NormalNodeOnly => None,
            Self::NormalNodePrefer | Self::VirtualNodeOnly => {
                Some(tolerate_with_effect(spec, pod_tolerations(pod)))
            }
        }
    }
}

impl std::fmt::Display for PolicyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

fn pod_tolerations(pod: &Pod) -> &[Toleration] {
    pod.spec
        .as_ref()
        .and_then(|s| s.tolerations.as_deref())
        .unwrap_or_default()
}

fn add_toleration(pod: &Pod) -> Result<Option<PatchInstruction>> {
    let tolerations = pod_tolerations(pod);
    if tolerates_virtual_node(tolerations) {
        return Ok(None);
    }
    let value = serde_json::to_value(with_virtual_node_toleration(tolerations))?;
    Ok(Some(PatchInstruction::add(TOLERATIONS_PATH, value)))
}

fn merged(
    path: &str,
    existing: Option<&BTreeMap<String, String>>,
    extra: &BTreeMap<String, String>,
) -> Result<PatchInstruction> {
    let mut map = existing.cloned().unwrap_or_default();
    map.extend(extra.iter().map(|(k, v)| (k.clone(), v.clone())));
    Ok(PatchInstruction::add(path, serde_json::to_value(map)?))
}

fn tolerate_with_effect(spec: &SelectorSpec, tolerations: &[Toleration]) -> PatchDocument {
    let mut doc = PatchDocument::new()
        .with_annotations(spec.effect_annotations())
        .with_labels(spec.effect_labels());
    if !tolerates_virtual_node(tolerations) {
        doc = doc.with_tolerations(with_virtual_node_toleration(tolerations));
    }
    doc
}
