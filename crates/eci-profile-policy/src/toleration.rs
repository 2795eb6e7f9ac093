//! The well-known virtual-node toleration and node selector.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::Toleration;

/// Taint key carried by virtual nodes; also used as the node-selector key.
pub const VIRTUAL_NODE_KEY: &str = "k8s.aliyun.com/vnode";

/// Value paired with [`VIRTUAL_NODE_KEY`].
pub const VIRTUAL_NODE_VALUE: &str = "true";

const OPERATOR_EQUAL: &str = "Equal";
const EFFECT_NO_SCHEDULE: &str = "NoSchedule";

/// The toleration that lets a Pod schedule onto a virtual node.
#[must_use]
pub fn virtual_node_toleration() -> Toleration {
    Toleration {
        key: Some(VIRTUAL_NODE_KEY.to_string()),
        value: Some(VIRTUAL_NODE_VALUE.to_string()),
        operator: Some(OPERATOR_EQUAL.to_string()),
        effect: Some(EFFECT_NO_SCHEDULE.to_string()),
        toleration_seconds: None,
    }
}

/// Whether the list already contains the virtual-node toleration.
///
/// Key, value, operator and effect must all be equal; a toleration on the same
/// key with a different operator or effect does not count.
#[must_use]
pub fn tolerates_virtual_node(tolerations: &[Toleration]) -> bool {
    tolerations.iter().any(|t| {
        t.key.as_deref() == Some(VIRTUAL_NODE_KEY)
            && t.value.as_deref() == Some(VIRTUAL_NODE_VALUE)
            && t.operator.as_deref() == Some(OPERATOR_EQUAL)
            && t.effect.as_deref() == Some(EFFECT_NO_SCHEDULE)
    })
}

/// `existing` with the virtual-node toleration appended.
#[must_use]
pub fn with_virtual_node_toleration(existing: &[Toleration]) -> Vec<Toleration> {
    let mut tolerations = existing.to_vec();
    tolerations.push(virtual_node_toleration());
    tolerations
}

/// A node selector that only virtual nodes satisfy.
#[must_use]
pub fn virtual_node_selector() -> BTreeMap<String, String> {
    BTreeMap::from([(VIRTUAL_NODE_KEY.to_string(), VIRTUAL_NODE_VALUE.to_string())])
}
