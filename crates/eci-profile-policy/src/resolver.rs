//! Selector resolution.
//!
//! Given a Pod, find every Selector whose namespace and object predicates
//! match, then pick the one with the greatest priority. Equal priorities are
//! ordered by Selector name so the result is deterministic.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::sync::Arc;

use eci_profile_core::Selector;
use k8s_openapi::api::core::v1::Pod;
use kube::ResourceExt;
use tracing::debug;

use crate::cache::ResourceCache;
use crate::error::Result;

/// Resolves the Selector that governs a Pod.
pub struct SelectorResolver<C: ?Sized = dyn ResourceCache> {
    cache: Arc<C>,
}

impl<C: ?Sized> Clone for SelectorResolver<C> {
    fn clone(&self) -> Self {
        Self {
            cache: Arc::clone(&self.cache),
        }
    }
}

impl<C: ResourceCache + ?Sized> SelectorResolver<C> {
    /// Create a resolver over the given cache.
    #[must_use]
    pub fn new(cache: Arc<C>) -> Self {
        Self { cache }
    }

    /// The cache this resolver reads from.
    #[must_use]
    pub fn cache(&self) -> &Arc<C> {
        &self.cache
    }

    /// The highest-priority Selector matching `pod`, if any.
    ///
    /// # Errors
    ///
    /// Fails if the Selector list or the Pod's namespace cannot be read, or if
    /// any Selector has a malformed predicate.
    pub fn resolve(&self, pod: &Pod) -> Result<Option<Arc<Selector>>> {
        Ok(self.matching(pod)?.into_iter().next())
    }

    /// Every Selector matching `pod`, best first.
    ///
    /// # Errors
    ///
    /// Same as [`resolve`](Self::resolve).
    pub fn matching(&self, pod: &Pod) -> Result<Vec<Arc<Selector>>> {
        let selectors = self.cache.list_selectors()?;

        let namespace_labels = if selectors.iter().any(|s| s.needs_namespace_labels()) {
            let name = pod.namespace().unwrap_or_default();
            let namespace = self.cache.get_namespace(&name)?;
            namespace.labels().clone()
        } else {
            BTreeMap::new()
        };

        let mut matched = Vec::new();
        for selector in selectors {
            if selector.matches(pod, &namespace_labels)? {
                matched.push(selector);
            } else {
                debug!(selector = %selector.name_any(), "selector does not match pod");
            }
        }

        sort_by_priority(&mut matched);
        Ok(matched)
    }
}

/// Sort descending by priority, then ascending by name.
pub fn sort_by_priority(selectors: &mut [Arc<Selector>]) {
    selectors.sort_by(|a, b| compare(a, b));
}

fn compare(a: &Selector, b: &Selector) -> Ordering {
    b.spec
        .priority()
        .cmp(&a.spec.priority())
        .then_with(|| a.metadata.name.cmp(&b.metadata.name))
}
