//! Watched, locally cached views of cluster resources.
//!
//! One informer task runs per resource kind. Each task feeds a kube reflector
//! store and then notifies its registered [`ResourceEventHandler`]s, so events
//! of one kind are delivered in order while different kinds run concurrently.
//! Handlers run on the delivering task; a slow handler delays every later
//! event of that kind.
//!
//! Watches never re-deliver an unchanged object, so every informer also
//! resyncs: each resync period the whole store is replayed to its handlers as
//! updates whose old and new objects are identical.

use std::fmt::Debug;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use eci_profile_core::{LabelPredicate, Selector};
use eci_profile_policy::{LookupError, ResourceCache};
use futures::StreamExt;
use k8s_openapi::api::core::v1::{Namespace, Node, Pod, ResourceQuota};
use kube::runtime::reflector::{self, store::Writer, ObjectRef, Store};
use kube::runtime::watcher::{self, watcher};
use kube::runtime::WatchStreamExt;
use kube::{Api, Client, Resource, ResourceExt};
use serde::de::DeserializeOwned;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::error::{ControllerError, Result};

/// How often each informer replays its store to its handlers.
pub const DEFAULT_RESYNC_PERIOD: Duration = Duration::from_secs(30);

/// Resource types the cache can watch.
pub trait CachedResource:
    Resource<DynamicType = ()> + Clone + DeserializeOwned + Debug + Send + Sync + 'static
{
}

impl<K> CachedResource for K where
    K: Resource<DynamicType = ()> + Clone + DeserializeOwned + Debug + Send + Sync + 'static
{
}

/// Callbacks for changes to one resource kind.
///
/// `on_update` receives the previously cached object; after a watch relist or
/// a resync it may be identical to the new one.
#[async_trait]
pub trait ResourceEventHandler<K: Send + Sync + 'static>: Send + Sync {
    /// An object appeared in the cache.
    async fn on_add(&self, obj: &K);

    /// A cached object changed.
    async fn on_update(&self, old: &K, new: &K);

    /// An object was removed from the cache.
    async fn on_delete(&self, obj: &K);
}

type Handlers<K> = Vec<Arc<dyn ResourceEventHandler<K>>>;

/// The cached collection of one resource kind.
pub struct Informer<K: CachedResource> {
    kind: &'static str,
    store: Store<K>,
    synced: Arc<AtomicBool>,
}

impl<K: CachedResource> Informer<K> {
    fn new(kind: &'static str) -> (Self, Feed<K>) {
        let (store, writer) = reflector::store();
        let synced = Arc::new(AtomicBool::new(false));
        let informer = Self {
            kind,
            store,
            synced: Arc::clone(&synced),
        };
        let feed = Feed {
            kind,
            writer,
            synced,
            handlers: Vec::new(),
        };
        (informer, feed)
    }

    /// Whether the initial list has been received.
    #[must_use]
    pub fn has_synced(&self) -> bool {
        self.synced.load(Ordering::Acquire)
    }

    /// Every cached object.
    #[must_use]
    pub fn list(&self) -> Vec<Arc<K>> {
        self.store.state()
    }

    /// Cached objects whose labels satisfy `predicate`.
    #[must_use]
    pub fn list_matching(&self, predicate: &LabelPredicate) -> Vec<Arc<K>> {
        self.store
            .state()
            .into_iter()
            .filter(|obj| predicate.matches(obj.labels()))
            .collect()
    }

    /// One object by namespace and name. Pass `None` for cluster-scoped kinds.
    #[must_use]
    pub fn get(&self, namespace: Option<&str>, name: &str) -> Option<Arc<K>> {
        let key = match namespace {
            Some(ns) => ObjectRef::new(name).within(ns),
            None => ObjectRef::new(name),
        };
        self.store.get(&key)
    }

    async fn wait_until_ready(&self) -> Result<()> {
        self.store
            .wait_until_ready()
            .await
            .map_err(|_| ControllerError::CacheSync(self.kind))
    }

    fn ensure_synced(&self) -> std::result::Result<(), LookupError> {
        if self.has_synced() {
            Ok(())
        } else {
            Err(LookupError::Unavailable {
                kind: self.kind,
                reason: "cache has not synced".to_string(),
            })
        }
    }
}

/// The write side of an [`Informer`]: its store writer and subscribed handlers.
struct Feed<K: CachedResource> {
    kind: &'static str,
    writer: Writer<K>,
    synced: Arc<AtomicBool>,
    handlers: Handlers<K>,
}

impl<K: CachedResource> Feed<K> {
    fn into_dispatcher(self) -> Dispatcher<K> {
        Dispatcher {
            kind: self.kind,
            reader: self.writer.as_reader(),
            writer: self.writer,
            synced: self.synced,
            handlers: self.handlers,
        }
    }

    fn spawn(self, api: Api<K>, resync_period: Duration) -> JoinHandle<()> {
        tokio::spawn(self.into_dispatcher().run(api, resync_period))
    }
}

/// Applies watch events to a store and fans them out to handlers.
pub(crate) struct Dispatcher<K: CachedResource> {
    kind: &'static str,
    writer: Writer<K>,
    reader: Store<K>,
    synced: Arc<AtomicBool>,
    handlers: Handlers<K>,
}

impl<K: CachedResource> Dispatcher<K> {
    pub(crate) async fn process(&mut self, event: watcher::Event<K>) {
        let previous = match &event {
            watcher::Event::Apply(obj) | watcher::Event::InitApply(obj) => {
                self.reader.get(&ObjectRef::from_obj(obj))
            }
            _ => None,
        };

        self.writer.apply_watcher_event(&event);

        match event {
            watcher::Event::Apply(obj) | watcher::Event::InitApply(obj) => match previous {
                Some(old) => {
                    for handler in &self.handlers {
                        handler.on_update(&old, &obj).await;
                    }
                }
                None => {
                    for handler in &self.handlers {
                        handler.on_add(&obj).await;
                    }
                }
            },
            watcher::Event::Delete(obj) => {
                for handler in &self.handlers {
                    handler.on_delete(&obj).await;
                }
            }
            watcher::Event::Init => {
                debug!(kind = self.kind, "list started");
            }
            watcher::Event::InitDone => {
                self.synced.store(true, Ordering::Release);
                info!(
                    kind = self.kind,
                    objects = self.reader.state().len(),
                    "cache synced"
                );
            }
        }
    }

    /// Replay every cached object to the handlers as an unchanged update.
    ///
    /// Does nothing until the initial list has completed.
    pub(crate) async fn resync(&mut self) {
        if self.handlers.is_empty() || !self.synced.load(Ordering::Acquire) {
            return;
        }

        let objects = self.reader.state();
        debug!(kind = self.kind, objects = objects.len(), "resync");
        for obj in &objects {
            for handler in &self.handlers {
                handler.on_update(obj, obj).await;
            }
        }
    }

    async fn run(mut self, api: Api<K>, resync_period: Duration) {
        let stream = watcher(api, watcher::Config::default()).default_backoff();
        futures::pin_mut!(stream);

        let mut resync = interval_at(Instant::now() + resync_period, resync_period);
        resync.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            kind = self.kind,
            resync_seconds = resync_period.as_secs(),
            "starting informer"
        );

        loop {
            tokio::select! {
                event = stream.next() => match event {
                    Some(Ok(event)) => self.process(event).await,
                    Some(Err(e)) => {
                        warn!(kind = self.kind, error = %e, "watch error, will retry");
                    }
                    None => break,
                },
                _ = resync.tick() => self.resync().await,
            }
        }

        warn!(kind = self.kind, "informer exited unexpectedly");
    }
}

/// Registers event handlers for a [`KubeResourceCache`] and starts its informers.
pub struct CacheBuilder {
    resync_period: Duration,
    pods: Feed<Pod>,
    nodes: Feed<Node>,
    namespaces: Feed<Namespace>,
    resource_quotas: Feed<ResourceQuota>,
    selectors: Feed<Selector>,
}

impl CacheBuilder {
    /// Replay period for every informer. Defaults to [`DEFAULT_RESYNC_PERIOD`].
    ///
    /// A zero period is replaced by the default.
    #[must_use]
    pub fn resync_period(mut self, period: Duration) -> Self {
        self.resync_period = if period.is_zero() {
            DEFAULT_RESYNC_PERIOD
        } else {
            period
        };
        self
    }

    /// Subscribe to Pod events.
    #[must_use]
    pub fn on_pods(mut self, handler: Arc<dyn ResourceEventHandler<Pod>>) -> Self {
        self.pods.handlers.push(handler);
        self
    }

    /// Subscribe to Node events.
    #[must_use]
    pub fn on_nodes(mut self, handler: Arc<dyn ResourceEventHandler<Node>>) -> Self {
        self.nodes.handlers.push(handler);
        self
    }

    /// Subscribe to Namespace events.
    #[must_use]
    pub fn on_namespaces(mut self, handler: Arc<dyn ResourceEventHandler<Namespace>>) -> Self {
        self.namespaces.handlers.push(handler);
        self
    }

    /// Subscribe to ResourceQuota events.
    #[must_use]
    pub fn on_resource_quotas(
        mut self,
        handler: Arc<dyn ResourceEventHandler<ResourceQuota>>,
    ) -> Self {
        self.resource_quotas.handlers.push(handler);
        self
    }

    /// Subscribe to Selector events.
    #[must_use]
    pub fn on_selectors(mut self, handler: Arc<dyn ResourceEventHandler<Selector>>) -> Self {
        self.selectors.handlers.push(handler);
        self
    }

    /// Spawn one informer per kind.
    ///
    /// Core kinds and Selectors are watched independently. Must be called from
    /// within a Tokio runtime; dropping the returned [`Informers`] stops them.
    #[must_use]
    pub fn start(self, client: &Client) -> Informers {
        let period = self.resync_period;
        info!("starting core resource informers");
        let mut tasks = vec![
            self.pods.spawn(Api::all(client.clone()), period),
            self.nodes.spawn(Api::all(client.clone()), period),
            self.namespaces.spawn(Api::all(client.clone()), period),
            self.resource_quotas.spawn(Api::all(client.clone()), period),
        ];
        info!("starting selector informer");
        tasks.push(self.selectors.spawn(Api::all(client.clone()), period));
        Informers { tasks }
    }
}

/// Handles to running informer tasks. Dropping this stops them.
pub struct Informers {
    tasks: Vec<JoinHandle<()>>,
}

impl Informers {
    /// Number of running informers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    /// Whether no informers were started.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}

impl Drop for Informers {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

/// Reflector-backed cache of Pods, Nodes, Namespaces, ResourceQuotas and Selectors.
pub struct KubeResourceCache {
    pods: Informer<Pod>,
    nodes: Informer<Node>,
    namespaces: Informer<Namespace>,
    resource_quotas: Informer<ResourceQuota>,
    selectors: Informer<Selector>,
}

impl KubeResourceCache {
    /// An empty cache and the builder that will feed it.
    ///
    /// The cache stays empty until [`CacheBuilder::start`] is called; use
    /// [`wait_for_cache_sync`](Self::wait_for_cache_sync) before reading.
    #[must_use]
    pub fn new() -> (Arc<Self>, CacheBuilder) {
        let (pods, pods_feed) = Informer::new("Pod");
        let (nodes, nodes_feed) = Informer::new("Node");
        let (namespaces, namespaces_feed) = Informer::new("Namespace");
        let (resource_quotas, quotas_feed) = Informer::new("ResourceQuota");
        let (selectors, selectors_feed) = Informer::new("Selector");

        let cache = Arc::new(Self {
            pods,
            nodes,
            namespaces,
            resource_quotas,
            selectors,
        });
        let builder = CacheBuilder {
            resync_period: DEFAULT_RESYNC_PERIOD,
            pods: pods_feed,
            nodes: nodes_feed,
            namespaces: namespaces_feed,
            resource_quotas: quotas_feed,
            selectors: selectors_feed,
        };
        (cache, builder)
    }

    /// Block until every informer has received its initial list.
    ///
    /// # Errors
    ///
    /// Returns [`ControllerError::CacheSync`] if an informer stops first.
    pub async fn wait_for_cache_sync(&self) -> Result<()> {
        info!("waiting for caches to sync");
        tokio::try_join!(
            self.pods.wait_until_ready(),
            self.nodes.wait_until_ready(),
            self.namespaces.wait_until_ready(),
            self.resource_quotas.wait_until_ready(),
            self.selectors.wait_until_ready(),
        )?;
        info!("all caches synced");
        Ok(())
    }

    /// Whether every informer has received its initial list.
    #[must_use]
    pub fn has_synced(&self) -> bool {
        self.pods.has_synced()
            && self.nodes.has_synced()
            && self.namespaces.has_synced()
            && self.resource_quotas.has_synced()
            && self.selectors.has_synced()
    }

    /// Cached Pods, optionally restricted to one namespace, filtered by labels.
    #[must_use]
    pub fn list_pods(&self, namespace: Option<&str>, predicate: &LabelPredicate) -> Vec<Arc<Pod>> {
        self.pods
            .list_matching(predicate)
            .into_iter()
            .filter(|pod| namespace.map_or(true, |ns| pod.namespace().as_deref() == Some(ns)))
            .collect()
    }

    /// One cached Pod.
    #[must_use]
    pub fn get_pod(&self, namespace: &str, name: &str) -> Option<Arc<Pod>> {
        self.pods.get(Some(namespace), name)
    }

    /// Cached Nodes filtered by labels.
    #[must_use]
    pub fn list_nodes(&self, predicate: &LabelPredicate) -> Vec<Arc<Node>> {
        self.nodes.list_matching(predicate)
    }

    /// One cached Node.
    #[must_use]
    pub fn get_node(&self, name: &str) -> Option<Arc<Node>> {
        self.nodes.get(None, name)
    }

    /// Cached Namespaces filtered by labels.
    #[must_use]
    pub fn list_namespaces(&self, predicate: &LabelPredicate) -> Vec<Arc<Namespace>> {
        self.namespaces.list_matching(predicate)
    }

    /// Cached ResourceQuotas, optionally restricted to one namespace.
    #[must_use]
    pub fn list_resource_quotas(&self, namespace: Option<&str>) -> Vec<Arc<ResourceQuota>> {
        self.resource_quotas
            .list()
            .into_iter()
            .filter(|q| namespace.map_or(true, |ns| q.namespace().as_deref() == Some(ns)))
            .collect()
    }

    /// One cached ResourceQuota.
    #[must_use]
    pub fn get_resource_quota(&self, namespace: &str, name: &str) -> Option<Arc<ResourceQuota>> {
        self.resource_quotas.get(Some(namespace), name)
    }

    /// Cached Selectors.
    #[must_use]
    pub fn selectors(&self) -> &Informer<Selector> {
        &self.selectors
    }

    /// One cached Selector.
    #[must_use]
    pub fn get_selector(&self, name: &str) -> Option<Arc<Selector>> {
        self.selectors.get(None, name)
    }
}

impl ResourceCache for KubeResourceCache {
    fn list_selectors(&self) -> std::result::Result<Vec<Arc<Selector>>, LookupError> {
        self.selectors.ensure_synced()?;
        Ok(self.selectors.list())
    }

    fn get_namespace(&self, name: &str) -> std::result::Result<Arc<Namespace>, LookupError> {
        self.namespaces.ensure_synced()?;
        self.namespaces
            .get(None, name)
            .ok_or_else(|| LookupError::NamespaceNotFound(name.to_string()))
    }
}
