//! Registry of per-entity nodes.

use crate::error::{BusError, Result};
use crate::paths::{normalize, validate};
use crate::subscriptions::{
    Detach, Node, NodeConfig, StringSubscription, Subscriber, Subscription, DEFAULT_BACKLOG_SIZE,
};
use crate::types::SubscriptionId;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

/// Manager configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ManagerConfig {
    /// Paths pre-populated as empty trees in every node the manager creates.
    pub initial_paths: Vec<String>,

    /// Max buffered deltas per subscriber.
    pub backlog_size: usize,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            initial_paths: Vec::new(),
            backlog_size: DEFAULT_BACKLOG_SIZE,
        }
    }
}

impl ManagerConfig {
    pub fn with_initial_paths<I, S>(paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            initial_paths: paths.into_iter().map(Into::into).collect(),
            ..Default::default()
        }
    }

    fn node_config(&self) -> NodeConfig {
        NodeConfig {
            initial_paths: self.initial_paths.clone(),
            backlog_size: self.backlog_size,
        }
    }
}

#[derive(Default)]
struct Registry {
    nodes: HashMap<String, Arc<Node>>,
    /// Owning entity of each per-entity subscription.
    owners: HashMap<SubscriptionId, String>,
    /// Subscriptions attached to every node, present and future.
    universal: BTreeMap<SubscriptionId, Subscriber>,
    stopped: bool,
}

struct Shared {
    config: ManagerConfig,
    ids: Arc<AtomicU64>,
    registry: Mutex<Registry>,
}

impl Shared {
    /// Resolve or create the node for `entity`.
    ///
    /// New nodes get every universal subscription attached before they are
    /// visible to anyone else.
    fn node(&self, entity: &str) -> Result<Arc<Node>> {
        let mut registry = self.registry.lock();
        if registry.stopped {
            return Err(BusError::Stopped);
        }
        if let Some(node) = registry.nodes.get(entity) {
            return Ok(Arc::clone(node));
        }

        let node = Node::with_ids(self.config.node_config(), Arc::clone(&self.ids));
        for subscriber in registry.universal.values() {
            if let Err(e) = node.attach(subscriber.clone()) {
                tracing::warn!(
                    entity = %entity,
                    subscription = %subscriber.id,
                    error = %e,
                    "Failed to attach universal subscription"
                );
            }
        }
        registry.nodes.insert(entity.to_string(), Arc::clone(&node));
        tracing::debug!(entity = %entity, "Created node");

        Ok(node)
    }

    fn unsubscribe(&self, id: SubscriptionId) {
        let mut registry = self.registry.lock();
        if registry.universal.remove(&id).is_some() {
            for node in registry.nodes.values() {
                node.unsubscribe(id);
            }
            return;
        }
        if let Some(entity) = registry.owners.remove(&id) {
            if let Some(node) = registry.nodes.get(&entity) {
                node.unsubscribe(id);
            }
        }
    }
}

impl Detach for Shared {
    fn detach(&self, id: SubscriptionId) {
        self.unsubscribe(id);
    }
}

/// Maps entity ids to lazily created [`Node`]s.
///
/// Lock order is manager, then node. Nodes never call back into the
/// manager, so publishes to different entities never contend beyond the
/// node lookup.
pub struct Manager {
    shared: Arc<Shared>,
}

impl Manager {
    /// Create a new manager.
    pub fn new(config: ManagerConfig) -> Self {
        Self {
            shared: Arc::new(Shared {
                config,
                ids: Arc::new(AtomicU64::new(1)),
                registry: Mutex::new(Registry::default()),
            }),
        }
    }

    /// Resolve or create the node for `entity`.
    pub fn node(&self, entity: &str) -> Result<Arc<Node>> {
        self.shared.node(entity)
    }

    /// Publish a JSON patch to `entity`.
    pub fn publish(&self, entity: &str, patch: &str) -> Result<()> {
        self.shared.node(entity)?.publish(patch)
    }

    /// Publish an already parsed JSON patch to `entity`.
    pub fn publish_json(&self, entity: &str, patch: serde_json::Value) -> Result<()> {
        self.shared.node(entity)?.publish_json(patch)
    }

    /// Subscribe to `paths` under `entity`.
    pub fn subscribe<S: AsRef<str>>(&self, entity: &str, paths: &[S]) -> Result<Subscription> {
        let node = self.shared.node(entity)?;
        let owner: Weak<dyn Detach> = Arc::downgrade(&self.shared) as Weak<Shared>;
        let sub = node.subscribe_with_owner(paths, owner)?;

        self.shared
            .registry
            .lock()
            .owners
            .insert(sub.id, entity.to_string());
        Ok(sub)
    }

    /// Subscribe to a single path under `entity`, receiving bare strings.
    pub fn subscribe_string(&self, entity: &str, path: &str) -> Result<StringSubscription> {
        let sub = self.subscribe(entity, &[path])?;
        Ok(StringSubscription::spawn(
            sub,
            path,
            self.shared.config.backlog_size.max(1),
            false,
        ))
    }

    /// Subscribe to `paths` under every entity, including ones created later.
    ///
    /// Every existing node delivers its own snapshot on the shared channel.
    /// A node that fails to take the subscription is logged and skipped.
    pub fn subscribe_all<S: AsRef<str>>(&self, paths: &[S]) -> Result<Subscription> {
        for path in paths {
            validate(path.as_ref())?;
        }
        let paths = normalize(paths);

        let mut registry = self.shared.registry.lock();
        if registry.stopped {
            return Err(BusError::Stopped);
        }

        let id = SubscriptionId(self.shared.ids.fetch_add(1, Ordering::SeqCst));
        let (subscriber, receiver) = Subscriber::new(
            id,
            paths.clone(),
            self.shared.config.backlog_size.max(1),
        );

        for (entity, node) in &registry.nodes {
            if let Err(e) = node.attach(subscriber.clone()) {
                tracing::warn!(
                    entity = %entity,
                    subscription = %id,
                    error = %e,
                    "Failed to attach universal subscription"
                );
            }
        }
        registry.universal.insert(id, subscriber);

        let owner: Weak<dyn Detach> = Arc::downgrade(&self.shared) as Weak<Shared>;
        Ok(Subscription::new(id, paths, receiver, owner))
    }

    /// Remove a subscription created by this manager. Unknown ids are a no-op.
    pub fn unsubscribe(&self, id: SubscriptionId) {
        self.shared.unsubscribe(id);
    }

    /// Stop every node. Idempotent; the manager rejects further use.
    pub fn stop(&self) {
        let mut registry = self.shared.registry.lock();
        if registry.stopped {
            return;
        }
        registry.stopped = true;
        for node in registry.nodes.values() {
            node.stop();
        }
        let count = registry.nodes.len();
        registry.nodes.clear();
        registry.owners.clear();
        registry.universal.clear();
        tracing::debug!(nodes = count, "Manager stopped");
    }

    pub fn is_stopped(&self) -> bool {
        self.shared.registry.lock().stopped
    }

    /// Ids of all entities with a node, sorted.
    pub fn entities(&self) -> Vec<String> {
        let mut entities: Vec<String> = self.shared.registry.lock().nodes.keys().cloned().collect();
        entities.sort();
        entities
    }
}

impl Default for Manager {
    fn default() -> Self {
        Self::new(ManagerConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_nodes_created_lazily() {
        let manager = Manager::default();
        assert!(manager.entities().is_empty());

        manager.publish("b", r#"{"x":1}"#).unwrap();
        let _sub = manager.subscribe("a", &["x"]).unwrap();

        assert_eq!(manager.entities(), vec!["a", "b"]);
        assert!(Arc::ptr_eq(
            &manager.node("a").unwrap(),
            &manager.node("a").unwrap()
        ));
    }

    #[test]
    fn test_unsubscribe_routes_to_owner() {
        let manager = Manager::default();
        let sub = manager.subscribe("dev", &["x"]).unwrap();
        let node = manager.node("dev").unwrap();
        assert_eq!(node.subscription_count(), 1);

        sub.unsubscribe();
        assert_eq!(node.subscription_count(), 0);
        assert!(manager.shared.registry.lock().owners.is_empty());

        // Unknown ids are ignored
        manager.unsubscribe(SubscriptionId(12345));
    }

    #[test]
    fn test_universal_unsubscribe_detaches_everywhere() {
        let manager = Manager::default();
        manager.publish("a", r#"{"x":1}"#).unwrap();
        let sub = manager.subscribe_all(&["x"]).unwrap();
        manager.publish("b", r#"{"x":2}"#).unwrap();

        assert_eq!(manager.node("a").unwrap().subscription_count(), 1);
        assert_eq!(manager.node("b").unwrap().subscription_count(), 1);

        manager.unsubscribe(sub.id);
        assert_eq!(manager.node("a").unwrap().subscription_count(), 0);
        assert_eq!(manager.node("b").unwrap().subscription_count(), 0);

        // Drain what was delivered, then the channel is closed
        while sub.try_recv().is_ok() {}
        assert!(sub.recv_timeout(Duration::from_millis(50)).is_err());
    }

    #[test]
    fn test_dropped_subscriptions_leave_no_entries() {
        let manager = Manager::default();
        for _ in 0..100 {
            drop(manager.subscribe("dev", &["x"]).unwrap());
            drop(manager.subscribe_all(&["x"]).unwrap());
        }
        manager.publish("dev", r#"{"x":1}"#).unwrap();
        manager.publish("later", r#"{"x":1}"#).unwrap();

        {
            let registry = manager.shared.registry.lock();
            assert!(registry.owners.is_empty());
            assert!(registry.universal.is_empty());
        }
        assert_eq!(manager.node("dev").unwrap().subscription_count(), 0);
        assert_eq!(manager.node("later").unwrap().subscription_count(), 0);
    }

    #[test]
    fn test_ids_shared_across_nodes() {
        let manager = Manager::default();
        let a = manager.subscribe("a", &["x"]).unwrap();
        let b = manager.subscribe("b", &["x"]).unwrap();
        let all = manager.subscribe_all(&["x"]).unwrap();

        assert!(a.id < b.id);
        assert!(b.id < all.id);
    }

    #[test]
    fn test_stop_is_idempotent() {
        let manager = Manager::default();
        let node = manager.node("a").unwrap();

        manager.stop();
        manager.stop();

        assert!(manager.is_stopped());
        assert!(node.is_stopped());
        assert!(manager.entities().is_empty());
    }

    #[test]
    fn test_config_from_json() {
        let config: ManagerConfig =
            serde_json::from_str(r#"{"initial_paths":["login"]}"#).unwrap();
        assert_eq!(config.initial_paths, vec!["login"]);
        assert_eq!(config.backlog_size, DEFAULT_BACKLOG_SIZE);
    }
}
