//! Per-entity document store with path-scoped fan-out.

use crate::error::{BusError, Result};
use crate::paths::{ancestors, leaf_paths, normalize, read, validate, write};
use crate::types::{tree_from_json, SubscriptionId, Tree, Value};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use super::types::{Delivery, Detach, StringSubscription, Subscriber, Subscription};

/// Default number of deltas buffered per subscriber.
pub const DEFAULT_BACKLOG_SIZE: usize = 10;

/// Node configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Paths pre-populated as empty trees, so subscribers see them as
    /// present before anything is published.
    pub initial_paths: Vec<String>,

    /// Max buffered deltas per subscriber. Newer deltas are dropped once
    /// full. Clamped to at least 1 so the initial snapshot always fits.
    pub backlog_size: usize,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            initial_paths: Vec::new(),
            backlog_size: DEFAULT_BACKLOG_SIZE,
        }
    }
}

/// Everything guarded by the node lock.
#[derive(Default)]
struct NodeState {
    stopped: bool,
    tree: Tree,
    /// Ordered by id, which is also delivery order.
    subscribers: BTreeMap<SubscriptionId, Subscriber>,
    /// Subscribed path -> subscribers on exactly that path.
    index: HashMap<String, Vec<SubscriptionId>>,
}

impl NodeState {
    /// Index a subscriber and send it the current snapshot.
    fn insert(&mut self, subscriber: Subscriber) {
        for path in &subscriber.paths {
            self.index
                .entry(path.clone())
                .or_default()
                .push(subscriber.id);
        }
        subscriber.deliver(&self.tree);
        self.subscribers.insert(subscriber.id, subscriber);
    }

    fn remove(&mut self, id: SubscriptionId) -> Option<Subscriber> {
        let subscriber = self.subscribers.remove(&id)?;
        for path in &subscriber.paths {
            if let Some(ids) = self.index.get_mut(path) {
                ids.retain(|other| *other != id);
                if ids.is_empty() {
                    self.index.remove(path);
                }
            }
        }
        Some(subscriber)
    }
}

/// A document store for one entity.
///
/// Owns the document tree, the live subscribers, and a path index used to
/// find the subscribers a patch touches. All of it sits behind one lock, so
/// a subscriber's initial snapshot always reflects some serialization of
/// prior publishes.
pub struct Node {
    state: Mutex<NodeState>,
    /// Source of subscription ids. Shared by all nodes of a `Manager`.
    ids: Arc<AtomicU64>,
    backlog_size: usize,
}

impl Node {
    /// Create a standalone node.
    pub fn new(config: NodeConfig) -> Arc<Self> {
        Self::with_ids(config, Arc::new(AtomicU64::new(1)))
    }

    pub(crate) fn with_ids(config: NodeConfig, ids: Arc<AtomicU64>) -> Arc<Self> {
        let mut tree = Tree::new();
        for path in &config.initial_paths {
            if let Err(e) = validate(path) {
                tracing::warn!(error = %e, "Skipping invalid initial path");
                continue;
            }
            write(&mut tree, path, Value::Tree(Tree::new()));
        }

        Arc::new(Self {
            state: Mutex::new(NodeState {
                tree,
                ..Default::default()
            }),
            ids,
            backlog_size: config.backlog_size.max(1),
        })
    }

    // --- Publishing ---

    /// Merge a JSON patch into the tree and notify covering subscribers.
    ///
    /// Fails with `MalformedPatch` if `patch` is not a JSON object, and with
    /// `Stopped` after `stop`. Arrays inside the patch are skipped.
    pub fn publish(&self, patch: &str) -> Result<()> {
        if self.is_stopped() {
            return Err(BusError::Stopped);
        }
        let parsed: serde_json::Value =
            serde_json::from_str(patch).map_err(|e| BusError::MalformedPatch(e.to_string()))?;
        self.publish_json(parsed)
    }

    /// Same as `publish`, for an already parsed patch.
    pub fn publish_json(&self, patch: serde_json::Value) -> Result<()> {
        if self.is_stopped() {
            return Err(BusError::Stopped);
        }
        match patch {
            serde_json::Value::Object(map) => self.publish_tree(&tree_from_json(map)),
            other => Err(BusError::MalformedPatch(format!(
                "expected a JSON object, got {}",
                json_kind(&other)
            ))),
        }
    }

    fn publish_tree(&self, patch: &Tree) -> Result<()> {
        let mut guard = self.state.lock();
        if guard.stopped {
            return Err(BusError::Stopped);
        }
        let state = &mut *guard;

        let leaves = leaf_paths(patch);
        let mut touched = BTreeSet::new();
        for leaf in &leaves {
            if let Some(value) = read(patch, leaf) {
                write(&mut state.tree, leaf, value.clone());
            }
            for prefix in ancestors(leaf) {
                if let Some(ids) = state.index.get(prefix) {
                    touched.extend(ids.iter().copied());
                }
            }
        }

        tracing::trace!(
            leaves = leaves.len(),
            subscribers = touched.len(),
            "Applied patch"
        );

        // Deltas come from the patch, not the merged tree.
        let mut disconnected = Vec::new();
        for id in touched {
            if let Some(subscriber) = state.subscribers.get(&id) {
                if subscriber.deliver(patch) == Delivery::Disconnected {
                    disconnected.push(id);
                }
            }
        }

        for id in disconnected {
            state.remove(id);
            tracing::debug!(subscription = %id, "Pruned subscriber with dropped receiver");
        }

        Ok(())
    }

    // --- Subscribing ---

    /// Subscribe to `paths`.
    ///
    /// The paths are normalized, and the current tree restricted to them is
    /// queued on the returned channel before this returns (unless empty).
    pub fn subscribe<S: AsRef<str>>(self: &Arc<Self>, paths: &[S]) -> Result<Subscription> {
        let owner: Weak<dyn Detach> = Arc::downgrade(self) as Weak<Node>;
        self.subscribe_with_owner(paths, owner)
    }

    /// Subscribe to a single path, receiving bare string values.
    pub fn subscribe_string(self: &Arc<Self>, path: &str) -> Result<StringSubscription> {
        let sub = self.subscribe(&[path])?;
        Ok(StringSubscription::spawn(sub, path, self.backlog_size, false))
    }

    /// Like `subscribe_string`, minus the value the path already holds.
    pub(crate) fn subscribe_string_updates(
        self: &Arc<Self>,
        path: &str,
    ) -> Result<StringSubscription> {
        let sub = self.subscribe(&[path])?;
        Ok(StringSubscription::spawn(sub, path, self.backlog_size, true))
    }

    pub(crate) fn subscribe_with_owner<S: AsRef<str>>(
        &self,
        paths: &[S],
        owner: Weak<dyn Detach>,
    ) -> Result<Subscription> {
        for path in paths {
            validate(path.as_ref())?;
        }
        let paths = normalize(paths);

        let mut state = self.state.lock();
        if state.stopped {
            return Err(BusError::Stopped);
        }

        let id = SubscriptionId(self.ids.fetch_add(1, Ordering::SeqCst));
        let (subscriber, receiver) = Subscriber::new(id, paths.clone(), self.backlog_size);
        state.insert(subscriber);

        Ok(Subscription::new(id, paths, receiver, owner))
    }

    /// Attach an existing subscriber (shared with other nodes).
    pub(crate) fn attach(&self, subscriber: Subscriber) -> Result<()> {
        let mut state = self.state.lock();
        if state.stopped {
            return Err(BusError::Stopped);
        }
        state.insert(subscriber);
        Ok(())
    }

    /// Remove a subscription. Unknown ids and stopped nodes are a no-op.
    pub fn unsubscribe(&self, id: SubscriptionId) {
        let mut state = self.state.lock();
        if state.stopped {
            return;
        }
        if state.remove(id).is_some() {
            tracing::debug!(subscription = %id, "Unsubscribed");
        }
    }

    // --- Lifecycle ---

    /// Close every subscriber channel and release the tree. Idempotent.
    ///
    /// A stopped node rejects `publish` and `subscribe` with `Stopped`.
    pub fn stop(&self) {
        let mut state = self.state.lock();
        if state.stopped {
            return;
        }
        state.stopped = true;
        let closed = state.subscribers.len();
        state.subscribers.clear();
        state.index.clear();
        state.tree.clear();
        tracing::debug!(subscribers = closed, "Node stopped");
    }

    pub fn is_stopped(&self) -> bool {
        self.state.lock().stopped
    }

    // --- Introspection ---

    /// Copy of the current document tree.
    pub fn snapshot(&self) -> Result<Tree> {
        let state = self.state.lock();
        if state.stopped {
            return Err(BusError::Stopped);
        }
        Ok(state.tree.clone())
    }

    /// Number of live subscriptions.
    pub fn subscription_count(&self) -> usize {
        self.state.lock().subscribers.len()
    }
}

impl Detach for Node {
    fn detach(&self, id: SubscriptionId) {
        self.unsubscribe(id);
    }
}

fn json_kind(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "bool",
        serde_json::Value::Number(_) => "number",
        serde_json::Value::String(_) => "string",
        serde_json::Value::Array(_) => "array",
        serde_json::Value::Object(_) => "object",
    }
}
