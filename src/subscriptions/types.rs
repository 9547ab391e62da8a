//! Subscription handles and the per-subscriber delivery state.

use crate::paths::{project, read};
use crate::types::{tree_from_json, SubscriptionId, Tree, Value};
use crossbeam_channel::{
    bounded, select, Receiver, RecvError, RecvTimeoutError, Sender, TryRecvError, TrySendError,
};
use std::sync::Weak;
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Whoever can remove a subscription: a `Node`, or the `Manager` routing
/// to the right `Node`.
pub(crate) trait Detach: Send + Sync {
    fn detach(&self, id: SubscriptionId);
}

/// Outcome of a single delivery attempt.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Delivery {
    Sent,
    /// The projection was empty; nothing to say.
    Empty,
    /// Backlog full, the delta was dropped.
    Dropped,
    /// The receiving end is gone.
    Disconnected,
}

/// Internal subscription state held by a `Node`.
///
/// Cloned when one subscription is attached to several nodes; the channel
/// closes once every clone is gone.
#[derive(Clone)]
pub(crate) struct Subscriber {
    pub(crate) id: SubscriptionId,
    pub(crate) paths: Vec<String>,
    sender: Sender<String>,
}

impl Subscriber {
    pub(crate) fn new(
        id: SubscriptionId,
        paths: Vec<String>,
        backlog_size: usize,
    ) -> (Self, Receiver<String>) {
        let (sender, receiver) = bounded(backlog_size);
        (Self { id, paths, sender }, receiver)
    }

    /// Project `source` onto this subscriber's paths and send it.
    ///
    /// Never blocks. When the backlog is full the new delta is dropped and
    /// the queued ones are kept.
    pub(crate) fn deliver(&self, source: &Tree) -> Delivery {
        let delta = project(source, &self.paths);
        if delta.is_empty() {
            return Delivery::Empty;
        }

        let payload = match serde_json::to_string(&delta) {
            Ok(payload) => payload,
            Err(e) => {
                tracing::error!(subscription = %self.id, error = %e, "Failed to encode delta");
                return Delivery::Empty;
            }
        };

        match self.sender.try_send(payload) {
            Ok(()) => Delivery::Sent,
            Err(TrySendError::Full(_)) => {
                tracing::debug!(subscription = %self.id, "Backlog full, dropping delta");
                Delivery::Dropped
            }
            Err(TrySendError::Disconnected(_)) => Delivery::Disconnected,
        }
    }
}

/// Handle to a path subscription.
///
/// Each item on the receiver is a JSON object holding only the branches
/// under the subscribed paths. The channel closes when the subscription is
/// removed or its node is stopped.
pub struct Subscription {
    pub id: SubscriptionId,
    /// Channel to receive deltas.
    pub receiver: Receiver<String>,
    paths: Vec<String>,
    owner: Weak<dyn Detach>,
}

impl Subscription {
    pub(crate) fn new(
        id: SubscriptionId,
        paths: Vec<String>,
        receiver: Receiver<String>,
        owner: Weak<dyn Detach>,
    ) -> Self {
        Self {
            id,
            receiver,
            paths,
            owner,
        }
    }

    /// The normalized paths this subscription covers.
    pub fn paths(&self) -> &[String] {
        &self.paths
    }

    /// Receive the next delta (blocking).
    pub fn recv(&self) -> Result<String, RecvError> {
        self.receiver.recv()
    }

    /// Try to receive a delta (non-blocking).
    pub fn try_recv(&self) -> Result<String, TryRecvError> {
        self.receiver.try_recv()
    }

    /// Receive with timeout.
    pub fn recv_timeout(&self, timeout: Duration) -> Result<String, RecvTimeoutError> {
        self.receiver.recv_timeout(timeout)
    }

    /// Ask the owner to remove this subscription. Idempotent.
    pub fn unsubscribe(&self) {
        if let Some(owner) = self.owner.upgrade() {
            owner.detach(self.id);
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

/// A single-path subscription that yields bare string values.
///
/// A pump thread reads each delta from the underlying subscription and
/// forwards the string at the path. Absent paths, nulls and non-string
/// values all come through as `""`. The pump is stopped and joined on
/// `unsubscribe` or drop.
pub struct StringSubscription {
    pub id: SubscriptionId,
    /// Channel to receive values.
    pub receiver: Receiver<String>,
    path: String,
    inner: Subscription,
    cancel: Option<Sender<()>>,
    pump: Option<JoinHandle<()>>,
}

impl StringSubscription {
    /// Start forwarding values from `sub`.
    ///
    /// With `skip_snapshot`, whatever `sub` has already queued (its initial
    /// snapshot) is discarded, so only values published afterwards arrive.
    pub(crate) fn spawn(
        sub: Subscription,
        path: &str,
        backlog_size: usize,
        skip_snapshot: bool,
    ) -> Self {
        if skip_snapshot {
            while sub.try_recv().is_ok() {}
        }

        let (sender, receiver) = bounded(backlog_size);
        let (cancel, cancelled) = bounded::<()>(0);

        let inbound = sub.receiver.clone();
        let pump_path = path.to_string();
        let pump = thread::spawn(move || run_pump(inbound, sender, cancelled, pump_path));

        Self {
            id: sub.id,
            receiver,
            path: path.to_string(),
            inner: sub,
            cancel: Some(cancel),
            pump: Some(pump),
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Receive the next value (blocking).
    pub fn recv(&self) -> Result<String, RecvError> {
        self.receiver.recv()
    }

    /// Try to receive a value (non-blocking).
    pub fn try_recv(&self) -> Result<String, TryRecvError> {
        self.receiver.try_recv()
    }

    /// Receive with timeout.
    pub fn recv_timeout(&self, timeout: Duration) -> Result<String, RecvTimeoutError> {
        self.receiver.recv_timeout(timeout)
    }

    /// Remove the underlying subscription and join the pump. Idempotent.
    pub fn unsubscribe(&mut self) {
        self.inner.unsubscribe();
        self.cancel.take();
        if let Some(pump) = self.pump.take() {
            if pump.join().is_err() {
                tracing::warn!(subscription = %self.id, "Scalar subscription pump panicked");
            }
        }
    }
}

impl Drop for StringSubscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

fn run_pump(inbound: Receiver<String>, out: Sender<String>, cancelled: Receiver<()>, path: String) {
    loop {
        let delta = select! {
            recv(inbound) -> msg => match msg {
                Ok(delta) => delta,
                Err(_) => break,
            },
            recv(cancelled) -> _ => break,
        };

        let Some(value) = scalar_at(&delta, &path) else {
            continue;
        };

        select! {
            send(out, value) -> res => if res.is_err() { break },
            recv(cancelled) -> _ => break,
        }
    }
    tracing::debug!(path = %path, "Scalar subscription pump exiting");
}

/// Read the string at `path` out of a serialized delta.
///
/// Returns `None` only when the delta itself is not a JSON object.
fn scalar_at(delta: &str, path: &str) -> Option<String> {
    let tree = match serde_json::from_str(delta) {
        Ok(serde_json::Value::Object(map)) => tree_from_json(map),
        _ => {
            tracing::warn!(path = %path, "Ignoring delta that is not a JSON object");
            return None;
        }
    };

    let value = match read(&tree, path) {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Null) => String::new(),
        Some(other) => {
            tracing::warn!(path = %path, kind = other.kind(), "Expected a string value");
            String::new()
        }
        None => {
            tracing::warn!(path = %path, "Path missing from delta");
            String::new()
        }
    };
    Some(value)
}
