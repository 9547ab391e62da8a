//! Binds a connection to a node: inbound payloads become publishes, and
//! requests wait for their reply on a path.

use crate::error::{BusError, Result};
use crate::subscriptions::Node;
use crossbeam_channel::{bounded, select, Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use super::conn::Conn;

/// A running link between a connection and a node.
///
/// The link does not own the connection; stopping it leaves the
/// connection open.
pub struct Link {
    conn: Arc<dyn Conn>,
    node: Arc<Node>,
    cancel: Option<Sender<()>>,
    pump: Option<JoinHandle<()>>,
}

impl Link {
    /// Start pumping inbound payloads from `conn` into `node`.
    pub fn spawn(conn: Arc<dyn Conn>, node: Arc<Node>) -> Self {
        let (cancel, cancelled) = bounded::<()>(0);
        let incoming = conn.incoming();
        let pump_node = Arc::clone(&node);
        let pump = thread::spawn(move || run_pump(incoming, pump_node, cancelled));

        Self {
            conn,
            node,
            cancel: Some(cancel),
            pump: Some(pump),
        }
    }

    pub fn node(&self) -> &Arc<Node> {
        &self.node
    }

    /// Send one payload to the peer.
    pub fn send(&self, payload: &str) -> Result<()> {
        self.conn.send(payload)
    }

    /// Send `payload` and wait for the next string value at `reply_path`.
    ///
    /// The subscription is taken before sending so a fast reply is not
    /// missed. Whatever value the path already held is discarded.
    pub fn request(&self, reply_path: &str, payload: &str, timeout: Duration) -> Result<String> {
        let reply = self.node.subscribe_string_updates(reply_path)?;
        self.send(payload)?;

        match reply.recv_timeout(timeout) {
            Ok(value) => Ok(value),
            Err(RecvTimeoutError::Timeout) => Err(BusError::Timeout(reply_path.to_string())),
            Err(RecvTimeoutError::Disconnected) => Err(BusError::Stopped),
        }
    }

    /// Stop the pump and wait for it to exit. Idempotent.
    pub fn stop(&mut self) {
        self.cancel.take();
        if let Some(pump) = self.pump.take() {
            if pump.join().is_err() {
                tracing::warn!("Link pump panicked");
            }
        }
    }

    /// True while the pump is consuming inbound payloads.
    pub fn is_running(&self) -> bool {
        self.pump.as_ref().is_some_and(|pump| !pump.is_finished())
    }
}

impl Drop for Link {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run_pump(incoming: Receiver<String>, node: Arc<Node>, cancelled: Receiver<()>) {
    loop {
        select! {
            recv(incoming) -> msg => match msg {
                Ok(payload) => match node.publish(&payload) {
                    Ok(()) => {}
                    Err(BusError::Stopped) => {
                        tracing::debug!("Node stopped, link pump exiting");
                        return;
                    }
                    Err(e) => tracing::warn!(error = %e, "Failed to publish inbound payload"),
                },
                Err(_) => {
                    tracing::debug!("Inbound stream closed, link pump exiting");
                    return;
                }
            },
            recv(cancelled) -> _ => return,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::link::MemoryConn;
    use crate::subscriptions::NodeConfig;
    use std::time::Instant;

    #[test]
    fn test_inbound_payloads_are_published() {
        let (local, remote) = MemoryConn::pair(8);
        let node = Node::new(NodeConfig::default());
        let sub = node.subscribe(&["status"]).unwrap();

        let _link = Link::spawn(Arc::new(local), Arc::clone(&node));
        remote.send(r#"{"status":"online"}"#).unwrap();

        let delta = sub.recv_timeout(Duration::from_secs(1)).unwrap();
        assert_eq!(delta, r#"{"status":"online"}"#);
    }

    #[test]
    fn test_pump_survives_malformed_payload() {
        let (local, remote) = MemoryConn::pair(8);
        let node = Node::new(NodeConfig::default());
        let sub = node.subscribe(&["a"]).unwrap();

        let link = Link::spawn(Arc::new(local), Arc::clone(&node));
        remote.send("garbage").unwrap();
        remote.send(r#"{"a":1}"#).unwrap();

        assert_eq!(sub.recv_timeout(Duration::from_secs(1)).unwrap(), r#"{"a":1}"#);
        assert!(link.is_running());
    }

    #[test]
    fn test_pump_exits_when_peer_closes() {
        let (local, remote) = MemoryConn::pair(8);
        let node = Node::new(NodeConfig::default());
        let link = Link::spawn(Arc::new(local), node);

        remote.close().unwrap();

        let deadline = Instant::now() + Duration::from_secs(1);
        while link.is_running() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        assert!(!link.is_running());
    }

    #[test]
    fn test_request_waits_for_fresh_reply() {
        let (local, remote) = MemoryConn::pair(8);
        let node = Node::new(NodeConfig::default());
        node.publish(r#"{"reply":"stale"}"#).unwrap();
        let link = Link::spawn(Arc::new(local), Arc::clone(&node));

        let responder = thread::spawn(move || {
            let request = remote.incoming().recv().unwrap();
            assert_eq!(request, "ping");
            remote.send(r#"{"reply":"pong"}"#).unwrap();
            remote
        });

        let value = link
            .request("reply", "ping", Duration::from_secs(1))
            .unwrap();
        assert_eq!(value, "pong");
        assert_eq!(node.subscription_count(), 0);
        drop(responder.join().unwrap());
    }
}
