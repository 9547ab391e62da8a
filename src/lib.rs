//! # State Bus
//!
//! A hierarchical, path-addressable publish/subscribe state store shared
//! between remote devices and their backend.
//!
//! ## Core Concepts
//!
//! - **Nodes**: One JSON-like document tree per entity, updated by patches
//! - **Subscriptions**: Path-scoped channels of deltas, seeded with a snapshot
//! - **Manager**: Lazily creates nodes per entity, plus subscriptions that
//!   span all entities
//! - **Links**: Pump a duplex connection into a node and wait for replies
//!
//! ## Example
//!
//! ```ignore
//! use statebus::{Manager, ManagerConfig};
//!
//! let manager = Manager::new(ManagerConfig::with_initial_paths(["login"]));
//!
//! let sub = manager.subscribe("printer-01", &["status"])?;
//! manager.publish("printer-01", r#"{"status":{"online":true},"job":7}"#)?;
//!
//! assert_eq!(sub.recv()?, r#"{"status":{"online":true}}"#);
//! ```

pub mod error;
pub mod link;
pub mod paths;
pub mod registry;
pub mod subscriptions;
pub mod types;

// Re-exports
pub use error::{BusError, Result};
pub use link::{Conn, Link, MemoryConn};
pub use registry::{Manager, ManagerConfig};
pub use subscriptions::{
    Node, NodeConfig, StringSubscription, Subscription, DEFAULT_BACKLOG_SIZE,
};
pub use types::{tree_from_json, SubscriptionId, Tree, Value};
