//! Document stores and the subscriptions they feed.
//!
//! A [`Node`] owns one entity's document tree. Publishing a patch merges it
//! into the tree and sends each covering [`Subscription`] a delta restricted
//! to its own paths:
//! - a subscription to `a` covers `a` and everything below it
//! - deltas are built from the patch, so untouched siblings never appear
//! - deltas that project to `{}` are suppressed
//! - delivery never blocks; a full backlog drops the newest delta
//!
//! # Example
//!
//! ```ignore
//! let node = Node::new(NodeConfig::default());
//!
//! let sub = node.subscribe(&["hello.world"])?;
//! node.publish(r#"{"hello":{"world":"lala","zzz":3}}"#)?;
//!
//! assert_eq!(sub.recv()?, r#"{"hello":{"world":"lala"}}"#);
//! ```

mod node;
mod types;

pub use node::{Node, NodeConfig, DEFAULT_BACKLOG_SIZE};
pub use types::{StringSubscription, Subscription};

pub(crate) use types::{Detach, Subscriber};
