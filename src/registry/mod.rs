//! Multi-tenant registry of document stores.
//!
//! The [`Manager`] creates one [`Node`](crate::Node) per entity on first
//! use, routes unsubscribes back to the owning node, and keeps universal
//! subscriptions that attach to every node, including ones created later.

mod manager;

pub use manager::{Manager, ManagerConfig};
