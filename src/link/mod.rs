//! Transport boundary.
//!
//! Remote peers reach the bus over a duplex text connection ([`Conn`]).
//! A [`Link`] publishes every inbound payload into a node and emulates
//! request/response on top of the bus: subscribe to the reply path, send
//! the request, wait for the next value with a caller-supplied timeout.
//!
//! # Example
//!
//! ```ignore
//! let link = Link::spawn(conn, node);
//! let name = link.request(
//!     "login.deviceName",
//!     r#"{"cmd":"hello","cookie":"..."}"#,
//!     Duration::from_secs(60),
//! )?;
//! ```

mod client;
mod conn;

pub use client::Link;
pub use conn::{Conn, MemoryConn};
