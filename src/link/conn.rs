//! Duplex connection contract and an in-process implementation.

use crate::error::{BusError, Result};
use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use parking_lot::Mutex;

/// A duplex text connection.
///
/// Implementations serialize their own reads and writes; the bus only needs
/// to send one payload at a time and drain a stream of inbound payloads.
pub trait Conn: Send + Sync {
    /// Send one text payload.
    fn send(&self, payload: &str) -> Result<()>;

    /// Stream of inbound payloads. Disconnects when the peer goes away.
    fn incoming(&self) -> Receiver<String>;

    /// Close the outbound side.
    fn close(&self) -> Result<()>;
}

/// One end of an in-process connection pair.
pub struct MemoryConn {
    outbound: Mutex<Option<Sender<String>>>,
    inbound: Receiver<String>,
}

impl MemoryConn {
    /// Create two connected ends, each buffering up to `backlog_size`
    /// inbound payloads.
    pub fn pair(backlog_size: usize) -> (MemoryConn, MemoryConn) {
        let (left_tx, right_rx) = bounded(backlog_size);
        let (right_tx, left_rx) = bounded(backlog_size);
        (
            MemoryConn {
                outbound: Mutex::new(Some(left_tx)),
                inbound: left_rx,
            },
            MemoryConn {
                outbound: Mutex::new(Some(right_tx)),
                inbound: right_rx,
            },
        )
    }
}

impl Conn for MemoryConn {
    fn send(&self, payload: &str) -> Result<()> {
        let outbound = self.outbound.lock();
        let sender = outbound.as_ref().ok_or(BusError::Disconnected)?;
        match sender.try_send(payload.to_string()) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => {
                tracing::warn!(
                    backlog = sender.capacity().unwrap_or_default(),
                    "Peer backlog full, message dropped"
                );
                Ok(())
            }
            Err(TrySendError::Disconnected(_)) => Err(BusError::Disconnected),
        }
    }

    fn incoming(&self) -> Receiver<String> {
        self.inbound.clone()
    }

    fn close(&self) -> Result<()> {
        self.outbound.lock().take();
        Ok(())
    }
}
