use crate::error::{NodeError, Result};
use log::info;
use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::RwLock;

/// Bookkeeping for inbound connections accepted by the peer server
///
/// Outbound peers live in the link's roster; this only counts sockets the
/// listener has handed to a handler so the server can refuse new ones at the cap.
pub struct ConnectionLimiter {
    connected: RwLock<HashSet<SocketAddr>>,
    max_connections: usize,
}

impl ConnectionLimiter {
    pub fn new(max_connections: usize) -> Self {
        Self {
            connected: RwLock::new(HashSet::new()),
            max_connections,
        }
    }

    /// Record an accepted connection
    pub fn record_connection(&self, address: SocketAddr) -> Result<()> {
        let mut connected = self
            .connected
            .write()
            .map_err(|e| NodeError::Network(format!("Failed to acquire connection lock: {e}")))?;
        connected.insert(address);
        info!("Inbound connection from {address}");
        Ok(())
    }

    /// Record a closed connection
    pub fn record_disconnection(&self, address: SocketAddr) -> Result<()> {
        let mut connected = self
            .connected
            .write()
            .map_err(|e| NodeError::Network(format!("Failed to acquire connection lock: {e}")))?;
        connected.remove(&address);
        info!("Inbound connection from {address} closed");
        Ok(())
    }

    pub fn get_connected_count(&self) -> Result<usize> {
        let connected = self
            .connected
            .read()
            .map_err(|e| NodeError::Network(format!("Failed to acquire connection lock: {e}")))?;
        Ok(connected.len())
    }

    /// Check if another connection fits under the cap
    pub fn should_accept_connection(&self) -> Result<bool> {
        Ok(self.get_connected_count()? < self.max_connections)
    }
}
