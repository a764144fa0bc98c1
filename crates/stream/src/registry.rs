//! Directory of live connections
//!
//! One read-write lock over the map. Fan-out, status and the health sweep
//! take a [`ConnectionRegistry::snapshot`] (cloned `Arc`s) and release the
//! lock before touching any connection's own lock, so the two lock levels
//! never nest.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::connection::{Connection, ConnectionId};
use crate::error::{Resource, Result, StreamError};

/// Thread-safe map of registered connections with a population cap
#[derive(Debug)]
pub struct ConnectionRegistry {
    connections: RwLock<HashMap<ConnectionId, Arc<Connection>>>,
    max_connections: usize,
}

impl ConnectionRegistry {
    pub fn new(max_connections: usize) -> Self {
        Self {
            connections: RwLock::new(HashMap::new()),
            max_connections,
        }
    }

    /// Add a connection
    ///
    /// Fails without side effects once `max_connections` are registered.
    /// Returns the population after insertion.
    pub fn register(&self, connection: Arc<Connection>) -> Result<usize> {
        let mut connections = self.connections.write();

        if connections.len() >= self.max_connections {
            return Err(StreamError::CapacityExceeded {
                resource: Resource::Connections,
                max: self.max_connections,
            });
        }

        connections.insert(connection.id(), connection);
        Ok(connections.len())
    }

    /// Remove a connection
    ///
    /// Idempotent: only the caller that actually took the entry out gets it
    /// back, every other caller gets `None`.
    pub fn unregister(&self, id: ConnectionId) -> Option<Arc<Connection>> {
        self.connections.write().remove(&id)
    }

    pub fn lookup(&self, id: ConnectionId) -> Result<Arc<Connection>> {
        self.connections
            .read()
            .get(&id)
            .cloned()
            .ok_or(StreamError::ConnectionNotFound { id })
    }

    /// Copy of the current population, safe to iterate without the lock
    pub fn snapshot(&self) -> Vec<Arc<Connection>> {
        self.connections.read().values().cloned().collect()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.connections.read().len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.connections.read().is_empty()
    }

    #[inline]
    pub fn max_connections(&self) -> usize {
        self.max_connections
    }
}

#[cfg(test)]
#[path = "registry_test.rs"]
mod tests;
