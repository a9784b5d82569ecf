//! Session Registry
//!
//! Concurrent index of currently-open connections. The registry is the
//! synchronization boundary: all operations are safe under concurrent
//! add/remove/lookup from independent connection tasks, and callers never
//! need locks of their own.
//!
//! Invariant: a connection is present iff it is open. Close callbacks remove
//! entries promptly; nothing is left dangling.

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::{Arc, RwLock};

use crate::connection::{ConnectionHandle, ConnectionId};

/// Thread-safe set of open connection handles, indexed by connection id and
/// queryable by remote address.
pub struct SessionRegistry {
    sessions: RwLock<HashMap<ConnectionId, Arc<ConnectionHandle>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        SessionRegistry {
            sessions: RwLock::new(HashMap::new()),
        }
    }

    /// Registers an open connection.
    pub fn add(&self, connection: Arc<ConnectionHandle>) {
        let mut sessions = self.sessions.write().unwrap();
        sessions.insert(connection.id(), connection);
    }

    /// Removes a connection. Called from the close callback; removing an
    /// unknown connection is a no-op.
    pub fn remove(&self, id: ConnectionId) {
        let mut sessions = self.sessions.write().unwrap();
        sessions.remove(&id);
    }

    pub fn contains(&self, id: ConnectionId) -> bool {
        let sessions = self.sessions.read().unwrap();
        sessions.contains_key(&id)
    }

    /// All open connections whose remote address matches. Several
    /// connections can share one address.
    pub fn by_address(&self, addr: IpAddr) -> Vec<Arc<ConnectionHandle>> {
        let sessions = self.sessions.read().unwrap();
        sessions
            .values()
            .filter(|c| c.remote_address() == addr)
            .cloned()
            .collect()
    }

    /// Closes every connection matching the address. Idempotent: an address
    /// with no matching connections is a no-op. Returns the number closed.
    ///
    /// Closing only signals the connection; removal from the registry
    /// happens through the normal close callback path.
    pub fn close_all_by_address(&self, addr: IpAddr, reason: &str) -> usize {
        let matching = self.by_address(addr);
        for connection in &matching {
            connection.close(reason);
        }
        matching.len()
    }

    /// Snapshot of all open connections.
    pub fn connections(&self) -> Vec<Arc<ConnectionHandle>> {
        let sessions = self.sessions.read().unwrap();
        sessions.values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        let sessions = self.sessions.read().unwrap();
        sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn connect(registry: &SessionRegistry, ip: &str) -> Arc<ConnectionHandle> {
        let (handle, _rx) = ConnectionHandle::new(ip.parse().unwrap());
        registry.add(handle.clone());
        // Receiver dropped; try_send failures are fine for these tests.
        handle
    }

    #[test]
    fn test_add_remove() {
        let registry = SessionRegistry::new();
        let conn = connect(&registry, "10.0.0.1");

        assert_eq!(registry.len(), 1);
        assert!(registry.contains(conn.id()));

        registry.remove(conn.id());
        assert!(registry.is_empty());
        assert!(!registry.contains(conn.id()));
    }

    #[test]
    fn test_remove_unknown_is_noop() {
        let registry = SessionRegistry::new();
        let (orphan, _rx) = ConnectionHandle::new("10.0.0.1".parse().unwrap());
        registry.remove(orphan.id());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_by_address_matches_all_sessions_from_one_ip() {
        let registry = SessionRegistry::new();
        let a = connect(&registry, "10.0.0.1");
        let b = connect(&registry, "10.0.0.1");
        let _other = connect(&registry, "10.0.0.2");

        let matching = registry.by_address("10.0.0.1".parse().unwrap());
        assert_eq!(matching.len(), 2);
        let ids: Vec<_> = matching.iter().map(|c| c.id()).collect();
        assert!(ids.contains(&a.id()));
        assert!(ids.contains(&b.id()));
    }

    #[test]
    fn test_close_all_by_address() {
        let registry = SessionRegistry::new();
        let target = connect(&registry, "10.0.0.1");
        let bystander = connect(&registry, "10.0.0.2");

        let closed = registry.close_all_by_address("10.0.0.1".parse().unwrap(), "banned");
        assert_eq!(closed, 1);
        assert!(!target.is_open());
        assert!(bystander.is_open());
    }

    #[test]
    fn test_close_all_by_address_no_match_is_noop() {
        let registry = SessionRegistry::new();
        connect(&registry, "10.0.0.1");

        let closed = registry.close_all_by_address("172.16.0.9".parse().unwrap(), "banned");
        assert_eq!(closed, 0);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_concurrent_add_remove() {
        let registry = Arc::new(SessionRegistry::new());
        let mut threads = Vec::new();
        for i in 0..8 {
            let registry = registry.clone();
            threads.push(std::thread::spawn(move || {
                for _ in 0..50 {
                    let (handle, _rx) =
                        ConnectionHandle::new(format!("10.0.0.{}", i).parse().unwrap());
                    let id = handle.id();
                    registry.add(handle);
                    registry.by_address(format!("10.0.0.{}", i).parse().unwrap());
                    registry.remove(id);
                }
            }));
        }
        for t in threads {
            t.join().unwrap();
        }
        assert!(registry.is_empty());
    }
}
