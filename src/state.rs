use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use crate::conn::Connection;
use crate::error::RelayError;

/// What to do when a second connection claims an already-active name.
/// The permissive mode mirrors the historical behavior of the protocol.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum NamePolicy {
    #[default]
    Permissive,
    Unique,
}

#[derive(Default)]
struct Members {
    by_id: HashMap<u64, Arc<Connection>>,
    // Only maintained under NamePolicy::Unique.
    active_names: HashSet<String>,
}

/// The one piece of shared mutable state in the process: the set of active
/// connections. Mutation and snapshot both take the same lock, so a snapshot
/// is a single consistent view; consuming it never blocks later mutation.
pub struct Registry {
    policy: NamePolicy,
    members: Mutex<Members>,
}

impl Registry {
    pub fn new(policy: NamePolicy) -> Self {
        Self {
            policy,
            members: Mutex::new(Members::default()),
        }
    }

    pub fn register(&self, conn: Arc<Connection>) -> Result<(), RelayError> {
        let mut members = self.members.lock().unwrap();

        if self.policy == NamePolicy::Unique && !members.active_names.insert(conn.name().to_string())
        {
            return Err(RelayError::DuplicateMember {
                name: conn.name().to_string(),
            });
        }

        members.by_id.insert(conn.id(), conn);
        Ok(())
    }

    /// No-op when the connection is already gone; cleanup may race with a
    /// concurrent removal.
    pub fn deregister(&self, conn: &Connection) {
        let mut members = self.members.lock().unwrap();

        if members.by_id.remove(&conn.id()).is_some() && self.policy == NamePolicy::Unique {
            members.active_names.remove(conn.name());
        }
    }

    /// Point-in-time copy of the current members for broadcast iteration.
    pub fn snapshot(&self) -> Vec<Arc<Connection>> {
        self.members.lock().unwrap().by_id.values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.members.lock().unwrap().by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Clone)]
pub struct ServerState {
    pub registry: Arc<Registry>,
}

impl ServerState {
    pub fn new(policy: NamePolicy) -> Self {
        Self {
            registry: Arc::new(Registry::new(policy)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_then_deregister() {
        let registry = Registry::new(NamePolicy::Permissive);
        let (conn, _rx) = Connection::stub("alice", 4);

        registry.register(conn.clone()).unwrap();
        assert_eq!(registry.len(), 1);

        registry.deregister(&conn);
        assert!(registry.is_empty());

        // Racing cleanups make a second removal a no-op, not an error.
        registry.deregister(&conn);
        assert!(registry.is_empty());
    }

    #[test]
    fn duplicate_names_allowed_by_default() {
        let registry = Registry::new(NamePolicy::Permissive);
        let (first, _rx1) = Connection::stub("sam", 4);
        let (second, _rx2) = Connection::stub("sam", 4);

        registry.register(first).unwrap();
        registry.register(second).unwrap();
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn duplicate_names_rejected_under_unique_policy() {
        let registry = Registry::new(NamePolicy::Unique);
        let (first, _rx1) = Connection::stub("sam", 4);
        let (second, _rx2) = Connection::stub("sam", 4);

        registry.register(first.clone()).unwrap();
        let err = registry.register(second.clone()).unwrap_err();
        assert!(matches!(err, RelayError::DuplicateMember { name } if name == "sam"));
        assert_eq!(registry.len(), 1);

        // Once the holder leaves, the name is free again.
        registry.deregister(&first);
        registry.register(second).unwrap();
    }

    #[test]
    fn snapshot_is_unaffected_by_later_mutation() {
        let registry = Registry::new(NamePolicy::Permissive);
        let (alice, _rx1) = Connection::stub("alice", 4);
        let (bob, _rx2) = Connection::stub("bob", 4);

        registry.register(alice).unwrap();
        let snapshot = registry.snapshot();
        assert_eq!(snapshot.len(), 1);

        registry.register(bob).unwrap();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(registry.snapshot().len(), 2);
    }
}
