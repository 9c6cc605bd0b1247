use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::fmt;

use thiserror::Error;

/// Server-local identity of an accepted connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnId(pub u64);

impl fmt::Display for ConnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("connection {0} is already registered")]
    ConnectionTaken(ConnId),
    #[error("username {0:?} is already registered")]
    NameTaken(String),
}

#[derive(Debug)]
struct Member<P> {
    username: String,
    peer: P,
}

/// Username <-> connection map.
///
/// Both directions are updated together by `insert` and `remove`, so
/// `username_of(connection_of(u)) == Some(u)` holds for every registered `u`
/// and symmetrically for every registered connection. `P` is whatever the
/// owner needs to reach the peer (an outbound queue on the server).
#[derive(Debug)]
pub struct Registry<P> {
    by_name: HashMap<String, ConnId>,
    by_conn: HashMap<ConnId, Member<P>>,
}

impl<P> Default for Registry<P> {
    fn default() -> Self {
        Registry {
            by_name: HashMap::new(),
            by_conn: HashMap::new(),
        }
    }
}

impl<P> Registry<P> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.by_conn.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_conn.is_empty()
    }

    pub fn contains(&self, conn: ConnId) -> bool {
        self.by_conn.contains_key(&conn)
    }

    pub fn username_of(&self, conn: ConnId) -> Option<&str> {
        self.by_conn.get(&conn).map(|m| m.username.as_str())
    }

    pub fn connection_of(&self, username: &str) -> Option<ConnId> {
        self.by_name.get(username).copied()
    }

    pub fn peer(&self, conn: ConnId) -> Option<&P> {
        self.by_conn.get(&conn).map(|m| &m.peer)
    }

    /// Picks a name for `requested` that is free right now: the name itself,
    /// otherwise the first of `requested2`, `requested3`, ... not in use.
    pub fn assign_name(&self, requested: &str) -> String {
        if !self.by_name.contains_key(requested) {
            return requested.to_string();
        }
        (2u64..)
            .map(|n| format!("{requested}{n}"))
            .find(|candidate| !self.by_name.contains_key(candidate))
            .unwrap_or_else(|| requested.to_string())
    }

    pub fn insert(&mut self, conn: ConnId, username: String, peer: P) -> Result<(), RegistryError> {
        if self.by_conn.contains_key(&conn) {
            return Err(RegistryError::ConnectionTaken(conn));
        }
        match self.by_name.entry(username) {
            Entry::Occupied(e) => Err(RegistryError::NameTaken(e.key().clone())),
            Entry::Vacant(e) => {
                let username = e.key().clone();
                e.insert(conn);
                self.by_conn.insert(conn, Member { username, peer });
                Ok(())
            }
        }
    }

    /// Removes both sides of the entry for `conn`; absent connections are a no-op.
    pub fn remove(&mut self, conn: ConnId) -> Option<(String, P)> {
        let member = self.by_conn.remove(&conn)?;
        self.by_name.remove(&member.username);
        Some((member.username, member.peer))
    }

    pub fn usernames(&self) -> impl Iterator<Item = &str> + '_ {
        self.by_conn.values().map(|m| m.username.as_str())
    }

    pub fn peers(&self) -> impl Iterator<Item = (ConnId, &P)> + '_ {
        self.by_conn.iter().map(|(conn, m)| (*conn, &m.peer))
    }
}
