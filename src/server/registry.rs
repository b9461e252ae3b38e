//! Connection registry: an arena of live connections split into the two
//! membership sets, awaiting-request and awaiting-response.
//!
//! Records live in a [`Slab`] keyed by stable ids; each membership set is an
//! ordered set of live ids. Passes snapshot a set and re-check every id
//! against the arena, so removing connections mid-traversal neither skips
//! nor revisits entries.

use std::collections::BTreeSet;
use std::io;

use polling::{Event, Poller};
use slab::Slab;
use tracing::warn;

use crate::conn::{Connection, SendCursor};

/// Stable identifier of a registered connection.
pub type ConnId = usize;

/// Poller key reserved for the listening socket.
pub const LISTENER_KEY: usize = 0;

/// Poller key for a connection id; key 0 belongs to the listener.
pub(crate) fn poll_key(id: ConnId) -> usize {
    id + 1
}

/// Connection id for a poller key, `None` for the listener's key.
pub(crate) fn conn_id(key: usize) -> Option<ConnId> {
    key.checked_sub(1)
}

/// Which set a connection currently occupies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Membership {
    /// Registered for read readiness; the scanner is consuming its bytes.
    AwaitingRequest,
    /// Registered for write readiness; the sender is streaming the page.
    AwaitingResponse,
}

/// Exclusive owner of every live connection record.
pub struct Registry {
    conns: Slab<Connection>,
    readers: BTreeSet<ConnId>,
    writers: BTreeSet<ConnId>,
}

impl Registry {
    pub fn new() -> Self {
        Self {
            conns: Slab::new(),
            readers: BTreeSet::new(),
            writers: BTreeSet::new(),
        }
    }

    /// Number of live connections across both sets.
    pub fn len(&self) -> usize {
        self.conns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.conns.is_empty()
    }

    /// Admits a newly accepted connection into awaiting-request and
    /// registers read interest for its descriptor.
    ///
    /// # Errors
    ///
    /// Fails if the poller refuses the registration; the connection is
    /// dropped (closing its socket) in that case.
    pub fn insert(&mut self, poller: &Poller, conn: Connection) -> io::Result<ConnId> {
        let entry = self.conns.vacant_entry();
        let id = entry.key();
        // SAFETY: the descriptor is deleted from the poller in `remove`
        // before the socket is dropped.
        unsafe {
            poller.add(&conn.socket, Event::readable(poll_key(id)))?;
        }
        entry.insert(conn);
        self.readers.insert(id);
        Ok(id)
    }

    pub fn get(&self, id: ConnId) -> Option<&Connection> {
        self.conns.get(id)
    }

    pub fn get_mut(&mut self, id: ConnId) -> Option<&mut Connection> {
        self.conns.get_mut(id)
    }

    /// The set holding `id`, if it is live.
    pub fn membership(&self, id: ConnId) -> Option<Membership> {
        if self.readers.contains(&id) {
            Some(Membership::AwaitingRequest)
        } else if self.writers.contains(&id) {
            Some(Membership::AwaitingResponse)
        } else {
            None
        }
    }

    /// Snapshot of awaiting-request ids in ascending order.
    pub fn reader_ids(&self) -> Vec<ConnId> {
        self.readers.iter().copied().collect()
    }

    /// Snapshot of awaiting-response ids in ascending order.
    pub fn writer_ids(&self) -> Vec<ConnId> {
        self.writers.iter().copied().collect()
    }

    /// Transfers a connection from awaiting-request to awaiting-response,
    /// resetting its send cursor to the start of the header. A connection
    /// makes this transition at most once; calls for ids not currently in
    /// awaiting-request do nothing.
    pub fn promote(&mut self, id: ConnId) {
        let Some(conn) = self.conns.get_mut(id) else {
            return;
        };
        if self.readers.remove(&id) {
            conn.send = SendCursor::new();
            self.writers.insert(id);
        }
    }

    /// Detaches and finalizes a connection: withdraws its descriptor from
    /// readiness interest, drops the record, and closes the socket. Intended
    /// to be called exactly once per connection; ids already gone are
    /// ignored so a pass can act on a stale snapshot entry safely.
    pub fn remove(&mut self, poller: &Poller, id: ConnId) {
        if !self.conns.contains(id) {
            return;
        }
        self.readers.remove(&id);
        self.writers.remove(&id);
        let conn = self.conns.remove(id);
        // Interest must be withdrawn before the descriptor closes so a
        // recycled descriptor number cannot alias the old registration.
        if let Err(e) = poller.delete(&conn.socket) {
            warn!(key = id, error = %e, "poller deregistration failed");
        }
        // The socket closes when `conn` drops here.
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conn::{SendState, transmit};
    use crate::content::ContentStore;
    use std::net::{TcpListener, TcpStream};

    /// A connected socket pair; the accepted end goes into the registry.
    fn accepted_conn(listener: &TcpListener) -> (Connection, TcpStream) {
        let client = TcpStream::connect(listener.local_addr().unwrap()).unwrap();
        let (socket, peer) = listener.accept().unwrap();
        (Connection::new(socket, peer), client)
    }

    fn fixture() -> (Poller, TcpListener) {
        let poller = Poller::new().unwrap();
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        (poller, listener)
    }

    #[test]
    fn key_mapping_reserves_zero_for_the_listener() {
        assert_eq!(poll_key(0), 1);
        assert_eq!(conn_id(LISTENER_KEY), None);
        assert_eq!(conn_id(poll_key(7)), Some(7));
    }

    #[test]
    fn inserted_connections_await_requests() {
        let (poller, listener) = fixture();
        let mut registry = Registry::new();
        let (conn, _client) = accepted_conn(&listener);

        let id = registry.insert(&poller, conn).unwrap();
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.membership(id), Some(Membership::AwaitingRequest));
        assert_eq!(registry.reader_ids(), vec![id]);
        assert!(registry.writer_ids().is_empty());
    }

    #[test]
    fn every_live_connection_is_in_exactly_one_set() {
        let (poller, listener) = fixture();
        let mut registry = Registry::new();
        let mut clients = Vec::new();
        let mut ids = Vec::new();
        for _ in 0..4 {
            let (conn, client) = accepted_conn(&listener);
            ids.push(registry.insert(&poller, conn).unwrap());
            clients.push(client);
        }

        registry.promote(ids[1]);
        registry.promote(ids[3]);

        for &id in &ids {
            let in_readers = registry.reader_ids().contains(&id);
            let in_writers = registry.writer_ids().contains(&id);
            assert!(in_readers ^ in_writers, "id {id} must be in exactly one set");
        }
    }

    #[test]
    fn promote_moves_once_and_resets_the_cursor() {
        let (poller, listener) = fixture();
        let mut registry = Registry::new();
        let (conn, _client) = accepted_conn(&listener);
        let id = registry.insert(&poller, conn).unwrap();

        // Advance the cursor so the reset below is observable.
        let store = ContentStore::from_body(&b"<p>x</p>"[..]);
        let mut sink = Vec::new();
        transmit(&mut registry.get_mut(id).unwrap().send, &store, &mut sink).unwrap();
        assert_eq!(registry.get(id).unwrap().send.state(), SendState::Body);

        registry.promote(id);
        assert_eq!(registry.membership(id), Some(Membership::AwaitingResponse));
        let cursor = registry.get(id).unwrap().send;
        assert_eq!(cursor.state(), SendState::Header);
        assert_eq!(cursor.offset(), 0);

        // A second promote must not duplicate or move anything.
        registry.promote(id);
        assert_eq!(registry.membership(id), Some(Membership::AwaitingResponse));
        assert_eq!(registry.writer_ids(), vec![id]);
    }

    #[test]
    fn remove_finalizes_and_forgets() {
        let (poller, listener) = fixture();
        let mut registry = Registry::new();
        let (conn, _client) = accepted_conn(&listener);
        let id = registry.insert(&poller, conn).unwrap();

        registry.remove(&poller, id);
        assert!(registry.is_empty());
        assert_eq!(registry.membership(id), None);
        assert!(registry.reader_ids().is_empty());
        assert!(registry.writer_ids().is_empty());

        // Acting on a stale snapshot id is a no-op.
        registry.remove(&poller, id);
        assert!(registry.is_empty());
    }

    #[test]
    fn snapshot_iteration_survives_mid_pass_removal() {
        let (poller, listener) = fixture();
        let mut registry = Registry::new();
        let mut clients = Vec::new();
        let mut ids = Vec::new();
        for _ in 0..3 {
            let (conn, client) = accepted_conn(&listener);
            ids.push(registry.insert(&poller, conn).unwrap());
            clients.push(client);
        }

        let snapshot = registry.reader_ids();
        let mut visited = Vec::new();
        for id in snapshot {
            if registry.get(id).is_none() {
                continue;
            }
            visited.push(id);
            if id == ids[1] {
                registry.remove(&poller, ids[1]);
                registry.remove(&poller, ids[2]);
            }
        }

        // The removed trailing id is skipped, nothing is revisited.
        assert_eq!(visited, vec![ids[0], ids[1]]);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn freed_ids_are_reused_for_later_connections() {
        let (poller, listener) = fixture();
        let mut registry = Registry::new();

        let (first, _c1) = accepted_conn(&listener);
        let first_id = registry.insert(&poller, first).unwrap();
        registry.remove(&poller, first_id);

        let (second, _c2) = accepted_conn(&listener);
        let second_id = registry.insert(&poller, second).unwrap();
        assert_eq!(first_id, second_id);
        assert_eq!(
            registry.membership(second_id),
            Some(Membership::AwaitingRequest)
        );
    }
}
