//! Single-threaded, readiness-driven server loop.
//!
//! One iteration: block until a registered descriptor is ready or the idle
//! deadline elapses, accept at most one new connection, pass over the
//! awaiting-request set (evict the idle, feed ready sockets to the scanner),
//! pass over the awaiting-response set (evict the idle, drive ready sends),
//! re-arm readiness interest for every survivor, and recompute the next wait
//! from the oldest surviving connection.
//!
//! All per-connection failures are local: a read error, protocol violation,
//! or eviction closes that connection and the iteration continues over the
//! rest.

pub mod idle;
pub mod registry;

use std::collections::HashSet;
use std::io::{self, Read};
use std::net::{SocketAddr, TcpListener};
use std::time::Instant;

use polling::{Event, Events, Poller};
use socket2::{Domain, Protocol, Socket, Type};
use thiserror::Error;
use tracing::{debug, info, trace, warn};

use crate::config::Config;
use crate::conn::{Connection, ScanOutcome, scan, sender::{self, SendStep}};
use crate::content::ContentStore;
use idle::{DeadlineTracker, IdlePolicy};
use registry::{ConnId, LISTENER_KEY, Registry, conn_id, poll_key};

/// Errors produced by the server. Every variant is unrecoverable for the
/// loop as a whole; individual connection failures never surface here.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("failed to bind to {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    #[error("readiness wait failed: {0}")]
    Wait(#[source] io::Error),

    #[error("failed to accept a connection: {0}")]
    Accept(#[source] io::Error),

    #[error("poller registration failed: {0}")]
    Register(#[source] io::Error),
}

/// Bytes read from a connection per readiness signal. A throughput knob,
/// not a protocol limit: requests longer than this are consumed across
/// several signals.
const READ_CHUNK: usize = 64;

/// What a pass should do with a connection after the scanner ran.
enum Scanned {
    Keep,
    Promote,
    Close,
}

/// What a pass should do with a connection after the sender ran.
enum Sent {
    Keep,
    Close,
}

/// The server: listener, readiness poller, connection registry, and the
/// precomputed page, driven by [`run`](Server::run) on a single thread.
///
/// # Examples
///
/// ```rust,no_run
/// use monoplex::config::Config;
/// use monoplex::content::ContentStore;
/// use monoplex::server::Server;
///
/// fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let config = Config::from_env();
///     let store = ContentStore::load(&config.content_path)?;
///     let server = Server::bind(&config, store)?;
///     server.run()?;
///     Ok(())
/// }
/// ```
pub struct Server {
    poller: Poller,
    listener: TcpListener,
    local_addr: SocketAddr,
    registry: Registry,
    store: ContentStore,
    idle: IdlePolicy,
    deadline: DeadlineTracker,
}

impl Server {
    /// Binds the listening socket and prepares the readiness poller.
    ///
    /// The listener gets address reuse, non-blocking mode, and the system
    /// maximum backlog, and is registered under the reserved poller key.
    ///
    /// # Errors
    ///
    /// - [`ServerError::Bind`] when socket setup fails (port in use,
    ///   insufficient privileges for low ports, ...).
    /// - [`ServerError::Register`] when the poller cannot be created or the
    ///   listener cannot be registered with it.
    pub fn bind(config: &Config, store: ContentStore) -> Result<Self, ServerError> {
        let addr = config.listen_addr;
        let bind_err = |source| ServerError::Bind { addr, source };

        let listener = listen_socket(addr).map_err(bind_err)?;
        let local_addr = listener.local_addr().map_err(bind_err)?;

        let poller = Poller::new().map_err(ServerError::Register)?;
        // SAFETY: the listener outlives the poller registration; it is only
        // dropped together with the Server, after the poller itself.
        unsafe {
            poller
                .add(&listener, Event::readable(LISTENER_KEY))
                .map_err(ServerError::Register)?;
        }

        Ok(Self {
            poller,
            listener,
            local_addr,
            registry: Registry::new(),
            store,
            idle: IdlePolicy::new(config.idle_timeout),
            deadline: DeadlineTracker::new(),
        })
    }

    /// The address the listener is actually bound to. Useful when binding
    /// port 0 and letting the system pick.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Runs the event loop until an unrecoverable error occurs.
    ///
    /// # Errors
    ///
    /// - [`ServerError::Wait`] when the readiness wait itself fails.
    /// - [`ServerError::Accept`] on accept failures other than would-block.
    /// - [`ServerError::Register`] when interest cannot be (re)registered.
    pub fn run(mut self) -> Result<(), ServerError> {
        info!(
            address = %self.local_addr,
            idle_timeout = ?self.idle.threshold(),
            "monoplex listening"
        );
        let mut events = Events::new();

        loop {
            let timeout = self.deadline.next_wait(self.idle, Instant::now());
            events.clear();
            match self.poller.wait(&mut events, timeout) {
                Ok(_) => {}
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(ServerError::Wait(e)),
            }

            let mut accept_ready = false;
            let mut read_ready: HashSet<ConnId> = HashSet::new();
            let mut write_ready: HashSet<ConnId> = HashSet::new();
            for event in events.iter() {
                match conn_id(event.key) {
                    None => accept_ready = true,
                    Some(id) => {
                        if event.readable {
                            read_ready.insert(id);
                        }
                        if event.writable {
                            write_ready.insert(id);
                        }
                    }
                }
            }

            if accept_ready {
                self.accept_one()?;
            }
            // Re-armed every iteration regardless of the accept outcome.
            self.poller
                .modify(&self.listener, Event::readable(LISTENER_KEY))
                .map_err(ServerError::Register)?;

            trace!(
                readers = ?self.registry.reader_ids(),
                writers = ?self.registry.writer_ids(),
                "iteration state"
            );

            let mut deadline = DeadlineTracker::new();
            self.scan_pass(&read_ready, &mut write_ready, &mut deadline)?;
            self.send_pass(&write_ready, &mut deadline)?;
            self.deadline = deadline;
        }
    }

    /// Accepts at most one connection per wake. Would-block means nothing
    /// is pending this round; the loop does not retry in a spin.
    fn accept_one(&mut self) -> Result<(), ServerError> {
        match self.listener.accept() {
            Ok((socket, peer)) => {
                socket.set_nonblocking(true).map_err(ServerError::Accept)?;
                let conn = Connection::new(socket, peer);
                let id = self
                    .registry
                    .insert(&self.poller, conn)
                    .map_err(ServerError::Register)?;
                info!(peer = %peer, key = id, "connection accepted");
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                debug!("nothing pending on the listener");
                Ok(())
            }
            Err(e) => Err(ServerError::Accept(e)),
        }
    }

    /// Pass over awaiting-request: evict the idle, feed read-ready sockets
    /// to the scanner, re-arm survivors for read readiness. A recognized
    /// request promotes the connection and marks it write-ready so its
    /// first send attempt happens in this same iteration.
    fn scan_pass(
        &mut self,
        read_ready: &HashSet<ConnId>,
        write_ready: &mut HashSet<ConnId>,
        deadline: &mut DeadlineTracker,
    ) -> Result<(), ServerError> {
        let now = Instant::now();
        for id in self.registry.reader_ids() {
            let Some(conn) = self.registry.get(id) else {
                continue;
            };
            if self.idle.expired(conn.last_activity, now) {
                info!(key = id, peer = %conn.peer, "closing connection: idle timeout");
                self.registry.remove(&self.poller, id);
                continue;
            }
            deadline.observe(conn.last_activity);

            if read_ready.contains(&id) {
                match self.drive_scanner(id) {
                    Scanned::Keep => {}
                    Scanned::Promote => {
                        self.registry.promote(id);
                        write_ready.insert(id);
                        continue; // write interest is armed by the send pass
                    }
                    Scanned::Close => {
                        self.registry.remove(&self.poller, id);
                        continue;
                    }
                }
            }
            self.arm(id, Event::readable(poll_key(id)))?;
        }
        Ok(())
    }

    /// Pass over awaiting-response: evict the idle, issue one bounded send
    /// to each write-ready connection, re-arm survivors for write readiness.
    fn send_pass(
        &mut self,
        write_ready: &HashSet<ConnId>,
        deadline: &mut DeadlineTracker,
    ) -> Result<(), ServerError> {
        let now = Instant::now();
        for id in self.registry.writer_ids() {
            let Some(conn) = self.registry.get(id) else {
                continue;
            };
            if self.idle.expired(conn.last_activity, now) {
                info!(key = id, peer = %conn.peer, "closing connection: idle timeout");
                self.registry.remove(&self.poller, id);
                continue;
            }
            deadline.observe(conn.last_activity);

            if write_ready.contains(&id) {
                match self.drive_sender(id) {
                    Sent::Keep => {}
                    Sent::Close => {
                        self.registry.remove(&self.poller, id);
                        continue;
                    }
                }
            }
            self.arm(id, Event::writable(poll_key(id)))?;
        }
        Ok(())
    }

    /// One bounded read fed to the request scanner.
    fn drive_scanner(&mut self, id: ConnId) -> Scanned {
        let Some(conn) = self.registry.get_mut(id) else {
            return Scanned::Close;
        };
        let mut chunk = [0u8; READ_CHUNK];
        match conn.socket.read(&mut chunk) {
            Ok(0) => {
                info!(key = id, peer = %conn.peer, "closing connection: peer disconnected");
                Scanned::Close
            }
            Ok(n) => {
                conn.touch();
                match scan(conn.scan, &chunk[..n]) {
                    ScanOutcome::NeedMore(next) => {
                        conn.scan = next;
                        trace!(key = id, bytes = n, state = ?next, "request incomplete");
                        Scanned::Keep
                    }
                    ScanOutcome::Complete { .. } => {
                        debug!(key = id, peer = %conn.peer, "request recognized");
                        Scanned::Promote
                    }
                    ScanOutcome::Violation => {
                        info!(key = id, peer = %conn.peer, "closing connection: malformed request");
                        Scanned::Close
                    }
                }
            }
            Err(e)
                if e.kind() == io::ErrorKind::WouldBlock
                    || e.kind() == io::ErrorKind::Interrupted =>
            {
                Scanned::Keep
            }
            Err(e) => {
                warn!(key = id, peer = %conn.peer, error = %e, "closing connection: read failed");
                Scanned::Close
            }
        }
    }

    /// One bounded write of the page toward the peer.
    fn drive_sender(&mut self, id: ConnId) -> Sent {
        let Some(conn) = self.registry.get_mut(id) else {
            return Sent::Close;
        };
        match sender::transmit(&mut conn.send, &self.store, &mut conn.socket) {
            Ok(SendStep::Progress) => {
                conn.touch();
                Sent::Keep
            }
            Ok(SendStep::Blocked) => Sent::Keep,
            Ok(SendStep::Finished) => {
                info!(key = id, peer = %conn.peer, "closing connection: response complete");
                Sent::Close
            }
            Ok(SendStep::Disconnected) => {
                info!(key = id, peer = %conn.peer, "closing connection: peer stopped reading");
                Sent::Close
            }
            Err(e) => {
                warn!(key = id, peer = %conn.peer, error = %e, "closing connection: write failed");
                Sent::Close
            }
        }
    }

    /// Re-arms readiness interest for a surviving connection. Interest is
    /// oneshot, so this runs every iteration; re-arming an already armed
    /// descriptor replaces the registration rather than duplicating it.
    fn arm(&self, id: ConnId, interest: Event) -> Result<(), ServerError> {
        let Some(conn) = self.registry.get(id) else {
            return Ok(());
        };
        self.poller
            .modify(&conn.socket, interest)
            .map_err(ServerError::Register)
    }
}

/// Builds the non-blocking listening socket: address reuse on, system
/// maximum backlog.
fn listen_socket(addr: SocketAddr) -> io::Result<TcpListener> {
    let domain = match addr {
        SocketAddr::V4(_) => Domain::IPV4,
        SocketAddr::V6(_) => Domain::IPV6,
    };
    let socket = Socket::new(domain, Type::STREAM, Some(Protocol::TCP))?;
    socket.set_reuse_address(true)?;
    socket.bind(&addr.into())?;
    socket.set_nonblocking(true)?;
    socket.listen(libc::SOMAXCONN)?;
    Ok(socket.into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn test_config() -> Config {
        Config {
            listen_addr: "127.0.0.1:0".parse().unwrap(),
            content_path: "unused".into(),
            idle_timeout: Duration::from_secs(5),
        }
    }

    #[test]
    fn bind_picks_an_ephemeral_port() {
        let store = ContentStore::from_body(&b"<p>x</p>"[..]);
        let server = Server::bind(&test_config(), store).unwrap();
        assert_ne!(server.local_addr().port(), 0);
    }

    #[test]
    fn listener_accept_would_block_when_idle() {
        let listener = listen_socket("127.0.0.1:0".parse().unwrap()).unwrap();
        let err = listener.accept().unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::WouldBlock);
    }

    #[test]
    fn two_servers_can_bind_the_same_port_sequentially() {
        let store = ContentStore::from_body(&b"<p>x</p>"[..]);
        let first = Server::bind(&test_config(), store).unwrap();
        let addr = first.local_addr();
        drop(first);

        // Address reuse lets a restart claim the port immediately.
        let config = Config {
            listen_addr: addr,
            content_path: "unused".into(),
            idle_timeout: Duration::from_secs(5),
        };
        let store = ContentStore::from_body(&b"<p>x</p>"[..]);
        Server::bind(&config, store).unwrap();
    }
}
