//! Connection records and their per-connection state machines.
//!
//! A [`Connection`] owns the accepted socket plus the scanner and sender
//! positions for it. Which membership set the connection lives in
//! (awaiting-request or awaiting-response) is tracked by the registry, not
//! here; the record only carries the state each role needs.

pub mod scanner;
pub mod sender;

use std::net::{SocketAddr, TcpStream};
use std::time::Instant;

pub use scanner::{ScanOutcome, ScanState, scan};
pub use sender::{SendCursor, SendState, SendStep, transmit};

/// One accepted client.
///
/// Created when the listener accepts, destroyed on protocol violation, I/O
/// error or EOF, idle timeout, or completed transmission. The socket is
/// expected to be in non-blocking mode.
#[derive(Debug)]
pub struct Connection {
    pub(crate) socket: TcpStream,
    pub(crate) peer: SocketAddr,
    pub(crate) scan: ScanState,
    pub(crate) send: SendCursor,
    pub(crate) last_activity: Instant,
}

impl Connection {
    /// Wraps a freshly accepted socket: scanner at its initial state, send
    /// cursor at the header start, activity clock set to now.
    pub fn new(socket: TcpStream, peer: SocketAddr) -> Self {
        Self {
            socket,
            peer,
            scan: ScanState::INITIAL,
            send: SendCursor::new(),
            last_activity: Instant::now(),
        }
    }

    /// The peer's address, for diagnostics.
    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    /// Timestamp of the most recent successful read or write.
    pub fn last_activity(&self) -> Instant {
        self.last_activity
    }

    /// Refreshes the activity clock after a successful read or write.
    pub(crate) fn touch(&mut self) {
        self.last_activity = Instant::now();
    }
}
