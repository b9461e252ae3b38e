//! Response sender: streams the precomputed page to a peer with a resumable
//! offset, tolerating partial writes.
//!
//! One bounded write is issued per write-readiness signal. A short write
//! leaves the connection registered for another signal with the offset
//! advanced; there is no busy looping and no insistence on full-buffer
//! writes.

use std::io::{self, Write};

use crate::content::ContentStore;

/// Which buffer of the page is being transmitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendState {
    /// Transmitting the response header bytes.
    Header,
    /// Transmitting the body bytes.
    Body,
    /// Everything has been transmitted; the next visit closes the
    /// connection gracefully.
    Done,
}

/// Resumable transmission position: the active buffer plus the count of its
/// bytes already sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SendCursor {
    state: SendState,
    offset: usize,
}

impl SendCursor {
    /// Cursor positioned at the start of the response header.
    pub fn new() -> Self {
        Self {
            state: SendState::Header,
            offset: 0,
        }
    }

    /// The buffer currently being transmitted.
    pub fn state(&self) -> SendState {
        self.state
    }

    /// Bytes of the active buffer already sent. Never exceeds the active
    /// buffer's length; reaching it advances the state and resets to 0.
    pub fn offset(&self) -> usize {
        self.offset
    }

    fn active<'a>(&self, store: &'a ContentStore) -> Option<&'a [u8]> {
        match self.state {
            SendState::Header => Some(store.header()),
            SendState::Body => Some(store.body()),
            SendState::Done => None,
        }
    }

    fn advance(&mut self, buf_len: usize, sent: usize) {
        debug_assert!(self.offset + sent <= buf_len);
        self.offset += sent;
        if self.offset == buf_len {
            self.state = match self.state {
                SendState::Header => SendState::Body,
                SendState::Body | SendState::Done => SendState::Done,
            };
            self.offset = 0;
        }
    }
}

impl Default for SendCursor {
    fn default() -> Self {
        Self::new()
    }
}

/// What one transmission step established about the connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendStep {
    /// Bytes moved toward the peer (or an empty buffer was skipped); the
    /// connection stays registered for write readiness.
    Progress,
    /// The socket was not actually writable; no bytes moved, the connection
    /// stays registered for write readiness.
    Blocked,
    /// Every buffer was fully transmitted on an earlier visit; the
    /// connection should close gracefully.
    Finished,
    /// The peer stopped accepting bytes.
    Disconnected,
}

/// Issues one bounded write of the page toward `sink`, resuming at the
/// cursor's offset.
///
/// A would-block or interrupted write counts as [`SendStep::Blocked`]; any
/// other I/O error is returned to the caller, which closes the connection.
///
/// # Examples
///
/// ```
/// use monoplex::conn::sender::{SendCursor, SendStep, transmit};
/// use monoplex::content::ContentStore;
///
/// let store = ContentStore::from_body(&b"<p>hi</p>"[..]);
/// let mut cursor = SendCursor::new();
/// let mut sink = Vec::new();
/// while transmit(&mut cursor, &store, &mut sink).unwrap() != SendStep::Finished {}
/// assert!(sink.ends_with(b"<p>hi</p>"));
/// ```
///
/// # Errors
///
/// Propagates any write error that is not would-block or interrupted.
pub fn transmit<W: Write>(
    cursor: &mut SendCursor,
    store: &ContentStore,
    sink: &mut W,
) -> io::Result<SendStep> {
    let Some(buf) = cursor.active(store) else {
        return Ok(SendStep::Finished);
    };
    let remaining = &buf[cursor.offset()..];
    if remaining.is_empty() {
        // A zero-length buffer (an empty page body) has nothing to write.
        cursor.advance(buf.len(), 0);
        return Ok(SendStep::Progress);
    }
    match sink.write(remaining) {
        Ok(0) => Ok(SendStep::Disconnected),
        Ok(sent) => {
            let buf_len = buf.len();
            cursor.advance(buf_len, sent);
            Ok(SendStep::Progress)
        }
        Err(e)
            if e.kind() == io::ErrorKind::WouldBlock
                || e.kind() == io::ErrorKind::Interrupted =>
        {
            Ok(SendStep::Blocked)
        }
        Err(e) => Err(e),
    }
}
