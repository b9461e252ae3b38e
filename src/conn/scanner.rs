//! Request-line scanner: a byte-at-a-time state machine that recognizes a
//! minimal request and the blank line that ends it.
//!
//! The scanner deliberately ignores the request target, version, and every
//! header. It matches the fixed verb-plus-separator opener, then only tracks
//! line boundaries until it sees the blank line that terminates the request
//! head. Header content is skipped, not parsed.

/// The fixed request-line opener: the only verb served, plus its separator.
/// Matched case-sensitively, one byte at a time.
pub const OPENER: &[u8; 4] = b"GET ";

/// Scanner position within the request head.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanState {
    /// Matching the fixed opener; the index counts bytes already matched.
    Opener(usize),
    /// Consuming the rest of the request line (target, version) up to `\n`.
    RequestLine,
    /// At the start of a line. A bare line terminator here is the blank
    /// line that ends the request head.
    LineStart,
    /// Consuming a header line up to `\n`.
    HeaderLine,
}

impl ScanState {
    /// State of a freshly accepted connection.
    pub const INITIAL: ScanState = ScanState::Opener(0);
}

/// Result of feeding a chunk of input to the scanner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanOutcome {
    /// The whole chunk was consumed and the request is still incomplete.
    NeedMore(ScanState),
    /// The blank line was reached after `consumed` bytes of the chunk.
    /// Bytes past that point are not examined; the scanner recognizes one
    /// request per connection.
    Complete { consumed: usize },
    /// A byte that is not part of the opener arrived while matching it.
    Violation,
}

/// Advances the scanner over `input`, starting from `state`.
///
/// Pure with respect to its inputs: the same `(state, input)` pair always
/// produces the same outcome, so chunking a byte stream differently across
/// calls cannot change what is recognized.
///
/// # Examples
///
/// ```
/// use monoplex::conn::scanner::{ScanOutcome, ScanState, scan};
///
/// let outcome = scan(ScanState::INITIAL, b"GET / HTTP/1.1\r\n\r\n");
/// assert!(matches!(outcome, ScanOutcome::Complete { .. }));
///
/// let outcome = scan(ScanState::INITIAL, b"PUT / HTTP/1.1\r\n\r\n");
/// assert_eq!(outcome, ScanOutcome::Violation);
/// ```
pub fn scan(state: ScanState, input: &[u8]) -> ScanOutcome {
    let mut state = state;
    for (pos, &byte) in input.iter().enumerate() {
        state = match state {
            ScanState::Opener(matched) => {
                if byte != OPENER[matched] {
                    return ScanOutcome::Violation;
                }
                if matched + 1 == OPENER.len() {
                    ScanState::RequestLine
                } else {
                    ScanState::Opener(matched + 1)
                }
            }
            ScanState::RequestLine => {
                if byte == b'\n' {
                    ScanState::LineStart
                } else {
                    ScanState::RequestLine
                }
            }
            ScanState::LineStart => {
                if byte == b'\r' || byte == b'\n' {
                    return ScanOutcome::Complete { consumed: pos + 1 };
                }
                ScanState::HeaderLine
            }
            ScanState::HeaderLine => {
                if byte == b'\n' {
                    ScanState::LineStart
                } else {
                    ScanState::HeaderLine
                }
            }
        };
    }
    ScanOutcome::NeedMore(state)
}
