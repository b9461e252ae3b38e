//! The servable page: response header and body bytes precomputed at startup.
//!
//! The store is built once, before the event loop starts, and is shared
//! read-only by every connection afterwards. The header embeds a
//! `Content-Length` equal to the body size and a `Date` stamped at build
//! time; connections only ever copy ranges out of the two buffers.

use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use bytes::Bytes;
use thiserror::Error;

/// How many times a load is retried when the file's size keeps moving
/// between the size query and the read.
const LOAD_ATTEMPTS: u32 = 10;

/// Errors produced while building the store from a file. All of them are
/// fatal at startup.
#[derive(Debug, Error)]
pub enum ContentError {
    #[error("failed to open {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("size of {path} changed during all {attempts} read attempts")]
    UnstableSize { path: PathBuf, attempts: u32 },
}

/// The single servable artifact: immutable header and body buffers.
#[derive(Debug)]
pub struct ContentStore {
    header: Bytes,
    body: Bytes,
}

impl ContentStore {
    /// Reads the page from `path` and precomputes its response header.
    ///
    /// The read is accepted only if the number of bytes read matches the
    /// size the file reported immediately beforehand, defending against the
    /// file being rewritten mid-read. The comparison is retried up to a
    /// fixed budget before giving up.
    ///
    /// # Errors
    ///
    /// - [`ContentError::Open`] when the file cannot be opened.
    /// - [`ContentError::Read`] when a size query or read fails.
    /// - [`ContentError::UnstableSize`] when the size never stabilizes
    ///   within the retry budget.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ContentError> {
        let path = path.as_ref();
        let mut file = File::open(path).map_err(|e| ContentError::Open {
            path: path.to_owned(),
            source: e,
        })?;

        for _ in 0..LOAD_ATTEMPTS {
            let read_err = |e| ContentError::Read {
                path: path.to_owned(),
                source: e,
            };
            let expected = file.metadata().map_err(read_err)?.len();
            file.seek(SeekFrom::Start(0)).map_err(read_err)?;

            let mut body = Vec::with_capacity(expected as usize);
            file.read_to_end(&mut body).map_err(read_err)?;
            if body.len() as u64 == expected {
                return Ok(Self::from_body(body));
            }
        }

        Err(ContentError::UnstableSize {
            path: path.to_owned(),
            attempts: LOAD_ATTEMPTS,
        })
    }

    /// Builds a store around an in-memory body, stamping the header now.
    ///
    /// # Examples
    ///
    /// ```
    /// use monoplex::content::ContentStore;
    ///
    /// let store = ContentStore::from_body(&b"<p>hi</p>"[..]);
    /// let header = std::str::from_utf8(store.header()).unwrap();
    /// assert!(header.starts_with("HTTP/1.1 200 OK\r\n"));
    /// assert!(header.contains("Content-Length: 9\r\n"));
    /// ```
    pub fn from_body(body: impl Into<Bytes>) -> Self {
        let body = body.into();
        let header = encode_header(body.len(), SystemTime::now());
        Self { header, body }
    }

    /// The response header bytes, terminated by the blank line.
    pub fn header(&self) -> &[u8] {
        &self.header
    }

    /// The body bytes, exactly as loaded.
    pub fn body(&self) -> &[u8] {
        &self.body
    }
}

/// Renders the fixed response header around a body of `body_len` bytes.
fn encode_header(body_len: usize, generated: SystemTime) -> Bytes {
    let text = format!(
        "HTTP/1.1 200 OK\r\n\
         Content-Type: text/html; charset=UTF-8\r\n\
         Date: {}\r\n\
         Content-Length: {}\r\n\
         \r\n",
        httpdate::fmt_http_date(generated),
        body_len
    );
    Bytes::from(text.into_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::time::Duration;

    fn scratch_file(name: &str, contents: &[u8]) -> PathBuf {
        let path = std::env::temp_dir().join(format!("monoplex-{}-{name}", std::process::id()));
        fs::write(&path, contents).unwrap();
        path
    }

    #[test]
    fn header_shape_is_fixed() {
        let header = encode_header(42, SystemTime::UNIX_EPOCH + Duration::from_secs(1_000_000));
        let text = std::str::from_utf8(&header).unwrap();
        assert!(text.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(text.contains("Content-Type: text/html; charset=UTF-8\r\n"));
        assert!(text.contains("Date: Mon, 12 Jan 1970 13:46:40 GMT\r\n"));
        assert!(text.contains("Content-Length: 42\r\n"));
        assert!(text.ends_with("\r\n\r\n"));
    }

    #[test]
    fn content_length_tracks_the_body() {
        let store = ContentStore::from_body(&b"hello"[..]);
        let text = std::str::from_utf8(store.header()).unwrap();
        assert!(text.contains("Content-Length: 5\r\n"));
        assert_eq!(store.body(), b"hello");
    }

    #[test]
    fn load_reads_the_whole_file() {
        let path = scratch_file("load", b"<html>from disk</html>");
        let store = ContentStore::load(&path).unwrap();
        assert_eq!(store.body(), b"<html>from disk</html>");
        let text = std::str::from_utf8(store.header()).unwrap();
        assert!(text.contains("Content-Length: 22\r\n"));
        fs::remove_file(path).unwrap();
    }

    #[test]
    fn load_of_missing_file_fails_to_open() {
        let err = ContentStore::load("/nonexistent/monoplex-page").unwrap_err();
        assert!(matches!(err, ContentError::Open { .. }));
    }

    #[test]
    fn empty_file_is_servable() {
        let path = scratch_file("empty", b"");
        let store = ContentStore::load(&path).unwrap();
        assert!(store.body().is_empty());
        let text = std::str::from_utf8(store.header()).unwrap();
        assert!(text.contains("Content-Length: 0\r\n"));
        fs::remove_file(path).unwrap();
    }
}
