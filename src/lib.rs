//! # monoplex
//!
//! A single-threaded, readiness-driven HTTP server that serves one
//! precomputed page to many concurrent connections.
//!
//! The crate is a connection-multiplexing engine. A readiness poller drives
//! a two-set connection registry (awaiting-request / awaiting-response), a
//! per-byte request-line scanner, a partial-write response sender, and an
//! idle-timeout policy that derives each wait interval from the
//! least-recently-active connection. The page itself is loaded once at
//! startup; after that the loop never allocates response data.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use monoplex::config::Config;
//! use monoplex::content::ContentStore;
//! use monoplex::server::Server;
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::from_env();
//!     let store = ContentStore::load(&config.content_path)?;
//!     let server = Server::bind(&config, store)?;
//!     server.run()?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod conn;
pub mod content;
pub mod server;

// ── Convenience re-exports ────────────────────────────────────────────────────
pub use config::Config;
pub use content::{ContentError, ContentStore};
pub use server::{Server, ServerError};
