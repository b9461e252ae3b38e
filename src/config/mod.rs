//! Runtime configuration, resolved once at startup from the environment and
//! passed explicitly to everything that needs it.

use std::env;
use std::net::{Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

use tracing::warn;

/// Default listening port.
pub const DEFAULT_PORT: u16 = 80;

/// Default page file served when `CONTENT_PATH` is unset.
pub const DEFAULT_CONTENT_PATH: &str = "index.html";

/// Connections silent for this long are evicted.
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(5);

/// Server configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Address the listener binds.
    pub listen_addr: SocketAddr,
    /// File served as the single page.
    pub content_path: PathBuf,
    /// Inactivity threshold applied uniformly to every connection.
    pub idle_timeout: Duration,
}

impl Config {
    /// Resolves configuration from the environment.
    ///
    /// `PORT` selects the listening port (default 80; unparsable values are
    /// ignored with a warning) and `CONTENT_PATH` the page file (default
    /// `index.html`). The listener binds all interfaces.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(raw) = env::var("PORT") {
            match raw.parse::<u16>() {
                Ok(port) => config.listen_addr.set_port(port),
                Err(_) => warn!(value = %raw, "ignoring unparsable PORT"),
            }
        }
        if let Some(path) = env::var_os("CONTENT_PATH") {
            config.content_path = PathBuf::from(path);
        }

        config
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from((Ipv4Addr::UNSPECIFIED, DEFAULT_PORT)),
            content_path: PathBuf::from(DEFAULT_CONTENT_PATH),
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_documented_values() {
        let config = Config::default();
        assert_eq!(config.listen_addr.port(), DEFAULT_PORT);
        assert!(config.listen_addr.ip().is_unspecified());
        assert_eq!(config.content_path, PathBuf::from("index.html"));
        assert_eq!(config.idle_timeout, Duration::from_secs(5));
    }
}
