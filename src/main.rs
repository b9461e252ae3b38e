//! monoplex binary: resolve configuration, load the page, serve forever.

use std::process;

use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use monoplex::{Config, ContentStore, Server};

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = Config::from_env();
    if let Err(e) = serve(config) {
        error!(error = %e, "fatal error, exiting");
        process::exit(1);
    }
}

fn serve(config: Config) -> Result<(), Box<dyn std::error::Error>> {
    let store = ContentStore::load(&config.content_path)?;
    info!(
        path = %config.content_path.display(),
        bytes = store.body().len(),
        "page loaded"
    );

    let server = Server::bind(&config, store)?;
    server.run()?;
    Ok(())
}
