//! codocs server binary.
//!
//! Serves the collaborative editing API with in-memory storage and
//! permissions. `CODOCS_ADDR` overrides the bind address; logging is
//! controlled through `RUST_LOG`.

use std::sync::Arc;

use codocs::acl::MemoryPermissionStore;
use codocs::server::{serve, AppState, ServerConfig};
use codocs::storage::MemoryStore;

#[tokio::main]
async fn main() {
    env_logger::init();

    let mut config = ServerConfig::default();
    if let Ok(addr) = std::env::var("CODOCS_ADDR") {
        config.bind_addr = addr;
    }

    let state = AppState::new(
        Arc::new(MemoryStore::new()),
        Some(Arc::new(MemoryPermissionStore::new())),
        &config,
    );

    log::info!("starting codocs on {}", config.bind_addr);
    if let Err(err) = serve(config, state).await {
        log::error!("server error: {err}");
        std::process::exit(1);
    }
}
