//! pirc - IRC-style chat gateway over a PIR publish/subscribe transport
//!
//! Starts the TCP listener, the channel directory, and the loopback
//! transport, then accepts connections.

use std::env;
use std::sync::Arc;

use tracing_subscriber::EnvFilter;

use pirc::memory::MemoryClient;
use pirc::server::serve;

/// Default listen address
const DEFAULT_ADDR: &str = "127.0.0.1:5222";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Use RUST_LOG to control log level, e.g. RUST_LOG=pirc=debug
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("pirc=info")),
        )
        .init();

    let addr = env::args()
        .nth(1)
        .unwrap_or_else(|| DEFAULT_ADDR.to_string());

    // The in-process loopback stands in for an external PIR deployment:
    // all sessions of this gateway share one transport.
    let client = Arc::new(MemoryClient::new());

    serve(&addr, client).await?;
    Ok(())
}
