//! Listener setup and accept loop

use std::sync::Arc;

use tokio::net::TcpListener;
use tracing::{error, info};

use crate::chanserv::Chanserv;
use crate::session::handle_session;
use crate::transport::PirClient;

/// Accept connections and hand each one to a session task
///
/// Spawns the channel directory actor shared by all sessions, then loops
/// forever accepting connections.
pub async fn serve(addr: &str, client: Arc<dyn PirClient>) -> Result<(), std::io::Error> {
    let listener = TcpListener::bind(addr).await?;
    info!("pirc gateway listening on {}", addr);

    let (directory, _directory_task) = Chanserv::spawn(client.clone());

    loop {
        match listener.accept().await {
            Ok((stream, peer)) => {
                info!("new connection from {}", peer);
                let directory = directory.clone();
                let client = client.clone();
                tokio::spawn(async move {
                    if let Err(e) = handle_session(stream, directory, client).await {
                        error!("session error: {}", e);
                    }
                });
            }
            Err(e) => {
                error!("failed to accept connection: {}", e);
            }
        }
    }
}
