//! PBX-facing TCP listener: one accepted connection spawns one session.

use std::sync::Arc;

use tokio::net::TcpListener;
use tracing::{error, info, warn};

use crate::session::{self, SessionDeps};

pub async fn serve(bind: &str, port: u16, deps: Arc<SessionDeps>) -> anyhow::Result<()> {
    let addr = format!("{bind}:{port}");
    let listener = TcpListener::bind(&addr).await?;
    info!(%addr, "pbx relay listening");

    loop {
        match listener.accept().await {
            Ok((stream, peer)) => {
                let deps = deps.clone();
                if let Err(e) = stream.set_nodelay(true) {
                    warn!(?peer, error = %e, "failed to set TCP_NODELAY");
                }
                tokio::spawn(async move {
                    session::handle_connection(stream, deps).await;
                });
            }
            Err(e) => {
                error!(error = %e, "failed to accept pbx connection");
            }
        }
    }
}
