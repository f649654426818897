use anyhow::Result;
use tokio::net::TcpListener;
use tracing::{error, info};

use crate::state::ServerState;

/// Accept loop: one spawned supervisor task per connection. A failing
/// connection only ever takes down its own task; a failed accept is logged
/// and the loop keeps listening.
pub async fn run(listener: TcpListener, state: ServerState) -> Result<()> {
    info!("listening on {}", listener.local_addr()?);

    loop {
        let (socket, peer) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(err) => {
                error!(%err, "failed to accept connection");
                continue;
            }
        };

        let state = state.clone();

        tokio::spawn(async move {
            if let Err(err) = crate::conn::handle(state, socket, peer).await {
                error!("[{}] connection error: {err:?}", peer);
            }
        });
    }
}
