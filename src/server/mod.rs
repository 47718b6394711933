//! Server - client connections, HTTP surface and the readiness gate
//!
//! | Route | Description |
//! |-------|-------------|
//! | `GET /` (upgrade) | Balance stream: `{"confirmed": .., "unconfirmed": ..}` per refresh |
//! | `GET /ws` | Same stream, upgrade only |
//! | `GET /` | `index.html` from the UI directory |
//! | `GET /address` | Watched address, `text/plain` |
//! | `GET /address/qr.svg` | `bitcoin:` URI of the watched address as a QR code |
//! | `GET /health` | `{status, service, wallet, connections}` |
//! | anything else | Static files from the UI directory |

mod registry;
mod routes;
mod ws;

pub use registry::{ClientConnection, ConnectionId, ConnectionRegistry, OUTBOUND_QUEUE};
pub use routes::{address_qr_svg, create_router, AppState};

use std::time::Duration;
use tokio::net::TcpListener;

use crate::runtime::ShutdownSignal;
use crate::wallet::{ReadinessWatch, WatchedAddress};

/// How often the start gate re-checks readiness.
pub const READINESS_POLL: Duration = Duration::from_secs(1);

/// Block until the wallet is Ready, logging on every poll.
pub async fn wait_until_ready(readiness: &ReadinessWatch, every: Duration) -> WatchedAddress {
    loop {
        if let Some(addr) = readiness.watched_address() {
            tracing::info!(address = %addr, "wallet ready");
            return addr;
        }
        tracing::info!(state = readiness.current().as_str(), "Wallet initialization incomplete. Waiting another {:?}.", every);
        tokio::time::sleep(every).await;
    }
}

/// Serve `router` on `listener` until `shutdown` fires.
pub async fn serve(listener: TcpListener, router: axum::Router, mut shutdown: ShutdownSignal) -> std::io::Result<()> {
    if let Ok(addr) = listener.local_addr() {
        tracing::info!("Server started on http://{}", addr);
    }
    axum::serve(listener, router)
        .with_graceful_shutdown(async move { shutdown.recv().await })
        .await
}
