//! Pass-through RPC bridge.
//!
//! Remote callers drive the device application through one bidirectional
//! operation: `POST /exchange` with a hex-encoded command, answered with
//! the hex-encoded reply. The bridge forwards straight to the session's
//! command transport and adds nothing else.

// ============================================================================
// Imports
// ============================================================================

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::error::Result;
use crate::transport::ExchangeTransport;

// ============================================================================
// Wire format
// ============================================================================

#[derive(Deserialize)]
struct BridgeRequest {
    command: String,
}

#[derive(Serialize)]
struct BridgeReply {
    reply: String,
}

// ============================================================================
// RpcBridge
// ============================================================================

/// HTTP server forwarding `exchange` calls to a transport.
pub struct RpcBridge {
    addr: SocketAddr,
    task: JoinHandle<()>,
}

impl RpcBridge {
    /// Binds `addr` and starts serving.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Io`] when the address cannot be bound.
    pub async fn serve(addr: SocketAddr, transport: Arc<dyn ExchangeTransport>) -> Result<Self> {
        let app = Router::new()
            .route("/exchange", post(exchange_handler))
            .with_state(transport);

        let listener = tokio::net::TcpListener::bind(addr).await?;
        let bound = listener.local_addr()?;
        let task = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app).await {
                warn!(error = %e, "RPC bridge terminated");
            }
        });

        info!(addr = %bound, "RPC bridge listening");
        Ok(Self { addr: bound, task })
    }

    /// Returns the bound address.
    #[inline]
    #[must_use]
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Stops the bridge.
    pub fn shutdown(self) {
        self.task.abort();
    }
}

impl Drop for RpcBridge {
    fn drop(&mut self) {
        self.task.abort();
    }
}

// ============================================================================
// Handler
// ============================================================================

async fn exchange_handler(
    State(transport): State<Arc<dyn ExchangeTransport>>,
    Json(request): Json<BridgeRequest>,
) -> Response {
    let command = match hex::decode(&request.command) {
        Ok(command) => command,
        Err(e) => {
            return (StatusCode::BAD_REQUEST, format!("invalid hex command: {e}"))
                .into_response();
        }
    };

    match transport.exchange(&command).await {
        Ok(reply) => Json(BridgeReply {
            reply: hex::encode(reply),
        })
        .into_response(),
        Err(e) => (StatusCode::BAD_GATEWAY, e.to_string()).into_response(),
    }
}

// ============================================================================
// Tests
// ============================================================================
