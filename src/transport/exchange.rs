//! Command-exchange transport.
//!
//! Commands are opaque byte strings; the device answers with an opaque
//! reply whose trailing two bytes are a status word. The [`HttpTransport`]
//! speaks the emulator's hex-JSON exchange endpoint; alternative transports
//! (real hardware, a remote bridge) implement [`ExchangeTransport`].

// ============================================================================
// Imports
// ============================================================================

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};
use url::Url;

use crate::error::{Error, Result};
use crate::status::{StatusClassifier, words};

// ============================================================================
// ExchangeTransport
// ============================================================================

/// Capability for exchanging one command for one reply.
#[async_trait]
pub trait ExchangeTransport: Send + Sync {
    /// Sends a command and returns the reply payload including its trailing
    /// status word.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Transport`] when the device answers with a
    /// non-success status word, or the underlying I/O error.
    async fn exchange(&self, command: &[u8]) -> Result<Vec<u8>>;
}

// ============================================================================
// Wire format
// ============================================================================

#[derive(Serialize)]
struct ExchangeRequest {
    data: String,
}

#[derive(Deserialize)]
struct ExchangeReply {
    data: String,
}

// ============================================================================
// HttpTransport
// ============================================================================

/// Transport speaking the emulator's HTTP exchange endpoint.
///
/// Requests are `POST {base}/apdu` with a hex-encoded command; replies are
/// hex-decoded and their trailing status word is checked against the
/// session's [`StatusClassifier`].
pub struct HttpTransport {
    base: Url,
    client: reqwest::Client,
    classifier: StatusClassifier,
}

impl HttpTransport {
    /// Creates a transport for the given endpoint base URL.
    #[must_use]
    pub fn new(base: Url, classifier: StatusClassifier) -> Self {
        Self {
            base,
            client: reqwest::Client::new(),
            classifier,
        }
    }

    /// Returns the endpoint base URL.
    #[inline]
    #[must_use]
    pub fn base(&self) -> &Url {
        &self.base
    }

    fn endpoint(&self) -> Result<Url> {
        self.base
            .join("apdu")
            .map_err(|e| Error::config(format!("invalid transport base URL: {e}")))
    }
}

#[async_trait]
impl ExchangeTransport for HttpTransport {
    async fn exchange(&self, command: &[u8]) -> Result<Vec<u8>> {
        let request = ExchangeRequest {
            data: hex::encode(command),
        };
        trace!(command = %request.data, "Exchange");

        let response = self
            .client
            .post(self.endpoint()?)
            .json(&request)
            .send()
            .await?
            .error_for_status()?;

        let reply: ExchangeReply = response.json().await?;
        let bytes = hex::decode(&reply.data)
            .map_err(|e| Error::protocol(format!("invalid hex in device reply: {e}")))?;

        if bytes.len() < 2 {
            return Err(Error::protocol("device reply shorter than a status word"));
        }

        let status = u16::from_be_bytes([bytes[bytes.len() - 2], bytes[bytes.len() - 1]]);
        if status != words::SUCCESS {
            debug!(status = format!("{status:#06x}"), "Non-success status word");
            return Err(Error::transport(status, self.classifier.classify(status)));
        }

        Ok(bytes)
    }
}

// ============================================================================
// Tests
// ============================================================================
