//! Fault-recording transport wrapper.
//!
//! The synchronization engine needs to know about the most recent transport
//! fault while it is blocked polling the screen: a critical fault means the
//! awaited screen will never arrive and the wait should abort now. The
//! [`FaultRecorder`] is an explicit wrapper implementing
//! [`ExchangeTransport`] that records the last classified fault in a field
//! the engine reads directly.

// ============================================================================
// Imports
// ============================================================================

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::debug;

use crate::error::{Error, Result, TransportFault};

use super::exchange::ExchangeTransport;

// ============================================================================
// FaultRecorder
// ============================================================================

/// Wraps a transport and remembers the most recent fault it produced.
pub struct FaultRecorder {
    inner: Box<dyn ExchangeTransport>,
    last: Mutex<Option<TransportFault>>,
}

impl FaultRecorder {
    /// Wraps a transport.
    #[must_use]
    pub fn new(inner: Box<dyn ExchangeTransport>) -> Self {
        Self {
            inner,
            last: Mutex::new(None),
        }
    }

    /// Returns a copy of the most recent fault, if any.
    #[must_use]
    pub fn last_fault(&self) -> Option<TransportFault> {
        self.last.lock().clone()
    }

    /// Returns the most recent fault if it is critical.
    #[must_use]
    pub fn critical_fault(&self) -> Option<TransportFault> {
        self.last.lock().as_ref().filter(|f| f.is_critical()).cloned()
    }

    /// Clears the recorded fault.
    pub fn clear(&self) {
        *self.last.lock() = None;
    }

    #[cfg(test)]
    pub(crate) fn record(&self, fault: TransportFault) {
        *self.last.lock() = Some(fault);
    }
}

#[async_trait]
impl ExchangeTransport for FaultRecorder {
    async fn exchange(&self, command: &[u8]) -> Result<Vec<u8>> {
        match self.inner.exchange(command).await {
            Ok(reply) => Ok(reply),
            Err(Error::Transport {
                status,
                message,
                class,
            }) => {
                let fault = TransportFault {
                    status,
                    message: message.clone(),
                    class,
                };
                debug!(status = format!("{status:#06x}"), ?class, "Fault recorded");
                *self.last.lock() = Some(fault);
                Err(Error::Transport {
                    status,
                    message,
                    class,
                })
            }
            Err(other) => Err(other),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
