//! Command-exchange transport layer.
//!
//! The [`ExchangeTransport`] capability sends opaque command bytes and
//! returns reply bytes; [`HttpTransport`] is the emulator-backed
//! implementation and [`FaultRecorder`] is the wrapper the synchronization
//! engine reads recent faults from.

/// Transport capability and HTTP implementation.
pub mod exchange;

/// Fault-recording wrapper.
pub mod recorder;

pub use exchange::{ExchangeTransport, HttpTransport};
pub use recorder::FaultRecorder;
