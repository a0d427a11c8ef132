//! Error classification for the replication worker.
//!
//! The core loop (`incremental`) needs to tell transient connection failures
//! apart from everything else without every [`DbGateway`](crate::gateway::DbGateway)
//! implementation re-deriving the rule. Gateways attach [`Transient`] to the
//! `anyhow::Error` chain when they know the underlying driver error is
//! recoverable (pool disconnects, I/O errors); everything else is treated as
//! fatal for the current batch. This mirrors the reference MySQL connection
//! pool's `with_timeout`, which tags `DriverError::PoolDisconnected` and
//! `Error::Io` as operational rather than surfacing them as hard failures.

use std::fmt;

/// Marker attached to an `anyhow::Error` chain to flag it as transient.
///
/// Transient errors are assumed to resolve themselves (a dropped pooled
/// connection gets replaced, a "server has gone away" reconnects) so the
/// caller should retry the same unit of work rather than rolling back state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transient;

impl fmt::Display for Transient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "transient database error")
    }
}

impl std::error::Error for Transient {}

/// How a failed operation should be handled by its caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Retry the same unit of work; no state should be assumed to have changed.
    Transient,
    /// Roll back and log; re-derive any cached state (e.g. the watermark)
    /// from the target before trying again.
    Fatal,
}

/// Classifies an error produced by a [`DbGateway`](crate::gateway::DbGateway)
/// call. Gateways mark transient causes by wrapping them with
/// `.context(Transient)`; anything without that marker in its chain is fatal.
pub fn classify(err: &anyhow::Error) -> ErrorClass {
    if err.chain().any(|cause| cause.is::<Transient>()) {
        ErrorClass::Transient
    } else {
        ErrorClass::Fatal
    }
}
