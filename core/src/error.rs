//! Error types for the bus transport seam

use thiserror::Error;

/// Error type for bus operations
///
/// The gateway treats the bus as an external collaborator, so the error
/// surface is deliberately small: an operation either timed out or the
/// transport is gone. Everything richer (plugin-reported errors, missing
/// registrations) travels inside the JSON-RPC envelope instead.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BusError {
    /// No reply arrived within the request deadline
    #[error("bus request timed out after {0} ms")]
    Timeout(u64),

    /// The connection or subscription is closed
    #[error("bus connection closed")]
    Closed,
}
