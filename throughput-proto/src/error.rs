use thiserror::Error;

use crate::StackError;

/// Reasons a role operation or event could not be carried out
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// The role is disabled or not in a lifecycle state that permits the operation
    #[error("operation not permitted in the current state")]
    InvalidState,
    /// The requested test type is unknown or the peer has not subscribed to it
    #[error("test type not usable")]
    InvalidType,
    /// A call into the host stack failed
    #[error("stack call failed: {0}")]
    Stack(#[from] StackError),
    /// A GATT procedure completed with a failure status
    #[error("GATT procedure failed: {0}")]
    Procedure(StackError),
}
