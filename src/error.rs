//! Core error kinds (spec §7) and the result alias every core operation
//! returns. No core operation throws or unwinds; drivers and worker
//! threads log-and-continue instead of propagating.

use std::fmt;

/// Result alias used throughout the core.
pub type CoreResult<T> = Result<T, CoreError>;

/// A selector naming the field/channel/action a driver call targets, e.g.
/// `"temperature"`, `"a0"`, `"tare"`. Kept as an owned string since REST
/// bodies and schedule channel names are not known at compile time.
pub type What = String;

/// Error kinds a core operation can fail with.
#[derive(Debug, Clone, thiserror::Error)]
pub enum CoreError {
    /// Driver lacks the capability for the requested `what`/action.
    #[error("{what:?} is not supported by this driver")]
    NotSupported {
        /// The selector that was rejected.
        what: What,
    },
    /// Hardware I/O failed.
    #[error("operation failed: {reason}")]
    OperationFailure {
        /// Human-readable failure reason, logged alongside.
        reason: String,
    },
    /// The event access array has no free slot.
    #[error("device collection is full")]
    CollectionFull,
    /// No slot matched the requested index/name.
    #[error("index or name did not resolve to a slot")]
    IndexInvalid,
    /// A requested hardware address is already owned by another driver.
    #[error("address already in use: {address}")]
    AddressCollision {
        /// The colliding address, formatted for display.
        address: String,
    },
    /// The resource arbiter could not grant the requested resource.
    #[error("resource busy: {resource}")]
    ResourceBusy {
        /// Description of the resource that was unavailable.
        resource: String,
    },
    /// Input JSON failed to parse or validate.
    #[error("malformed input: {reason}")]
    MalformedInput {
        /// Human-readable parse/validation failure.
        reason: String,
    },
    /// An atomic write failed; memory state may be ahead of durable state.
    #[error("failed to persist state durably: {reason}")]
    PersistenceFailure {
        /// Underlying persistence error, stringified (persistence errors
        /// are not `Clone`, so they are flattened to text here).
        reason: String,
    },
}

impl CoreError {
    /// Convenience constructor for [`CoreError::NotSupported`].
    pub fn not_supported(what: impl Into<What>) -> Self {
        CoreError::NotSupported { what: what.into() }
    }

    /// Convenience constructor for [`CoreError::OperationFailure`].
    pub fn operation_failure(reason: impl fmt::Display) -> Self {
        CoreError::OperationFailure {
            reason: reason.to_string(),
        }
    }

    /// Convenience constructor for [`CoreError::MalformedInput`].
    pub fn malformed(reason: impl fmt::Display) -> Self {
        CoreError::MalformedInput {
            reason: reason.to_string(),
        }
    }
}

impl From<persistence::PersistError> for CoreError {
    fn from(err: persistence::PersistError) -> Self {
        CoreError::PersistenceFailure {
            reason: err.to_string(),
        }
    }
}
