//! Domain error model.

use thiserror::Error;

/// Result type used across the domain layer.
pub type DomainResult<T> = Result<T, DomainError>;

/// Domain-level error.
///
/// Keep this focused on deterministic, business/domain failures. Infrastructure
/// concerns (storage, transport) belong elsewhere. Every mutating operation in
/// the domain returns one of these as a typed value; expected business
/// conditions never panic.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// A value failed validation (e.g. malformed input, non-positive quantity,
    /// missing required reference).
    #[error("validation failed: {0}")]
    Validation(String),

    /// An identifier was invalid (e.g. parse failure).
    #[error("invalid identifier: {0}")]
    InvalidId(String),

    /// A conflict occurred (stale version / optimistic concurrency, or a
    /// duplicate unique constraint such as transfer source == destination).
    /// Conflicts from version mismatches are retriable by the caller.
    #[error("conflict: {0}")]
    Conflict(String),

    /// A reservation or unstock request exceeds the available quantity for a
    /// non-backorderable stock item.
    #[error("insufficient stock: requested {requested}, available {available}")]
    InsufficientStock { requested: i64, available: i64 },

    /// A requested state change is not legal from the current state (order,
    /// shipment, or inventory unit machines).
    #[error("invalid state transition: {from} -> {to}")]
    InvalidStateTransition { from: String, to: String },

    /// A referenced entity id does not resolve (domain-level).
    #[error("not found")]
    NotFound,

    /// A multi-step operation validated successfully but failed partway
    /// through execution. The caller must roll back already-applied steps via
    /// its own transaction boundary.
    #[error("partial failure: {0}")]
    PartialFailure(String),
}

impl DomainError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn invalid_id(msg: impl Into<String>) -> Self {
        Self::InvalidId(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    pub fn insufficient_stock(requested: i64, available: i64) -> Self {
        Self::InsufficientStock {
            requested,
            available,
        }
    }

    pub fn invalid_transition(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self::InvalidStateTransition {
            from: from.into(),
            to: to.into(),
        }
    }

    pub fn not_found() -> Self {
        Self::NotFound
    }

    pub fn partial_failure(msg: impl Into<String>) -> Self {
        Self::PartialFailure(msg.into())
    }

    /// Whether the caller may retry the whole read-modify-write cycle.
    ///
    /// Only optimistic-concurrency conflicts qualify; every other kind is
    /// terminal for the call that produced it.
    pub fn is_retriable(&self) -> bool {
        matches!(self, Self::Conflict(_))
    }
}
