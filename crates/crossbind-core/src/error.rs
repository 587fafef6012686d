//! Error taxonomy of the binding layer.
//!
//! ```text
//! BindingError
//! ├── Allocation          - managed runtime could not allocate a mirror
//! ├── Collected           - promotion of an already collected mirror
//! ├── DuplicateBinding    - two bindings for one identity (invariant violation)
//! ├── AlreadyInitialized  - create on a binding that already has a handle
//! ├── Uninitialized       - conversion on a binding without a handle
//! ├── NotRefCounted       - weak conversion of a singly owned object
//! ├── NotBound            - no binding for the identity
//! ├── MutexPoisoned
//! └── SessionClosed
//! ```

use std::sync::{MutexGuard, PoisonError};

use thiserror::Error;

use crate::NativeId;

pub type BindingResult<T> = Result<T, BindingError>;

/// The managed runtime failed to allocate a counterpart object.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("managed allocation failed for native object {id}: {reason}")]
pub struct AllocationError {
    pub id: NativeId,
    pub reason: String,
}

impl AllocationError {
    pub fn new(id: NativeId, reason: impl Into<String>) -> Self {
        Self {
            id,
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BindingError {
    #[error(transparent)]
    Allocation(#[from] AllocationError),

    #[error("managed object for {0} was already collected")]
    Collected(NativeId),

    #[error("duplicate binding for native object {0}")]
    DuplicateBinding(NativeId),

    #[error("binding for {0} already has a managed object")]
    AlreadyInitialized(NativeId),

    #[error("binding for {0} has no managed object")]
    Uninitialized(NativeId),

    #[error("native object {0} is not reference counted and stays strong")]
    NotRefCounted(NativeId),

    #[error("no binding for native object {0}")]
    NotBound(NativeId),

    #[error("Mutex poisoned")]
    MutexPoisoned,

    #[error("binding session is closed")]
    SessionClosed,
}

impl BindingError {
    /// Whether the caller can recover by recreating the binding.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, BindingError::Collected(_) | BindingError::Allocation(_))
    }
}

impl<T> From<PoisonError<MutexGuard<'_, T>>> for BindingError {
    fn from(_: PoisonError<MutexGuard<'_, T>>) -> Self {
        BindingError::MutexPoisoned
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocation_error_converts_into_binding_error() {
        let err: BindingError = AllocationError::new(NativeId::new(0x10), "heap full").into();
        assert!(err.is_recoverable());
        assert_eq!(
            err.to_string(),
            "managed allocation failed for native object 0x10: heap full"
        );
    }

    #[test]
    fn invariant_violations_are_not_recoverable() {
        assert!(!BindingError::DuplicateBinding(NativeId::new(1)).is_recoverable());
        assert!(BindingError::Collected(NativeId::new(1)).is_recoverable());
    }
}
