//! Core types shared by every crossbind crate.
//!
//! This crate holds the vocabulary of the binding layer: native identities,
//! handle modes, finalizer tokens, the error taxonomy and the
//! [`ManagedRuntime`] trait that a garbage-collected runtime implements to
//! take part in instance binding.
//!
//! ## Key Types
//!
//! - [`NativeId`]: Opaque identity of a native engine object
//! - [`HandleMode`]: Uninitialized / Strong / Weak
//! - [`FinalizerToken`]: Per-weak-handle context delivered on collection
//! - [`ManagedRuntime`]: Persistent handle API of the managed runtime
//! - [`BindingError`]: Everything the binding layer can report

mod error;
mod ids;
mod mode;
mod runtime;

pub use error::{AllocationError, BindingError, BindingResult};
pub use ids::{FinalizerToken, NativeId};
pub use mode::HandleMode;
pub use runtime::{FinalizationSink, ManagedRuntime};
