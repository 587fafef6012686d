//! Instance binding between a native engine's objects and their mirrors in a
//! garbage-collected runtime.
//!
//! Every native object that crosses into managed code gets exactly one
//! [`BindingRecord`] in the session's [`BindingRegistry`]. The record holds
//! the managed mirror strongly while the native side needs it and weakly once
//! only the managed side refers to a reference-counted object, so neither
//! side keeps the other alive in a cycle. Collection of a weakly held mirror
//! comes back through the finalization bridge and is applied under the same
//! lock as native-side notifications.
//!
//! # Example
//!
//! ```ignore
//! use crossbind::{BindingConfig, BindingSession, HolderTransition, NativeId};
//! use crossbind_heap::ManagedHeap;
//!
//! let heap = ManagedHeap::new();
//! let session = BindingSession::new(heap.clone());
//!
//! let id = NativeId::new(0x7f00_1000);
//! let mirror = session.bind(id, true)?;
//! session.holder_changed(id, HolderTransition::LastNativeHolderLost)?;
//!
//! heap.collect();
//! assert!(!session.is_bound(id)?);
//! ```

mod binding;
mod config;
mod finalizer;
mod handle;
mod host;
mod registry;
mod session;

pub use binding::BindingRecord;
pub use config::{BindingConfig, FinalizePolicy, FinalizerDispatch};
pub use handle::ManagedHandle;
pub use host::{HolderTransition, NativeHost};
pub use registry::BindingRegistry;
pub use session::BindingSession;

pub use crossbind_core::{
    AllocationError, BindingError, BindingResult, FinalizationSink, FinalizerToken, HandleMode,
    ManagedRuntime, NativeId,
};
