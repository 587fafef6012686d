//! Deterministic garbage-collected runtime for crossbind.
//!
//! `ManagedHeap` is a small managed runtime with the same handle model as
//! production collectors: strong persistent handles pin an object, weak
//! persistent handles do not and carry a finalizer token, and managed code
//! keeps objects reachable through roots. Collection only happens when
//! [`ManagedHeap::collect`] runs (or when an allocation hits the capacity
//! limit with `collect_on_exhaustion` set), which makes every interleaving of
//! native teardown and finalization reproducible.
//!
//! ## Key Types
//!
//! - [`ManagedHeap`]: The heap and its [`ManagedRuntime`](crossbind_core::ManagedRuntime) impl
//! - [`StrongRef`] / [`WeakRef`]: RAII persistent handles
//! - [`ObjectRef`]: Generational reference to a managed object
//! - [`HeapConfig`]: Capacity limit and exhaustion behavior

mod config;
mod handles;
mod heap;

pub use config::HeapConfig;
pub use handles::{StrongRef, WeakRef};
pub use heap::{CollectStats, HeapError, ManagedHeap, ObjectFlags, ObjectRef};
