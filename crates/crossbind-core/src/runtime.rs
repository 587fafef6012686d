//! The persistent handle API a managed runtime exposes to the binding layer.

use std::sync::Arc;

use crate::{AllocationError, FinalizerToken, NativeId};

/// Receiver for finalization notifications.
///
/// The runtime calls [`finalize`](FinalizationSink::finalize) when the
/// managed object behind a weak handle has been collected. It may do so from
/// any thread and at any time, including while the binding layer is in the
/// middle of a call into the runtime, so implementations must not block.
pub trait FinalizationSink: Send + Sync {
    fn finalize(&self, token: FinalizerToken);
}

/// A garbage-collected runtime with strong and weak persistent handles.
///
/// Handles are owned values: dropping a `Strong` or `Weak` releases its slot
/// in the runtime, and dropping a `Weak` whose object is still alive cancels
/// the finalizer registered with it.
pub trait ManagedRuntime: Send + Sync + 'static {
    /// Handle that keeps its managed object alive.
    type Strong: Send;
    /// Handle that permits collection and carries a finalizer token.
    type Weak: Send;
    /// Transient reference used for marshaling and identity comparison.
    type Local: Copy + PartialEq + Send + std::fmt::Debug;

    /// Register the callback invoked for every collected weak handle.
    fn register_finalizer(&self, sink: Arc<dyn FinalizationSink>);

    /// Allocate a managed object mirroring `id` and return a strong handle.
    fn create(&self, id: NativeId) -> Result<Self::Strong, AllocationError>;

    /// Create a weak handle to the object behind `strong`.
    ///
    /// The runtime hands `token` to the registered sink once the object is
    /// collected, unless the weak handle is dropped first.
    fn downgrade(&self, strong: &Self::Strong, token: FinalizerToken) -> Self::Weak;

    /// Create a strong handle from a weak one, or `None` if collected.
    fn upgrade(&self, weak: &Self::Weak) -> Option<Self::Strong>;

    fn local(&self, strong: &Self::Strong) -> Self::Local;

    /// Local reference for a weakly held object, or `None` if collected.
    fn local_of_weak(&self, weak: &Self::Weak) -> Option<Self::Local>;
}
