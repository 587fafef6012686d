//! Session configuration.

use std::fmt;
use std::sync::Arc;

use crossbind_core::ManagedRuntime;

use crate::host::NativeHost;
use crate::session::BindingSession;

/// What happens to a binding whose weakly held managed object was collected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FinalizePolicy {
    /// Remove and destroy the binding. The next crossing creates a fresh one
    /// with a new epoch.
    #[default]
    RemoveBinding,
    /// Keep the binding and clear it back to `Uninitialized`. The next
    /// crossing allocates a new managed object for the same binding.
    ResetBinding,
}

/// When finalizer notifications are applied to the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FinalizerDispatch {
    /// Apply right away if the session lock is free, otherwise let the
    /// current lock holder apply it before releasing.
    #[default]
    Immediate,
    /// Only queue. Applied on the next session call or
    /// [`BindingSession::pump_finalizers`].
    Deferred,
}

/// Builder-style configuration for a [`BindingSession`].
#[derive(Clone, Default)]
pub struct BindingConfig {
    pub(crate) finalize_policy: FinalizePolicy,
    pub(crate) dispatch: FinalizerDispatch,
    pub(crate) registry_capacity: usize,
    pub(crate) host: Option<Arc<dyn NativeHost>>,
}

impl BindingConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_finalize_policy(mut self, policy: FinalizePolicy) -> Self {
        self.finalize_policy = policy;
        self
    }

    pub fn with_dispatch(mut self, dispatch: FinalizerDispatch) -> Self {
        self.dispatch = dispatch;
        self
    }

    /// Pre-size the registry for the expected number of live bindings.
    pub fn with_registry_capacity(mut self, capacity: usize) -> Self {
        self.registry_capacity = capacity;
        self
    }

    /// Native side notified when a collected managed mirror of a
    /// reference-counted object gives up its native reference.
    pub fn with_host(mut self, host: Arc<dyn NativeHost>) -> Self {
        self.host = Some(host);
        self
    }

    pub fn finalize_policy(&self) -> FinalizePolicy {
        self.finalize_policy
    }

    pub fn dispatch(&self) -> FinalizerDispatch {
        self.dispatch
    }

    pub fn build<R: ManagedRuntime>(self, runtime: R) -> BindingSession<R> {
        BindingSession::with_config(runtime, self)
    }
}

impl fmt::Debug for BindingConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BindingConfig")
            .field("finalize_policy", &self.finalize_policy)
            .field("dispatch", &self.dispatch)
            .field("registry_capacity", &self.registry_capacity)
            .field("has_host", &self.host.is_some())
            .finish()
    }
}
