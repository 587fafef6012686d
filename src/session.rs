//! The binding service: one registry, one runtime, one lock.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │  BindingSession (cloneable handle, last clone tears down)   │
//! │  ├── native notifications: register / bind / holder_changed │
//! │  │   / reference_callback / destroy                         │
//! │  └── queries: mode / epoch / managed_object / len           │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │  SessionGuard (RAII)                                        │
//! │  ├── Mutex<SessionState> (registry + counters)              │
//! │  ├── Drains finalizer queue on acquisition and release      │
//! │  └── Calls NativeHost after unlocking                       │
//! └─────────────────────────────────────────────────────────────┘
//!                              ▲
//!                              │ queue + try_lock
//! ┌─────────────────────────────────────────────────────────────┐
//! │  FinalizationBridge (registered with the ManagedRuntime)    │
//! └─────────────────────────────────────────────────────────────┘
//! ```

use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::{Arc, Mutex, MutexGuard, TryLockError};

use crossbind_core::{
    BindingError, BindingResult, FinalizerToken, HandleMode, ManagedRuntime, NativeId,
};

use crate::binding::BindingRecord;
use crate::config::{BindingConfig, FinalizerDispatch};
use crate::finalizer::{FinalizationBridge, FinalizationQueue, FinalizeOutcome, apply_finalizer};
use crate::host::HolderTransition;
use crate::registry::BindingRegistry;

pub(crate) struct SessionState<R: ManagedRuntime> {
    registry: BindingRegistry<R>,
    next_epoch: u64,
    next_ticket: u64,
    open: bool,
    /// Native references to hand back once the lock is released.
    host_releases: Vec<NativeId>,
}

impl<R: ManagedRuntime> SessionState<R> {
    fn issue_epoch(&mut self) -> u64 {
        let epoch = self.next_epoch;
        self.next_epoch += 1;
        epoch
    }

    /// Apply a collection and remember the native reference it released.
    fn finalize(&mut self, token: FinalizerToken, config: &BindingConfig) {
        if !self.open {
            return;
        }
        let outcome = apply_finalizer(&mut self.registry, token, config.finalize_policy);
        if let FinalizeOutcome::Reset { .. } = outcome {
            let epoch = self.issue_epoch();
            if let Some(record) = self.registry.lookup_mut(token.id) {
                record.renew_epoch(epoch);
            }
        }
        if let Some(id) = outcome.released_reference(token.id) {
            self.host_releases.push(id);
        }
    }
}

pub(crate) struct SessionShared<R: ManagedRuntime> {
    runtime: R,
    state: Mutex<SessionState<R>>,
    pub(crate) queue: FinalizationQueue,
    pub(crate) config: BindingConfig,
}

/// Exclusive access to the session state.
///
/// Pending finalizers are applied when the guard is acquired and again
/// before it is released. Host notifications collected meanwhile are
/// delivered after the lock is gone.
pub(crate) struct SessionGuard<'a, R: ManagedRuntime> {
    shared: &'a SessionShared<R>,
    state: Option<MutexGuard<'a, SessionState<R>>>,
    drained: usize,
}

impl<'a, R: ManagedRuntime> SessionGuard<'a, R> {
    fn new(shared: &'a SessionShared<R>, state: MutexGuard<'a, SessionState<R>>) -> Self {
        let mut guard = Self {
            shared,
            state: Some(state),
            drained: 0,
        };
        guard.drained = guard.drain();
        guard
    }

    /// Block until the lock is free.
    fn acquire(shared: &'a SessionShared<R>) -> BindingResult<Self> {
        let state = shared.state.lock()?;
        let guard = Self::new(shared, state);
        if !guard.open {
            return Err(BindingError::SessionClosed);
        }
        Ok(guard)
    }

    /// Take the lock only if nobody holds it.
    pub(crate) fn try_acquire(shared: &'a SessionShared<R>) -> Option<Self> {
        match shared.state.try_lock() {
            Ok(state) => Some(Self::new(shared, state)),
            Err(TryLockError::WouldBlock) => None,
            Err(TryLockError::Poisoned(_)) => {
                tracing::warn!("binding session lock poisoned, finalizers left queued");
                None
            }
        }
    }

    fn drain(&mut self) -> usize {
        let shared = self.shared;
        let mut processed = 0;
        while shared.queue.has_pending() {
            for token in shared.queue.take_all() {
                self.finalize(token, &shared.config);
                processed += 1;
            }
        }
        processed
    }
}

impl<R: ManagedRuntime> Deref for SessionGuard<'_, R> {
    type Target = SessionState<R>;

    fn deref(&self) -> &Self::Target {
        self.state
            .as_deref()
            .expect("session guard accessed after release")
    }
}

impl<R: ManagedRuntime> DerefMut for SessionGuard<'_, R> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.state
            .as_deref_mut()
            .expect("session guard accessed after release")
    }
}

impl<R: ManagedRuntime> Drop for SessionGuard<'_, R> {
    fn drop(&mut self) {
        if std::thread::panicking() {
            return;
        }

        self.drain();
        let releases = std::mem::take(&mut self.host_releases);
        drop(self.state.take());

        match &self.shared.config.host {
            Some(host) => {
                for id in releases {
                    tracing::trace!("releasing native reference held by mirror of {}", id);
                    host.release_managed_reference(id);
                }
            }
            None if !releases.is_empty() => {
                tracing::debug!(
                    "{} native references released with no host attached",
                    releases.len()
                );
            }
            None => {}
        }

        // A finalizer that found the lock taken after our last drain.
        if self.shared.config.dispatch == FinalizerDispatch::Immediate
            && self.shared.queue.has_pending()
        {
            drop(SessionGuard::try_acquire(self.shared));
        }
    }
}

/// Binding service between a native engine and a managed runtime.
///
/// Cloning yields another handle to the same session. The session is set up
/// by [`new`](Self::new) (which registers the finalization callback with the
/// runtime) and torn down by [`shutdown`](Self::shutdown) or when the last
/// clone is dropped.
pub struct BindingSession<R: ManagedRuntime> {
    shared: Arc<SessionShared<R>>,
}

impl<R: ManagedRuntime> Clone for BindingSession<R> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<R: ManagedRuntime> BindingSession<R> {
    pub fn new(runtime: R) -> Self {
        Self::with_config(runtime, BindingConfig::default())
    }

    pub fn with_config(runtime: R, config: BindingConfig) -> Self {
        let shared = Arc::new(SessionShared {
            runtime,
            state: Mutex::new(SessionState {
                registry: BindingRegistry::with_capacity(config.registry_capacity),
                next_epoch: 0,
                next_ticket: 0,
                open: true,
                host_releases: Vec::new(),
            }),
            queue: FinalizationQueue::new(),
            config,
        });

        let bridge = FinalizationBridge {
            shared: Arc::downgrade(&shared),
        };
        shared.runtime.register_finalizer(Arc::new(bridge));
        tracing::debug!("binding session opened ({:?})", shared.config);

        Self { shared }
    }

    pub fn runtime(&self) -> &R {
        &self.shared.runtime
    }

    pub fn config(&self) -> &BindingConfig {
        &self.shared.config
    }

    fn lock(&self) -> BindingResult<SessionGuard<'_, R>> {
        SessionGuard::acquire(&self.shared)
    }

    /// Construction notification: create an uninitialized binding.
    ///
    /// Registering an identity that already has a binding is a programming
    /// error (see [`BindingRegistry::insert`]).
    pub fn register(&self, id: NativeId, is_refcounted: bool) -> BindingResult<()> {
        let mut state = self.lock()?;
        let epoch = state.issue_epoch();
        state
            .registry
            .insert(BindingRecord::new(id, is_refcounted, epoch))?;
        tracing::debug!("registered {} (refcounted: {}, epoch {})", id, is_refcounted, epoch);
        Ok(())
    }

    /// First crossing into managed code: the managed object for `id`,
    /// created if needed.
    ///
    /// A binding without a live managed object (never created, reset, or
    /// collected with its finalizer still in flight) gets a new one. A live
    /// weakly held object is returned as is and stays weak. If the managed
    /// allocation fails, a binding created by this call is removed again;
    /// a pre-registered one stays uninitialized for a later retry.
    #[cfg_attr(feature = "profiling", profiling::function)]
    pub fn bind(&self, id: NativeId, is_refcounted: bool) -> BindingResult<R::Local> {
        let runtime = &self.shared.runtime;
        let mut state = self.lock()?;

        let (local, collected_ticket) = match state.registry.lookup(id) {
            Some(record) => {
                if record.is_refcounted() != is_refcounted {
                    tracing::warn!(
                        "bind of {} with refcounted={} ignored; binding was created with {}",
                        id,
                        is_refcounted,
                        record.is_refcounted()
                    );
                }
                (record.local(runtime), record.weak_ticket())
            }
            None => (None, None),
        };

        if let Some(local) = local {
            return Ok(local);
        }
        if let Some(ticket) = collected_ticket {
            // Collected, finalizer not applied yet. Apply it now; the
            // queued one will find a different ticket and be ignored.
            state.finalize(FinalizerToken::new(id, ticket), &self.shared.config);
        }

        let created = !state.registry.contains(id);
        if created {
            let epoch = state.issue_epoch();
            state
                .registry
                .insert(BindingRecord::new(id, is_refcounted, epoch))?;
        }

        let record = state
            .registry
            .lookup_mut(id)
            .ok_or(BindingError::NotBound(id))?;
        if let Err(err) = record.create_managed_object(runtime) {
            if created {
                state.registry.remove(id);
            }
            tracing::debug!("bind of {} failed: {}", id, err);
            return Err(err);
        }

        record.local(runtime).ok_or(BindingError::Uninitialized(id))
    }

    /// Apply a holder transition of a reference-counted native object.
    ///
    /// - last native holder lost while strong → weak, so the managed
    ///   collector decides the object's fate;
    /// - native holder gained while weak → strong, so the managed object
    ///   outlives its managed reachability.
    ///
    /// Bindings of objects that are not reference counted ignore
    /// transitions and stay strong. If the weakly held object turns out to
    /// be collected, the collection is applied and the native object is left
    /// unbound until its next crossing.
    ///
    /// Returns the binding's mode afterwards, or `None` if there is no
    /// binding.
    #[cfg_attr(feature = "profiling", profiling::function)]
    pub fn holder_changed(
        &self,
        id: NativeId,
        transition: HolderTransition,
    ) -> BindingResult<Option<HandleMode>> {
        let runtime = &self.shared.runtime;
        let mut guard = self.lock()?;
        let state = &mut *guard;

        let Some(record) = state.registry.lookup_mut(id) else {
            return Ok(None);
        };
        if !record.is_refcounted() {
            tracing::trace!("{:?} on non-refcounted {} ignored", transition, id);
            return Ok(Some(record.mode()));
        }

        match (transition, record.mode()) {
            (HolderTransition::NativeHolderGained, HandleMode::Weak) => {
                let weak_ticket = record.weak_ticket();
                match record.convert_to_strong(runtime) {
                    Ok(()) => {}
                    Err(BindingError::Collected(_)) => {
                        if let Some(weak_ticket) = weak_ticket {
                            let token = FinalizerToken::new(id, weak_ticket);
                            state.finalize(token, &self.shared.config);
                        }
                    }
                    Err(err) => return Err(err),
                }
            }
            (HolderTransition::LastNativeHolderLost, HandleMode::Strong) => {
                let ticket = state.next_ticket;
                state.next_ticket += 1;
                record.convert_to_weak(runtime, ticket)?;
            }
            _ => {}
        }

        Ok(state.registry.lookup(id).map(BindingRecord::mode))
    }

    /// Engine reference callback: classify a raw refcount change, apply it,
    /// and report whether the native object may now be freed.
    pub fn reference_callback(
        &self,
        id: NativeId,
        incremented: bool,
        refcount: u32,
    ) -> BindingResult<bool> {
        if let Some(transition) = HolderTransition::from_refcount(incremented, refcount) {
            self.holder_changed(id, transition)?;
        }
        Ok(refcount == 0)
    }

    /// Native-driven teardown. Returns whether a binding existed.
    ///
    /// Safe to call for identities without a binding; a finalizer for the
    /// removed binding that arrives later is ignored.
    pub fn destroy(&self, id: NativeId) -> BindingResult<bool> {
        let mut state = self.lock()?;
        match state.registry.remove(id) {
            Some(record) => {
                record.destroy();
                Ok(true)
            }
            None => {
                tracing::trace!("destroy of unbound {} ignored", id);
                Ok(false)
            }
        }
    }

    pub fn mode(&self, id: NativeId) -> BindingResult<Option<HandleMode>> {
        let state = self.lock()?;
        Ok(state.registry.lookup(id).map(BindingRecord::mode))
    }

    pub fn is_bound(&self, id: NativeId) -> BindingResult<bool> {
        Ok(self.lock()?.registry.contains(id))
    }

    /// Epoch of the binding for `id`. Changes whenever a new binding replaces
    /// a removed one and whenever a collected managed object is cleared under
    /// [`FinalizePolicy::ResetBinding`](crate::FinalizePolicy::ResetBinding),
    /// so callers can tell a cached managed reference is stale.
    pub fn epoch(&self, id: NativeId) -> BindingResult<Option<u64>> {
        let state = self.lock()?;
        Ok(state.registry.lookup(id).map(BindingRecord::epoch))
    }

    /// The live managed object for `id`, without creating one.
    pub fn managed_object(&self, id: NativeId) -> BindingResult<Option<R::Local>> {
        let state = self.lock()?;
        Ok(state
            .registry
            .lookup(id)
            .and_then(|record| record.local(&self.shared.runtime)))
    }

    pub fn len(&self) -> BindingResult<usize> {
        Ok(self.lock()?.registry.len())
    }

    pub fn is_empty(&self) -> BindingResult<bool> {
        Ok(self.lock()?.registry.is_empty())
    }

    /// Apply queued finalizers now. Returns how many were processed.
    pub fn pump_finalizers(&self) -> BindingResult<usize> {
        let mut state = self.lock()?;
        let drained = state.drained + state.drain();
        Ok(drained)
    }

    pub fn is_open(&self) -> bool {
        self.shared
            .state
            .lock()
            .map(|state| state.open)
            .unwrap_or(false)
    }

    /// Tear down every binding and close the session.
    ///
    /// Returns the number of bindings destroyed. Later calls fail with
    /// [`BindingError::SessionClosed`]; late finalizers are ignored.
    pub fn shutdown(&self) -> BindingResult<usize> {
        let mut state = self.lock()?;
        state.open = false;
        let destroyed = state.registry.drain().map(BindingRecord::destroy).count();
        tracing::debug!("binding session closed, {} bindings destroyed", destroyed);
        Ok(destroyed)
    }
}

impl<R: ManagedRuntime> fmt::Debug for BindingSession<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BindingSession")
            .field("config", &self.shared.config)
            .field("pending_finalizers", &self.shared.queue.len())
            .finish()
    }
}
