//! Finalization bridge between the managed collector and the registry.
//!
//! ## Problem
//!
//! The collector reports a dead weakly held object on a thread and at a
//! time of its choosing, possibly while a native-side call is inside the
//! session (even inside a runtime call made by that session). Touching the
//! registry from there would race native-driven teardown or deadlock.
//!
//! ## Solution
//!
//! The bridge only queues the token, then tries to take the session lock
//! without blocking. Whoever holds the lock drains the queue before
//! releasing it, so every token is applied under the same exclusion as
//! native-side mutations.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError, Weak};

use crossbind_core::{FinalizationSink, FinalizerToken, ManagedRuntime, NativeId};

use crate::config::{FinalizePolicy, FinalizerDispatch};
use crate::registry::BindingRegistry;
use crate::session::{SessionGuard, SessionShared};

/// Thread-safe queue of finalizer tokens waiting for the session lock.
///
/// `pending_count` only changes while `queue` is locked, so it always equals
/// the queue length as of the last unlock.
pub(crate) struct FinalizationQueue {
    queue: Mutex<VecDeque<FinalizerToken>>,

    /// Fast check for pending items (avoids lock acquisition on hot path)
    pending_count: AtomicU64,
}

impl FinalizationQueue {
    pub(crate) fn new() -> Self {
        Self {
            queue: Mutex::new(VecDeque::with_capacity(8)),
            pending_count: AtomicU64::new(0),
        }
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<FinalizerToken>> {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn push(&self, token: FinalizerToken) {
        let pending = {
            let mut queue = self.lock();
            queue.push_back(token);
            let pending = queue.len() as u64;
            self.pending_count.store(pending, Ordering::Release);
            pending
        };

        tracing::trace!("queued finalizer for {} (pending: {})", token.id, pending);
    }

    #[inline]
    pub(crate) fn has_pending(&self) -> bool {
        self.pending_count.load(Ordering::Acquire) > 0
    }

    #[inline]
    pub(crate) fn len(&self) -> u64 {
        self.pending_count.load(Ordering::Acquire)
    }

    /// Take every queued token.
    pub(crate) fn take_all(&self) -> VecDeque<FinalizerToken> {
        if !self.has_pending() {
            return VecDeque::new();
        }

        let mut queue = self.lock();
        let tokens = std::mem::take(&mut *queue);
        self.pending_count.store(0, Ordering::Release);
        tokens
    }
}

/// What applying a finalizer token did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FinalizeOutcome {
    /// No binding for the identity: native-driven teardown got there first.
    Absent,
    /// The binding's current handle is not the one the token was issued for.
    Stale,
    Removed { refcounted: bool },
    Reset { refcounted: bool },
}

impl FinalizeOutcome {
    /// Native reference the collected mirror held and must give back.
    pub(crate) fn released_reference(self, id: NativeId) -> Option<NativeId> {
        match self {
            FinalizeOutcome::Removed { refcounted: true }
            | FinalizeOutcome::Reset { refcounted: true } => Some(id),
            _ => None,
        }
    }
}

/// Apply a collection notification to the registry under `policy`.
pub(crate) fn apply_finalizer<R: ManagedRuntime>(
    registry: &mut BindingRegistry<R>,
    token: FinalizerToken,
    policy: FinalizePolicy,
) -> FinalizeOutcome {
    let Some(record) = registry.lookup_mut(token.id) else {
        tracing::trace!("late finalizer for {} ignored, binding already gone", token.id);
        return FinalizeOutcome::Absent;
    };

    if record.weak_ticket() != Some(token.ticket) {
        tracing::trace!(
            "stale finalizer for {} ignored (ticket {}, current {:?})",
            token.id,
            token.ticket,
            record.weak_ticket()
        );
        return FinalizeOutcome::Stale;
    }

    let refcounted = record.is_refcounted();
    match policy {
        FinalizePolicy::RemoveBinding => {
            if let Some(record) = registry.remove(token.id) {
                record.destroy();
            }
            tracing::debug!("managed mirror of {} collected, binding removed", token.id);
            FinalizeOutcome::Removed { refcounted }
        }
        FinalizePolicy::ResetBinding => {
            record.clear_collected(token.ticket);
            tracing::debug!("managed mirror of {} collected, binding reset", token.id);
            FinalizeOutcome::Reset { refcounted }
        }
    }
}

/// The [`FinalizationSink`] a session registers with its runtime.
pub(crate) struct FinalizationBridge<R: ManagedRuntime> {
    pub(crate) shared: Weak<SessionShared<R>>,
}

impl<R: ManagedRuntime> FinalizationSink for FinalizationBridge<R> {
    fn finalize(&self, token: FinalizerToken) {
        let Some(shared) = self.shared.upgrade() else {
            tracing::trace!("finalizer for {} after session teardown ignored", token.id);
            return;
        };

        shared.queue.push(token);

        if shared.config.dispatch == FinalizerDispatch::Immediate {
            // Dropping the guard drains the queue. If the lock is taken, its
            // holder drains instead.
            drop(SessionGuard::try_acquire(&shared));
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::AtomicBool;
    use std::thread;

    use crossbind_core::HandleMode;
    use crossbind_heap::ManagedHeap;

    use super::*;
    use crate::binding::BindingRecord;

    fn weak_binding(
        heap: &ManagedHeap,
        raw: usize,
        refcounted: bool,
        ticket: u64,
    ) -> BindingRecord<ManagedHeap> {
        let mut record = BindingRecord::new(NativeId::new(raw), refcounted, 0);
        record.create_managed_object(heap).unwrap();
        if refcounted {
            record.convert_to_weak(heap, ticket).unwrap();
        }
        record
    }

    #[test]
    fn queue_tracks_pending_tokens() {
        let queue = FinalizationQueue::new();
        assert!(!queue.has_pending());

        queue.push(FinalizerToken::new(NativeId::new(1), 0));
        queue.push(FinalizerToken::new(NativeId::new(2), 1));
        assert_eq!(queue.len(), 2);

        let tokens = queue.take_all();
        assert_eq!(tokens.len(), 2);
        assert_eq!(tokens[0].id, NativeId::new(1));
        assert!(!queue.has_pending());
        assert!(queue.take_all().is_empty());
    }

    #[test]
    fn pending_count_matches_queue_under_concurrent_pushes() {
        const PUSHERS: usize = 4;
        const PER_PUSHER: usize = 500;

        let queue = Arc::new(FinalizationQueue::new());
        let done = Arc::new(AtomicBool::new(false));

        let pushers: Vec<_> = (0..PUSHERS)
            .map(|pusher| {
                let queue = Arc::clone(&queue);
                thread::spawn(move || {
                    for ticket in 0..PER_PUSHER {
                        queue.push(FinalizerToken::new(NativeId::new(pusher), ticket as u64));
                    }
                })
            })
            .collect();

        let drainer = {
            let queue = Arc::clone(&queue);
            let done = Arc::clone(&done);
            thread::spawn(move || {
                let mut taken = 0;
                while !done.load(Ordering::Acquire) || queue.has_pending() {
                    taken += queue.take_all().len();
                    assert!(queue.len() <= (PUSHERS * PER_PUSHER) as u64);
                }
                taken
            })
        };

        for pusher in pushers {
            pusher.join().unwrap();
        }
        done.store(true, Ordering::Release);
        let taken = drainer.join().unwrap() + queue.take_all().len();

        assert_eq!(taken, PUSHERS * PER_PUSHER);
        assert_eq!(queue.len(), 0);
        assert!(!queue.has_pending());
    }

    #[test]
    fn take_all_leaves_no_phantom_pending_count() {
        let queue = FinalizationQueue::new();
        queue.push(FinalizerToken::new(NativeId::new(1), 0));
        queue.lock().push_back(FinalizerToken::new(NativeId::new(2), 1));

        assert_eq!(queue.take_all().len(), 2);
        assert_eq!(queue.len(), 0);
        assert!(!queue.has_pending());
        assert!(queue.take_all().is_empty());
    }

    #[test]
    fn absent_binding_is_ignored() {
        let mut registry = BindingRegistry::<ManagedHeap>::new();
        let outcome = apply_finalizer(
            &mut registry,
            FinalizerToken::new(NativeId::new(1), 0),
            FinalizePolicy::RemoveBinding,
        );
        assert_eq!(outcome, FinalizeOutcome::Absent);
    }

    #[test]
    fn ticket_mismatch_is_stale() {
        let heap = ManagedHeap::new();
        let mut registry = BindingRegistry::new();
        registry.insert(weak_binding(&heap, 1, true, 4)).unwrap();

        let outcome = apply_finalizer(
            &mut registry,
            FinalizerToken::new(NativeId::new(1), 3),
            FinalizePolicy::RemoveBinding,
        );
        assert_eq!(outcome, FinalizeOutcome::Stale);
        assert!(registry.contains(NativeId::new(1)));
    }

    #[test]
    fn strong_binding_is_never_finalized() {
        let heap = ManagedHeap::new();
        let mut registry = BindingRegistry::new();
        registry.insert(weak_binding(&heap, 2, false, 0)).unwrap();

        let outcome = apply_finalizer(
            &mut registry,
            FinalizerToken::new(NativeId::new(2), 0),
            FinalizePolicy::RemoveBinding,
        );
        assert_eq!(outcome, FinalizeOutcome::Stale);
    }

    #[test]
    fn remove_policy_drops_binding() {
        let heap = ManagedHeap::new();
        let mut registry = BindingRegistry::new();
        registry.insert(weak_binding(&heap, 3, true, 9)).unwrap();

        let outcome = apply_finalizer(
            &mut registry,
            FinalizerToken::new(NativeId::new(3), 9),
            FinalizePolicy::RemoveBinding,
        );
        assert_eq!(outcome, FinalizeOutcome::Removed { refcounted: true });
        assert_eq!(
            outcome.released_reference(NativeId::new(3)),
            Some(NativeId::new(3))
        );
        assert!(registry.is_empty());
    }

    #[test]
    fn reset_policy_keeps_uninitialized_binding() {
        let heap = ManagedHeap::new();
        let mut registry = BindingRegistry::new();
        registry.insert(weak_binding(&heap, 4, true, 1)).unwrap();

        let outcome = apply_finalizer(
            &mut registry,
            FinalizerToken::new(NativeId::new(4), 1),
            FinalizePolicy::ResetBinding,
        );
        assert_eq!(outcome, FinalizeOutcome::Reset { refcounted: true });
        assert_eq!(
            registry.lookup(NativeId::new(4)).map(BindingRecord::mode),
            Some(HandleMode::Uninitialized)
        );
    }
}
