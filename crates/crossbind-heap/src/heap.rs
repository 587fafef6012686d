//! Generational arena with strong counts, roots and weak finalizers.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use bitflags::bitflags;
use crossbind_core::{AllocationError, FinalizationSink, FinalizerToken, ManagedRuntime, NativeId};
use rustc_hash::FxHashMap;
use thiserror::Error;

use crate::config::HeapConfig;
use crate::handles::{StrongRef, WeakRef};

bitflags! {
    /// Per-object state bits.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
    pub struct ObjectFlags: u8 {
        /// Reachable from managed code (a script variable, a field, ...).
        const ROOTED = 1 << 0;
        /// At least one weak handle with a finalizer points here.
        const FINALIZABLE = 1 << 1;
    }
}

/// Reference to a managed object.
///
/// The generation makes references to a freed and reused slot compare
/// unequal and resolve to nothing.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ObjectRef {
    pub index: u32,
    pub generation: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HeapError {
    #[error("heap capacity of {limit} objects exhausted")]
    CapacityExceeded { limit: usize },
}

/// Result of one collection cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CollectStats {
    pub collected: usize,
    pub finalizers_run: usize,
}

struct Slot {
    generation: u32,
    native: Option<NativeId>,
    strong_count: u32,
    flags: ObjectFlags,
    weak_ids: Vec<u64>,
}

struct WeakEntry {
    object: ObjectRef,
    token: FinalizerToken,
}

#[derive(Default)]
pub(crate) struct HeapState {
    slots: Vec<Slot>,
    free_list: Vec<u32>,
    live: usize,
    weak_table: FxHashMap<u64, WeakEntry>,
    next_weak_id: u64,
}

impl HeapState {
    fn slot(&self, object: ObjectRef) -> Option<&Slot> {
        self.slots
            .get(object.index as usize)
            .filter(|slot| slot.generation == object.generation && slot.native.is_some())
    }

    fn slot_mut(&mut self, object: ObjectRef) -> Option<&mut Slot> {
        self.slots
            .get_mut(object.index as usize)
            .filter(|slot| slot.generation == object.generation && slot.native.is_some())
    }

    fn allocate(&mut self, native: NativeId) -> ObjectRef {
        self.live += 1;
        if let Some(index) = self.free_list.pop() {
            let slot = &mut self.slots[index as usize];
            slot.native = Some(native);
            slot.strong_count = 1;
            slot.flags = ObjectFlags::empty();
            ObjectRef {
                index,
                generation: slot.generation,
            }
        } else {
            let index = self.slots.len() as u32;
            self.slots.push(Slot {
                generation: 0,
                native: Some(native),
                strong_count: 1,
                flags: ObjectFlags::empty(),
                weak_ids: Vec::new(),
            });
            ObjectRef {
                index,
                generation: 0,
            }
        }
    }

    /// Free every unpinned, unrooted object and return its finalizer tokens.
    fn sweep(&mut self) -> (usize, Vec<FinalizerToken>) {
        let mut collected = 0;
        let mut tokens = Vec::new();

        for (index, slot) in self.slots.iter_mut().enumerate() {
            if slot.native.is_none()
                || slot.strong_count > 0
                || slot.flags.contains(ObjectFlags::ROOTED)
            {
                continue;
            }

            for weak_id in slot.weak_ids.drain(..) {
                if let Some(entry) = self.weak_table.remove(&weak_id) {
                    tokens.push(entry.token);
                }
            }

            slot.native = None;
            slot.flags = ObjectFlags::empty();
            slot.generation = slot.generation.wrapping_add(1);
            self.free_list.push(index as u32);
            collected += 1;
        }

        self.live -= collected;
        (collected, tokens)
    }
}

pub(crate) struct HeapShared {
    state: Mutex<HeapState>,
    sink: Mutex<Option<Arc<dyn FinalizationSink>>>,
    config: HeapConfig,
}

impl HeapShared {
    pub(crate) fn state(&self) -> MutexGuard<'_, HeapState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn release_strong(&self, object: ObjectRef) {
        let mut state = self.state();
        if let Some(slot) = state.slot_mut(object) {
            slot.strong_count = slot.strong_count.saturating_sub(1);
        }
    }

    pub(crate) fn drop_weak(&self, object: ObjectRef, weak_id: u64) {
        let mut state = self.state();
        if state.weak_table.remove(&weak_id).is_none() {
            // Already handed to the finalizer by a sweep.
            return;
        }
        if let Some(slot) = state.slot_mut(object) {
            slot.weak_ids.retain(|id| *id != weak_id);
            if slot.weak_ids.is_empty() {
                slot.flags.remove(ObjectFlags::FINALIZABLE);
            }
        }
    }

    pub(crate) fn is_alive(&self, object: ObjectRef) -> bool {
        self.state().slot(object).is_some()
    }
}

/// A managed heap. Cloning yields another handle to the same heap.
#[derive(Clone)]
pub struct ManagedHeap {
    shared: Arc<HeapShared>,
}

impl ManagedHeap {
    pub fn new() -> Self {
        Self::with_config(HeapConfig::default())
    }

    pub fn with_config(config: HeapConfig) -> Self {
        Self {
            shared: Arc::new(HeapShared {
                state: Mutex::new(HeapState::default()),
                sink: Mutex::new(None),
                config,
            }),
        }
    }

    /// Allocate an object mirroring `native`, returning a strong handle to it.
    #[cfg_attr(feature = "profiling", profiling::function)]
    pub fn allocate(&self, native: NativeId) -> Result<StrongRef, HeapError> {
        if let Some(limit) = self.shared.config.capacity_limit {
            if self.shared.state().live >= limit {
                if self.shared.config.collect_on_exhaustion {
                    tracing::trace!("heap exhausted at {} objects, collecting", limit);
                    self.collect();
                }
                if self.shared.state().live >= limit {
                    return Err(HeapError::CapacityExceeded { limit });
                }
            }
        }

        let object = self.shared.state().allocate(native);
        tracing::trace!("allocated managed object {:?} for {}", object, native);
        Ok(StrongRef::new(Arc::clone(&self.shared), object))
    }

    /// Mark `object` reachable from managed code.
    pub fn root(&self, object: ObjectRef) -> bool {
        self.set_rooted(object, true)
    }

    /// Drop the managed-code reference to `object`.
    pub fn unroot(&self, object: ObjectRef) -> bool {
        self.set_rooted(object, false)
    }

    fn set_rooted(&self, object: ObjectRef, rooted: bool) -> bool {
        let mut state = self.shared.state();
        match state.slot_mut(object) {
            Some(slot) => {
                slot.flags.set(ObjectFlags::ROOTED, rooted);
                true
            }
            None => false,
        }
    }

    pub fn is_alive(&self, object: ObjectRef) -> bool {
        self.shared.is_alive(object)
    }

    /// The native object `object` mirrors, if it is alive.
    pub fn native_of(&self, object: ObjectRef) -> Option<NativeId> {
        self.shared.state().slot(object).and_then(|slot| slot.native)
    }

    pub fn strong_count(&self, object: ObjectRef) -> Option<u32> {
        self.shared.state().slot(object).map(|slot| slot.strong_count)
    }

    pub fn flags(&self, object: ObjectRef) -> Option<ObjectFlags> {
        self.shared.state().slot(object).map(|slot| slot.flags)
    }

    pub fn live_objects(&self) -> usize {
        self.shared.state().live
    }

    /// Number of weak handles whose finalizer has not run or been cancelled.
    pub fn pending_finalizers(&self) -> usize {
        self.shared.state().weak_table.len()
    }

    /// Collect every object with no strong handle and no root.
    ///
    /// Finalizers run on the calling thread after the heap lock is released,
    /// one call per collected weak handle.
    #[cfg_attr(feature = "profiling", profiling::function)]
    pub fn collect(&self) -> CollectStats {
        let (collected, tokens) = self.shared.state().sweep();

        let sink = self
            .shared
            .sink
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();

        let finalizers_run = match sink {
            Some(sink) => {
                for token in &tokens {
                    sink.finalize(*token);
                }
                tokens.len()
            }
            None => 0,
        };

        tracing::debug!(
            "collected {} managed objects, ran {} finalizers",
            collected,
            finalizers_run
        );

        CollectStats {
            collected,
            finalizers_run,
        }
    }
}

impl Default for ManagedHeap {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ManagedHeap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.shared.state();
        f.debug_struct("ManagedHeap")
            .field("slot_count", &state.slots.len())
            .field("live", &state.live)
            .field("weak_handles", &state.weak_table.len())
            .finish()
    }
}

impl ManagedRuntime for ManagedHeap {
    type Strong = StrongRef;
    type Weak = WeakRef;
    type Local = ObjectRef;

    fn register_finalizer(&self, sink: Arc<dyn FinalizationSink>) {
        *self
            .shared
            .sink
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(sink);
    }

    fn create(&self, id: NativeId) -> Result<StrongRef, AllocationError> {
        self.allocate(id)
            .map_err(|err| AllocationError::new(id, err.to_string()))
    }

    fn downgrade(&self, strong: &StrongRef, token: FinalizerToken) -> WeakRef {
        let object = strong.object();
        let mut state = self.shared.state();

        let weak_id = state.next_weak_id;
        state.next_weak_id += 1;
        state.weak_table.insert(weak_id, WeakEntry { object, token });
        if let Some(slot) = state.slot_mut(object) {
            slot.weak_ids.push(weak_id);
            slot.flags.insert(ObjectFlags::FINALIZABLE);
        }
        drop(state);

        WeakRef::new(Arc::clone(&self.shared), object, weak_id)
    }

    fn upgrade(&self, weak: &WeakRef) -> Option<StrongRef> {
        let object = weak.object();
        let mut state = self.shared.state();
        let slot = state.slot_mut(object)?;
        slot.strong_count += 1;
        drop(state);

        Some(StrongRef::new(Arc::clone(&self.shared), object))
    }

    fn local(&self, strong: &StrongRef) -> ObjectRef {
        strong.object()
    }

    fn local_of_weak(&self, weak: &WeakRef) -> Option<ObjectRef> {
        let object = weak.object();
        self.shared.is_alive(object).then_some(object)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;

    #[derive(Default)]
    struct RecordingSink {
        tokens: Mutex<Vec<FinalizerToken>>,
    }

    impl FinalizationSink for RecordingSink {
        fn finalize(&self, token: FinalizerToken) {
            self.tokens.lock().unwrap().push(token);
        }
    }

    fn heap_with_sink() -> (ManagedHeap, Arc<RecordingSink>) {
        let heap = ManagedHeap::new();
        let sink = Arc::new(RecordingSink::default());
        heap.register_finalizer(sink.clone());
        (heap, sink)
    }

    #[test]
    fn strong_handle_pins_object() {
        let (heap, _) = heap_with_sink();
        let strong = heap.allocate(NativeId::new(1)).unwrap();

        assert_eq!(heap.collect().collected, 0);
        assert!(heap.is_alive(strong.object()));
        assert_eq!(heap.native_of(strong.object()), Some(NativeId::new(1)));
    }

    #[test]
    fn dropping_last_strong_handle_allows_collection() {
        let (heap, sink) = heap_with_sink();
        let strong = heap.allocate(NativeId::new(1)).unwrap();
        let object = strong.object();
        drop(strong);

        assert_eq!(heap.collect().collected, 1);
        assert!(!heap.is_alive(object));
        assert!(sink.tokens.lock().unwrap().is_empty());
    }

    #[test]
    fn weak_handle_finalizer_runs_on_collection() {
        let (heap, sink) = heap_with_sink();
        let strong = heap.allocate(NativeId::new(7)).unwrap();
        let token = FinalizerToken::new(NativeId::new(7), 3);
        let weak = heap.downgrade(&strong, token);
        assert_eq!(heap.flags(strong.object()), Some(ObjectFlags::FINALIZABLE));
        drop(strong);

        let stats = heap.collect();
        assert_eq!(stats.collected, 1);
        assert_eq!(stats.finalizers_run, 1);
        assert_eq!(*sink.tokens.lock().unwrap(), vec![token]);
        assert!(heap.upgrade(&weak).is_none());
        assert!(heap.local_of_weak(&weak).is_none());
    }

    #[test]
    fn dropping_weak_handle_cancels_finalizer() {
        let (heap, sink) = heap_with_sink();
        let strong = heap.allocate(NativeId::new(2)).unwrap();
        let weak = heap.downgrade(&strong, FinalizerToken::new(NativeId::new(2), 0));
        assert_eq!(heap.pending_finalizers(), 1);

        drop(weak);
        drop(strong);

        assert_eq!(heap.pending_finalizers(), 0);
        assert_eq!(heap.collect().finalizers_run, 0);
        assert!(sink.tokens.lock().unwrap().is_empty());
    }

    #[test]
    fn rooted_object_survives_without_strong_handles() {
        let (heap, _) = heap_with_sink();
        let strong = heap.allocate(NativeId::new(3)).unwrap();
        let object = strong.object();
        assert!(heap.root(object));
        drop(strong);

        assert_eq!(heap.collect().collected, 0);
        assert!(heap.unroot(object));
        assert_eq!(heap.collect().collected, 1);
    }

    #[test]
    fn upgrade_preserves_identity() {
        let (heap, _) = heap_with_sink();
        let strong = heap.allocate(NativeId::new(4)).unwrap();
        let weak = heap.downgrade(&strong, FinalizerToken::new(NativeId::new(4), 0));
        let object = strong.object();
        drop(strong);

        let promoted = heap.upgrade(&weak).unwrap();
        assert_eq!(promoted.object(), object);
        assert_eq!(heap.strong_count(object), Some(1));
    }

    #[test]
    fn reused_slot_gets_new_generation() {
        let (heap, _) = heap_with_sink();
        let first = heap.allocate(NativeId::new(5)).unwrap().object();
        heap.collect();

        let second = heap.allocate(NativeId::new(6)).unwrap();
        assert_eq!(second.object().index, first.index);
        assert_ne!(second.object(), first);
        assert!(!heap.is_alive(first));
    }

    #[test]
    fn capacity_limit_fails_allocation() {
        let heap = ManagedHeap::with_config(HeapConfig::new().with_capacity_limit(1));
        let _held = heap.allocate(NativeId::new(1)).unwrap();

        let err = heap.create(NativeId::new(2)).unwrap_err();
        assert_eq!(err.id, NativeId::new(2));
        assert_eq!(err.reason, "heap capacity of 1 objects exhausted");
    }

    #[test]
    fn exhaustion_collects_before_failing() {
        let heap = ManagedHeap::with_config(
            HeapConfig::new()
                .with_capacity_limit(1)
                .with_collect_on_exhaustion(true),
        );
        drop(heap.allocate(NativeId::new(1)).unwrap());

        assert!(heap.allocate(NativeId::new(2)).is_ok());
        assert_eq!(heap.live_objects(), 1);
    }
}
