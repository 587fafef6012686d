//! Native identity to binding record map.

use std::collections::hash_map::Entry;
use std::fmt;

use crossbind_core::{BindingError, BindingResult, ManagedRuntime, NativeId};
use rustc_hash::FxHashMap;

use crate::binding::BindingRecord;

/// The single arbiter of whether a native object has a binding.
///
/// Records are keyed by their own identity, so a key can never disagree with
/// the record stored under it.
pub struct BindingRegistry<R: ManagedRuntime> {
    records: FxHashMap<NativeId, BindingRecord<R>>,
}

impl<R: ManagedRuntime> BindingRegistry<R> {
    pub fn new() -> Self {
        Self::with_capacity(0)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            records: FxHashMap::with_capacity_and_hasher(capacity, Default::default()),
        }
    }

    pub fn lookup(&self, id: NativeId) -> Option<&BindingRecord<R>> {
        self.records.get(&id)
    }

    pub fn lookup_mut(&mut self, id: NativeId) -> Option<&mut BindingRecord<R>> {
        self.records.get_mut(&id)
    }

    pub fn contains(&self, id: NativeId) -> bool {
        self.records.contains_key(&id)
    }

    /// Insert a record under its own identity.
    ///
    /// A second binding for one identity is a programming error: debug builds
    /// panic, release builds reject the record (dropping it releases its
    /// handle) and report [`BindingError::DuplicateBinding`].
    pub fn insert(&mut self, record: BindingRecord<R>) -> BindingResult<()> {
        let id = record.id();
        match self.records.entry(id) {
            Entry::Occupied(_) => {
                debug_assert!(false, "duplicate binding for native object {id}");
                Err(BindingError::DuplicateBinding(id))
            }
            Entry::Vacant(slot) => {
                slot.insert(record);
                Ok(())
            }
        }
    }

    /// Remove and hand back the record for `id`, if any.
    pub fn remove(&mut self, id: NativeId) -> Option<BindingRecord<R>> {
        self.records.remove(&id)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn ids(&self) -> impl Iterator<Item = NativeId> + '_ {
        self.records.keys().copied()
    }

    /// Remove every record.
    pub fn drain(&mut self) -> impl Iterator<Item = BindingRecord<R>> + '_ {
        self.records.drain().map(|(_, record)| record)
    }
}

impl<R: ManagedRuntime> Default for BindingRegistry<R> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R: ManagedRuntime> fmt::Debug for BindingRegistry<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BindingRegistry")
            .field("len", &self.records.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use crossbind_core::HandleMode;
    use crossbind_heap::ManagedHeap;

    use super::*;

    fn record(raw: usize) -> BindingRecord<ManagedHeap> {
        BindingRecord::new(NativeId::new(raw), true, 0)
    }

    #[test]
    fn insert_then_lookup() {
        let mut registry = BindingRegistry::new();
        registry.insert(record(0x10)).unwrap();

        let found = registry.lookup(NativeId::new(0x10)).unwrap();
        assert_eq!(found.id(), NativeId::new(0x10));
        assert!(registry.lookup(NativeId::new(0x20)).is_none());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn remove_is_safe_when_absent() {
        let mut registry = BindingRegistry::<ManagedHeap>::new();
        registry.insert(record(1)).unwrap();

        assert!(registry.remove(NativeId::new(1)).is_some());
        assert!(registry.remove(NativeId::new(1)).is_none());
        assert!(registry.is_empty());
    }

    #[test]
    #[cfg_attr(debug_assertions, should_panic(expected = "duplicate binding"))]
    fn duplicate_insert_is_rejected() {
        let mut registry = BindingRegistry::new();
        registry.insert(record(7)).unwrap();

        let err = registry.insert(record(7)).unwrap_err();
        assert_eq!(err, BindingError::DuplicateBinding(NativeId::new(7)));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn lookup_mut_mutates_stored_record() {
        let heap = ManagedHeap::new();
        let mut registry = BindingRegistry::new();
        registry.insert(record(3)).unwrap();

        registry
            .lookup_mut(NativeId::new(3))
            .unwrap()
            .create_managed_object(&heap)
            .unwrap();
        assert_eq!(
            registry.lookup(NativeId::new(3)).map(BindingRecord::mode),
            Some(HandleMode::Strong)
        );
    }

    #[test]
    fn drain_empties_registry() {
        let mut registry = BindingRegistry::<ManagedHeap>::new();
        for raw in 1..=3 {
            registry.insert(record(raw)).unwrap();
        }
        let mut ids: Vec<_> = registry.ids().collect();
        ids.sort();
        assert_eq!(ids, vec![NativeId::new(1), NativeId::new(2), NativeId::new(3)]);

        assert_eq!(registry.drain().count(), 3);
        assert!(registry.is_empty());
    }
}
