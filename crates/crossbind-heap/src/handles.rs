//! RAII persistent handles into a [`ManagedHeap`](crate::ManagedHeap).

use std::fmt;
use std::sync::Arc;

use crate::heap::{HeapShared, ObjectRef};

/// Strong persistent handle. Keeps its object alive until dropped.
pub struct StrongRef {
    heap: Arc<HeapShared>,
    object: ObjectRef,
}

impl StrongRef {
    pub(crate) fn new(heap: Arc<HeapShared>, object: ObjectRef) -> Self {
        Self { heap, object }
    }

    pub fn object(&self) -> ObjectRef {
        self.object
    }
}

impl Drop for StrongRef {
    fn drop(&mut self) {
        self.heap.release_strong(self.object);
    }
}

impl fmt::Debug for StrongRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("StrongRef").field(&self.object).finish()
    }
}

/// Weak persistent handle with a registered finalizer.
///
/// Dropping it before its object is collected cancels the finalizer.
pub struct WeakRef {
    heap: Arc<HeapShared>,
    object: ObjectRef,
    weak_id: u64,
}

impl WeakRef {
    pub(crate) fn new(heap: Arc<HeapShared>, object: ObjectRef, weak_id: u64) -> Self {
        Self {
            heap,
            object,
            weak_id,
        }
    }

    /// The object this handle was created for. It may no longer be alive.
    pub fn object(&self) -> ObjectRef {
        self.object
    }

    pub fn is_alive(&self) -> bool {
        self.heap.is_alive(self.object)
    }
}

impl Drop for WeakRef {
    fn drop(&mut self) {
        self.heap.drop_weak(self.object, self.weak_id);
    }
}

impl fmt::Debug for WeakRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WeakRef")
            .field("object", &self.object)
            .field("weak_id", &self.weak_id)
            .finish()
    }
}
