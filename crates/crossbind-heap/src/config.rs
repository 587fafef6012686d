/// Configuration for a [`ManagedHeap`](crate::ManagedHeap).
#[derive(Debug, Clone, Default)]
pub struct HeapConfig {
    pub(crate) capacity_limit: Option<usize>,
    pub(crate) collect_on_exhaustion: bool,
}

impl HeapConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Maximum number of live objects. Allocation past it fails.
    pub fn with_capacity_limit(mut self, limit: usize) -> Self {
        self.capacity_limit = Some(limit);
        self
    }

    /// Run a collection before failing an allocation at the capacity limit.
    ///
    /// Finalizers triggered this way are delivered from inside
    /// [`ManagedRuntime::create`](crossbind_core::ManagedRuntime::create).
    pub fn with_collect_on_exhaustion(mut self, enabled: bool) -> Self {
        self.collect_on_exhaustion = enabled;
        self
    }

    pub fn capacity_limit(&self) -> Option<usize> {
        self.capacity_limit
    }
}
