//! The native engine's side of the binding contract.

use crossbind_core::NativeId;

/// Callbacks into the native engine.
pub trait NativeHost: Send + Sync {
    /// The managed mirror of a reference-counted object was collected.
    ///
    /// The mirror held one native reference; the host should drop it now.
    /// Called once per collected mirror, never while the session lock is
    /// held, so the host may re-enter the session (typically with
    /// [`destroy`](crate::BindingSession::destroy) when the count hits zero).
    fn release_managed_reference(&self, id: NativeId);
}

impl<F> NativeHost for F
where
    F: Fn(NativeId) + Send + Sync,
{
    fn release_managed_reference(&self, id: NativeId) {
        self(id)
    }
}

/// A change in who holds a reference-counted native object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HolderTransition {
    /// A native-side holder appeared next to the managed mirror.
    NativeHolderGained,
    /// The last native-side holder went away; only the managed mirror is left.
    LastNativeHolderLost,
}

impl HolderTransition {
    /// Classify a raw reference count change.
    ///
    /// The managed mirror owns one reference, so a count above one after an
    /// increment means a native holder exists, and a count of exactly one
    /// after a decrement means the mirror is the only holder left.
    pub fn from_refcount(incremented: bool, refcount: u32) -> Option<Self> {
        match (incremented, refcount) {
            (true, count) if count > 1 => Some(HolderTransition::NativeHolderGained),
            (false, 1) => Some(HolderTransition::LastNativeHolderLost),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn refcount_changes_map_to_transitions() {
        assert_eq!(
            HolderTransition::from_refcount(true, 2),
            Some(HolderTransition::NativeHolderGained)
        );
        assert_eq!(
            HolderTransition::from_refcount(false, 1),
            Some(HolderTransition::LastNativeHolderLost)
        );
        assert_eq!(HolderTransition::from_refcount(true, 1), None);
        assert_eq!(HolderTransition::from_refcount(false, 3), None);
        assert_eq!(HolderTransition::from_refcount(false, 0), None);
    }
}
