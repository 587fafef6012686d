//! Strong/weak persistent handle owned by a binding.
//!
//! A [`ManagedHandle`] is exactly one runtime handle in one mode. Conversions
//! replace the handle in place: the new handle is created first, then the old
//! one is dropped, which releases its runtime slot (and, for a weak handle,
//! cancels its finalizer).

use std::fmt;

use crossbind_core::{
    BindingError, BindingResult, FinalizerToken, HandleMode, ManagedRuntime, NativeId,
};

pub enum ManagedHandle<R: ManagedRuntime> {
    Strong(R::Strong),
    Weak {
        handle: R::Weak,
        token: FinalizerToken,
    },
}

impl<R: ManagedRuntime> ManagedHandle<R> {
    /// Allocate the managed counterpart of `id` and hold it strongly.
    pub fn create(runtime: &R, id: NativeId) -> BindingResult<Self> {
        let strong = runtime.create(id)?;
        Ok(ManagedHandle::Strong(strong))
    }

    pub fn mode(&self) -> HandleMode {
        match self {
            ManagedHandle::Strong(_) => HandleMode::Strong,
            ManagedHandle::Weak { .. } => HandleMode::Weak,
        }
    }

    /// Ticket of the finalizer registered with a weak handle.
    pub fn ticket(&self) -> Option<u64> {
        match self {
            ManagedHandle::Strong(_) => None,
            ManagedHandle::Weak { token, .. } => Some(token.ticket),
        }
    }

    /// Promote to strong.
    ///
    /// A strong handle is left as is. If the weakly held object was already
    /// collected this fails with [`BindingError::Collected`] and the dead weak
    /// handle stays in place; it must not be used except to be released.
    pub fn convert_to_strong(&mut self, runtime: &R) -> BindingResult<()> {
        let strong = match self {
            ManagedHandle::Strong(_) => return Ok(()),
            ManagedHandle::Weak { handle, token } => runtime
                .upgrade(handle)
                .ok_or(BindingError::Collected(token.id))?,
        };
        *self = ManagedHandle::Strong(strong);
        Ok(())
    }

    /// Demote to weak, registering `token` with the runtime's finalizer.
    ///
    /// A weak handle is left as is and keeps its original token.
    pub fn convert_to_weak(&mut self, runtime: &R, token: FinalizerToken) {
        let weak = match self {
            ManagedHandle::Strong(strong) => runtime.downgrade(strong, token),
            ManagedHandle::Weak { .. } => return,
        };
        *self = ManagedHandle::Weak {
            handle: weak,
            token,
        };
    }

    /// Local reference for marshaling, or `None` if the object was collected.
    pub fn local(&self, runtime: &R) -> Option<R::Local> {
        match self {
            ManagedHandle::Strong(strong) => Some(runtime.local(strong)),
            ManagedHandle::Weak { handle, .. } => runtime.local_of_weak(handle),
        }
    }

    /// Give the handle's slot back to the runtime.
    pub fn release(self) {
        tracing::trace!("releasing {} managed handle", self.mode());
        drop(self);
    }
}

impl<R: ManagedRuntime> fmt::Debug for ManagedHandle<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ManagedHandle::Strong(_) => f.write_str("Strong"),
            ManagedHandle::Weak { token, .. } => {
                f.debug_struct("Weak").field("token", token).finish()
            }
        }
    }
}
