//! Per native object binding record.
//!
//! ```text
//!                 create_managed_object
//!  Uninitialized ─────────────────────────▶ Strong
//!        ▲                                  │   ▲
//!        │ clear_collected     convert_to_weak   convert_to_strong
//!        │                                  ▼   │
//!        └──────────────────────────────── Weak
//!
//!  destroy(self) from any state
//! ```
//!
//! The handle lives inside the mode: `None` is `Uninitialized`, otherwise the
//! [`ManagedHandle`] variant is the mode, so "a handle exists iff the mode is
//! not `Uninitialized`" cannot be violated.

use std::fmt;

use crossbind_core::{
    BindingError, BindingResult, FinalizerToken, HandleMode, ManagedRuntime, NativeId,
};

use crate::handle::ManagedHandle;

pub struct BindingRecord<R: ManagedRuntime> {
    id: NativeId,
    is_refcounted: bool,
    epoch: u64,
    handle: Option<ManagedHandle<R>>,
}

impl<R: ManagedRuntime> BindingRecord<R> {
    /// A binding with no managed object yet.
    ///
    /// `is_refcounted` is fixed for the life of the record.
    pub fn new(id: NativeId, is_refcounted: bool, epoch: u64) -> Self {
        Self {
            id,
            is_refcounted,
            epoch,
            handle: None,
        }
    }

    pub fn id(&self) -> NativeId {
        self.id
    }

    pub fn is_refcounted(&self) -> bool {
        self.is_refcounted
    }

    /// Serial of this record within its session. A rebinding of the same
    /// native address gets a new epoch, and so does a record whose collected
    /// managed object was cleared.
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Move the record to a new epoch, invalidating cached references to its
    /// previous managed object.
    pub fn renew_epoch(&mut self, epoch: u64) {
        tracing::trace!("binding {} moved from epoch {} to {}", self.id, self.epoch, epoch);
        self.epoch = epoch;
    }

    pub fn mode(&self) -> HandleMode {
        self.handle
            .as_ref()
            .map_or(HandleMode::Uninitialized, ManagedHandle::mode)
    }

    pub fn is_initialized(&self) -> bool {
        self.mode().has_handle()
    }

    pub fn is_weak(&self) -> bool {
        self.mode() == HandleMode::Weak
    }

    /// Ticket of the current weak handle's finalizer.
    pub fn weak_ticket(&self) -> Option<u64> {
        self.handle.as_ref().and_then(ManagedHandle::ticket)
    }

    /// Allocate the managed counterpart and hold it strongly.
    ///
    /// On allocation failure the record stays `Uninitialized`.
    #[cfg_attr(feature = "profiling", profiling::function)]
    pub fn create_managed_object(&mut self, runtime: &R) -> BindingResult<()> {
        if self.handle.is_some() {
            return Err(BindingError::AlreadyInitialized(self.id));
        }

        self.handle = Some(ManagedHandle::create(runtime, self.id)?);
        tracing::debug!("created managed object for {}", self.id);
        Ok(())
    }

    /// Weak → Strong. Already strong is a successful no-op.
    ///
    /// Fails with [`BindingError::Collected`] when the managed object is
    /// gone; the record then keeps its dead weak handle until the collection
    /// is applied with [`clear_collected`](Self::clear_collected) or the
    /// record is destroyed.
    pub fn convert_to_strong(&mut self, runtime: &R) -> BindingResult<()> {
        let handle = self
            .handle
            .as_mut()
            .ok_or(BindingError::Uninitialized(self.id))?;
        let previous = handle.mode();
        handle.convert_to_strong(runtime)?;

        if previous == HandleMode::Weak {
            tracing::trace!("binding {} converted to strong", self.id);
        }
        Ok(())
    }

    /// Strong → Weak, registering a finalizer carrying `ticket`.
    /// Already weak is a successful no-op.
    ///
    /// Bindings of objects that are not reference counted never become weak.
    pub fn convert_to_weak(&mut self, runtime: &R, ticket: u64) -> BindingResult<()> {
        if !self.is_refcounted {
            return Err(BindingError::NotRefCounted(self.id));
        }
        let handle = self
            .handle
            .as_mut()
            .ok_or(BindingError::Uninitialized(self.id))?;
        if handle.mode() == HandleMode::Weak {
            return Ok(());
        }

        handle.convert_to_weak(runtime, FinalizerToken::new(self.id, ticket));
        tracing::trace!("binding {} converted to weak (ticket {})", self.id, ticket);
        Ok(())
    }

    /// Drop the weak handle whose object was collected, back to
    /// `Uninitialized`. Returns `false` if `ticket` is not the current weak
    /// handle's ticket.
    pub fn clear_collected(&mut self, ticket: u64) -> bool {
        if self.weak_ticket() != Some(ticket) {
            return false;
        }
        if let Some(handle) = self.handle.take() {
            handle.release();
        }
        true
    }

    /// Local reference to the managed object, if it exists and is alive.
    pub fn local(&self, runtime: &R) -> Option<R::Local> {
        self.handle.as_ref().and_then(|handle| handle.local(runtime))
    }

    /// Tear the record down, releasing its handle. Returns the mode it was in.
    pub fn destroy(self) -> HandleMode {
        let mode = self.mode();
        if let Some(handle) = self.handle {
            handle.release();
        }
        tracing::debug!("destroyed binding {} ({})", self.id, mode);
        mode
    }
}

impl<R: ManagedRuntime> fmt::Debug for BindingRecord<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BindingRecord")
            .field("id", &self.id)
            .field("is_refcounted", &self.is_refcounted)
            .field("epoch", &self.epoch)
            .field("mode", &self.mode())
            .finish()
    }
}
