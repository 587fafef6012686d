//! Identity tokens crossing the native/managed boundary.

use std::fmt;

/// Opaque identity of a native engine object.
///
/// Usually the object's address. The binding layer only compares and hashes
/// it; it never dereferences it and never owns the object behind it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NativeId(usize);

impl NativeId {
    /// Create an identity from a raw address or engine object id.
    #[inline]
    pub const fn new(raw: usize) -> Self {
        Self(raw)
    }

    /// Create an identity from a native pointer.
    #[inline]
    pub fn from_ptr<T>(ptr: *const T) -> Self {
        Self(ptr as usize)
    }

    /// The raw value this identity was created from.
    #[inline]
    pub const fn raw(self) -> usize {
        self.0
    }
}

impl fmt::Display for NativeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// Context registered with a weak handle and handed back on collection.
///
/// `ticket` is unique per weak handle within a session, so a finalizer that
/// arrives after its handle was replaced can be told apart from a live one.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct FinalizerToken {
    pub id: NativeId,
    pub ticket: u64,
}

impl FinalizerToken {
    pub fn new(id: NativeId, ticket: u64) -> Self {
        Self { id, ticket }
    }
}
