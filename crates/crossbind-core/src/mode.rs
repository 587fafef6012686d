use std::fmt;

/// How a binding currently holds its managed counterpart.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub enum HandleMode {
    /// No managed object exists yet (or it was collected and cleared).
    #[default]
    Uninitialized,
    /// The managed object is kept alive by the native side.
    Strong,
    /// The managed object follows its own reachability and may be collected.
    Weak,
}

impl HandleMode {
    /// Whether a handle is held in this mode.
    #[inline]
    pub fn has_handle(self) -> bool {
        !matches!(self, HandleMode::Uninitialized)
    }
}

impl fmt::Display for HandleMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            HandleMode::Uninitialized => "uninitialized",
            HandleMode::Strong => "strong",
            HandleMode::Weak => "weak",
        };
        f.write_str(name)
    }
}
