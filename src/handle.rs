// Resource handles
//
// Small integer tokens referencing GPU objects through a registry.
// Every family has its own newtype so a shader handle can never be
// passed where a buffer handle is expected. `u16::MAX` is the sentinel.

use std::fmt;

/// Raw index reserved as "no handle" in every family.
pub const INVALID_INDEX: u16 = u16::MAX;

/// Shared surface of every handle family.
pub trait Handle: Copy + Eq + std::hash::Hash + fmt::Debug {
    const NULL: Self;

    fn from_index(index: u16) -> Self;
    fn index(self) -> u16;

    fn is_valid(self) -> bool {
        self.index() != INVALID_INDEX
    }
}

macro_rules! define_handle {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
        pub struct $name(u16);

        impl $name {
            pub const NULL: Self = Self(INVALID_INDEX);

            pub const fn is_valid(self) -> bool {
                self.0 != INVALID_INDEX
            }

            pub const fn index(self) -> u16 {
                self.0
            }
        }

        impl Handle for $name {
            const NULL: Self = Self(INVALID_INDEX);

            fn from_index(index: u16) -> Self {
                Self(index)
            }

            fn index(self) -> u16 {
                self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::NULL
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                if self.is_valid() {
                    write!(f, "{}({})", stringify!($name), self.0)
                } else {
                    write!(f, "{}(NULL)", stringify!($name))
                }
            }
        }
    };
}

define_handle!(
    /// A render target: window-backed swapchain or headless offscreen image.
    FramebufferHandle
);
define_handle!(
    /// A compiled shader module.
    ShaderHandle
);
define_handle!(
    /// A vertex + fragment stage pair linked into a view's pipeline.
    ProgramHandle
);
define_handle!(
    /// A device-local vertex or index buffer.
    BufferHandle
);

/// Monotonic per-family counter. Starts at 0, never yields the sentinel,
/// never wraps and never reuses a value.
#[derive(Debug, Default)]
pub struct HandleAllocator {
    next: u16,
}

impl HandleAllocator {
    pub const fn new() -> Self {
        Self { next: 0 }
    }

    /// Next index, or `None` once every non-sentinel value has been handed out.
    pub fn allocate(&mut self) -> Option<u16> {
        if self.next == INVALID_INDEX {
            return None;
        }
        let index = self.next;
        self.next += 1;
        Some(index)
    }

    /// Number of indices handed out so far.
    pub fn issued(&self) -> usize {
        self.next as usize
    }
}

#[cfg(test)]
#[path = "handle_tests.rs"]
mod tests;
