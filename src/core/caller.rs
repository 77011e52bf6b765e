// Caller identity and opaque per-caller context tokens.
use std::ffi::c_void;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_CALLER_ID: AtomicU64 = AtomicU64::new(1);

thread_local! {
    static CURRENT_CALLER: CallerId = CallerId(NEXT_CALLER_ID.fetch_add(1, Ordering::Relaxed));
}

/// Identity of one execution unit. Ids handed out by `current` are never reused
/// within a process.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct CallerId(u64);

impl CallerId {
    /// Identity of the calling OS thread.
    pub fn current() -> Self {
        CURRENT_CALLER.with(|id| *id)
    }

    pub fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    pub fn as_raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for CallerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Pointer-sized value stored verbatim for a caller and never dereferenced here.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
pub struct ContextToken(usize);

impl ContextToken {
    pub const NULL: ContextToken = ContextToken(0);

    pub fn from_raw(raw: usize) -> Self {
        Self(raw)
    }

    pub fn from_ptr(ptr: *mut c_void) -> Self {
        Self(ptr as usize)
    }

    pub fn as_raw(self) -> usize {
        self.0
    }

    pub fn as_ptr(self) -> *mut c_void {
        self.0 as *mut c_void
    }

    pub fn is_null(self) -> bool {
        self.0 == 0
    }
}
