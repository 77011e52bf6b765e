//! Purpose: Define the public Rust API boundary for cryptoshare.
//! Exports: Core types and operations needed by embedders, the CLI, and the C ABI.
//! Role: Public, additive-only surface over the core modules.
//! Invariants: Everything an embedder needs is reachable from here.

pub use crate::core::caller::{CallerId, ContextToken};
pub use crate::core::config::{DEFAULT_LOCK_SLOTS, FacilityConfig};
#[doc(hidden)]
pub use crate::core::error::to_exit_code;
pub use crate::core::error::{Error, ErrorKind};
pub use crate::core::lifecycle::{Facility, LifecycleController, LifecycleState, UnloadReport};
pub use crate::core::lock_table::{
    LOCK_MODE_LOCK, LOCK_MODE_READ, LOCK_MODE_UNLOCK, LOCK_MODE_WRITE, LockProvider, LockTable,
    SlotGuard, SlotStats, TeardownReport,
};
pub use crate::core::platform::{Platform, PlatformResources, SystemPlatform};
pub use crate::core::registry::{AttachOptions, CallerState, StateRegistry};
