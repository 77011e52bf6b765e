//! Purpose: Per-caller state and lock multiplexing for a shared, globally-linked crypto library.
//! Exports: `core` (registry, lock table, lifecycle, errors), `api`, and the `abi` C surface.
//! Role: Library crate backing the `cryptoshare` CLI and the `libcryptoshare` shared object.
//! Invariants: Core modules take an explicit `Facility`; only `abi` keeps process-wide state.
//! Invariants: Contract violations surface as typed errors before the C boundary decides to abort.
pub mod abi;
pub mod api;
pub mod core;
pub mod logging;
