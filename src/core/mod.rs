// Core modules implementing caller state, lock multiplexing, and the load lifecycle.
pub mod caller;
pub mod config;
pub mod error;
pub mod lifecycle;
pub mod lock_table;
pub mod platform;
pub mod registry;
