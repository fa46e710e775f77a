//! Per-app shared state.

pub mod lock;

pub use lock::ControlLock;
