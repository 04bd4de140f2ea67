//! Utility modules for common functionality

pub mod fs;
pub mod signal;

pub use fs::write_atomic;
pub use signal::setup_signal_handlers;

// vim: ts=4
