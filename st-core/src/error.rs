//! Error type re-exports
//!
//! The unified error type lives in the st-error crate so the daemon and any
//! future wrappers share it without depending on the core.

pub use st_error::{Result, StudiotuneError};
