//! Domain layer for camcast.
//!
//! Pure value types with no I/O: encoded and raw frames, orientation
//! transforms, and session identity plus lifecycle state.

pub mod frame;
pub mod orientation;
pub mod session;
