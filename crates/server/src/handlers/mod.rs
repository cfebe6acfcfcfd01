//! HTTP request handlers.

pub mod artifacts;
pub mod status;

pub use artifacts::*;
pub use status::*;
