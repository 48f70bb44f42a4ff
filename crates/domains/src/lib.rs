//! crates/domains/src/lib.rs
//!
//! Entities, failure taxonomy and port definitions for the comment board.
//! Nothing in this crate performs I/O.

pub mod errors;
pub mod models;
pub mod ports;
pub mod validation;

// Re-exporting for easier access in other crates
pub use errors::*;
pub use models::*;
pub use ports::*;
