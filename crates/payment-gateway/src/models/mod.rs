//! Data models: database rows and API DTOs

pub mod common;
pub mod payments;
pub mod requests;

// Re-exports
pub use common::*;
pub use payments::*;
pub use requests::*;
