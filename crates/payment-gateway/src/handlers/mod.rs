//! Request handlers for API endpoints

pub mod health;
pub mod helpers;
pub mod payments;

// Re-export commonly used handlers
pub use health::*;
pub use payments::*;
