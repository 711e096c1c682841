//! Payment Gateway Library
//!
//! Exposes the handlers, services and storage ports for the binary and for
//! integration tests.

pub mod error;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod openapi;
pub mod repositories;
pub mod routes;
pub mod services;

pub use error::PaymentError;
