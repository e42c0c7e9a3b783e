//! Business logic services
//!
//! Request handlers in `api` translate HTTP requests into calls of these
//! services and render their results.

pub mod auth;
pub mod configuration;
pub mod firmware;
pub mod parameters;
pub mod status;
