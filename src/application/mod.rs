//! Application layer with coordination services.

/// Application services.
pub mod services;

pub use services::FetchCoordinator;
