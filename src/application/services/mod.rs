pub mod fetch_coordinator;

pub use fetch_coordinator::{FetchCoordinator, validate};
