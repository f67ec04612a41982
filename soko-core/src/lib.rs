//! soko-core: Shared infrastructure for soko services.
pub mod error;
pub mod middleware;
