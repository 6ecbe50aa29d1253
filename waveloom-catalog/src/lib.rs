//! Ampache-protocol catalog client: session handshake, a single-at-a-time
//! operation queue with transparent session-expiry retry, and shuffle-batch
//! assembly from favorite and regular track pools.

pub mod client;
pub mod error;
pub mod operations;
pub mod session;
pub mod shuffle;
pub mod xml;

pub use client::{CatalogClient, CatalogOptions, ServerConfig};
pub use error::{CatalogError, Result};
