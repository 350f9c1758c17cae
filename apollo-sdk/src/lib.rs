//! Shared types for the Apollo config service.
//!
//! The `objects` module holds the JSON payloads exchanged with clients.
//! The optional `client` module (behind the `client` feature) provides a
//! typed HTTP client for the long-polling and config-file endpoints.

pub mod constants;
pub mod objects;

#[cfg(feature = "client")]
pub mod client;
