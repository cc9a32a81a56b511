//! Data layer: row models and Postgres repositories.
//!
//! All coordination between worker processes flows through this layer's
//! atomic operations; no repository holds in-memory state.

pub mod jobs;
pub mod marketplace;
pub mod metadata;
pub mod models;
pub mod products;
pub mod raw_payloads;
pub mod reddit;
pub mod retail;
pub mod retirement;
pub mod sessions;
