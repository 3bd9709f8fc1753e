//! API endpoint handlers.

pub mod download;
pub mod health;
pub mod separate;
