//! HTTP API.
//!
//! Routes:
//! - `GET /`, `GET /health`, `GET /ready`: service banner, liveness, readiness
//! - `POST /api/v1/separate`: upload and separate one audio file
//! - `GET /api/v1/separate/:job_id/download/:filename`: fetch one stem
//!
//! `api_router()` returns a plain `Router` so it can be mounted on any axum
//! server; `start_server()` is the standalone lifecycle used by the binary.

pub mod endpoints;
pub mod error;
pub mod middleware;
pub mod router;
pub mod server;
pub mod types;

pub use router::api_router;
pub use server::{shutdown_signal, start_server, ApiServer, ServerError, ServerSession};
pub use types::ApiContext;
