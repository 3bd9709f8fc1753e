//! API middleware stack.
//!
//! Execution order (outermost to innermost):
//! 1. Request logger: method, path, status and latency for every request
//! 2. Diagnostics (debug mode only): copies internal error detail into bodies
//! 3. Concurrency limiter (separation route only): 503 when all slots are busy

pub mod audit;
pub mod concurrency;
pub mod diagnostics;
