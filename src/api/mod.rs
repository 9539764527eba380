//! HTTP API for the content pipeline.
//!
//! ## Endpoints
//!
//! - `POST /api/generate` - Submit a generation job
//! - `GET /api/budget` - Derived daily/monthly budget status
//! - `GET /api/costs` - Spend report: breakdowns, trend, projection
//! - `GET /api/costs/events` - Most recent cost events
//! - `GET /api/health` - Health check

mod routes;
pub mod types;

pub use routes::{router, serve, AppState};
pub use types::*;
