//! HTTP layer of the moon data backend.
//!
//! The request pipeline, outermost first: CORS → authentication → rate
//! limit → authorization → handler, with structured logging and panic
//! recovery wrapped around the handlers. Dispatch is driven by the
//! `/{name}:{action}` pattern against the schema registry.

pub mod auth;
pub mod config;
pub mod cors;
pub mod error;
pub mod handlers;
pub mod idempotency;
pub mod middleware;
pub mod rate_limit;
pub mod router;
pub mod server;
pub mod state;

pub use config::Config;
pub use error::{ApiError, ApiResult};
pub use server::{build_router, serve};
pub use state::AppState;
