//! The public HTTP surface (§6): axum app assembly plus route handlers.

pub mod app;
pub mod handlers;

pub use app::{build_app, AppState};
