//! The Upstream Client (component A) and its supporting connection pool and
//! SSE scanner.

pub mod client;
pub mod http_pool;
pub mod sse;

pub use client::UpstreamClient;
