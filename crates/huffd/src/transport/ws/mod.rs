//! WebSocket transport: one socket per (session, job) channel.

mod routes;
mod server;

pub use routes::{HealthCheckResponse, WorkerCounts, routes};
pub use server::{ServerConfig, serve, serve_on};
