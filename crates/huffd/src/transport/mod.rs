//! Transport layer for huffd.
//!
//! Currently provides a WebSocket transport via axum. The job flow itself
//! lives in [`crate::service`], so other transports only need to connect a
//! channel and forward its events.

pub mod ws;

pub use ws::{ServerConfig, serve};
