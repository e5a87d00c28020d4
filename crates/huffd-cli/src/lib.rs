//! Client side of the huffd WebSocket protocol, plus logging setup for the binary.

pub mod client;
pub mod logging;

pub use client::{ClientError, JobClient};
