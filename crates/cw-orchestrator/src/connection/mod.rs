//! # Connection
//!
//! Transport lifecycle, keep-alive and reconnect supervision.

mod keepalive;
pub mod manager;

pub use manager::{ConnectionManager, ReconnectHandler};
