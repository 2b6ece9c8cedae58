//! # Wire Protocol
//!
//! JSON text frames exchanged with the clearing node.

pub mod envelope;
pub mod messages;

pub use envelope::{
    now_ms, Method, RequestEnvelope, ResponseEnvelope, RpcRequest, RpcResponse,
};
pub use messages::*;
