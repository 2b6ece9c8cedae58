//! # Integration Scenarios
//!
//! The service runs against [`LoopbackNode`](cw_orchestrator::LoopbackNode)
//! and [`InMemoryChain`](cw_orchestrator::InMemoryChain) on a paused tokio
//! clock, so acknowledgement and reconnect timers elapse instantly.

pub mod fixtures;

mod deposit_flows;
mod resilience;
mod session_flows;
