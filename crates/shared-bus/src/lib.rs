//! # Shared Bus - Orchestrator Event Bus
//!
//! Multi-subscriber publish mechanism for everything the channel
//! orchestrator reports to its embedder.
//!
//! ## Publish / Subscribe
//!
//! ```text
//! ┌──────────────┐                    ┌──────────────┐
//! │ Orchestrator │                    │  UI / Alerts │
//! │              │    publish()       │              │
//! │              │ ──────┐            │              │
//! └──────────────┘       │            └──────────────┘
//!                        ▼                    ↑
//!                  ┌──────────────┐          │
//!                  │  Event Bus   │          │
//!                  │              │ ─────────┘
//!                  └──────────────┘  subscribe()
//! ```
//!
//! Every subscriber gets its own receiver; registering a second handler
//! never replaces the first.

#![allow(clippy::missing_const_for_fn)]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

pub mod events;
pub mod publisher;
pub mod subscriber;

pub use events::{ErrorKind, EventFilter, EventTopic, OrchestratorEvent, ProgressUpdate};
pub use publisher::{EventPublisher, InMemoryEventBus};
pub use subscriber::{EventStream, Subscription, SubscriptionError};

/// Maximum events to buffer per subscriber before the slowest one lags.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 1000;
