//! Shared setup for the scenario suite.

use primitive_types::U256;
use std::sync::Arc;
use std::time::Duration;

use cw_orchestrator::adapters::{InMemoryChain, InMemoryCredentialStore, LoopbackNode};
use cw_orchestrator::domain::{Address, ChainId};
use cw_orchestrator::{ChannelOrchestratorApi, ChannelService, CredentialStore, OrchestratorConfig};
use shared_bus::{ErrorKind, EventFilter, InMemoryEventBus, OrchestratorEvent, Subscription};

/// Chain served by [`LoopbackNode::standard`].
pub const CHAIN: ChainId = ChainId(137);
/// Custody contract on [`CHAIN`].
pub const CUSTODY: Address = Address([0xc1; 20]);
/// Token deposited in every scenario.
pub const TOKEN: Address = Address([0x70; 20]);
/// Streamer receiving tips.
pub const STREAMER: Address = Address([0x5e; 20]);

/// Service, node and chain wired together.
pub struct World {
    pub service: Arc<ChannelService>,
    pub node: LoopbackNode,
    pub chain: Arc<InMemoryChain>,
    pub store: Arc<InMemoryCredentialStore>,
    pub events: Subscription,
}

/// Testing config with a short reconnect policy.
pub fn config() -> OrchestratorConfig {
    let mut config = OrchestratorConfig::for_testing();
    config.reconnect.base_delay_ms = 100;
    config.reconnect.max_delay_ms = 1_000;
    config.reconnect.max_attempts = 3;
    config
}

/// A service that has not been initialized yet.
pub fn world() -> World {
    world_on(LoopbackNode::standard(), Arc::new(InMemoryChain::new()))
}

/// A fresh service sharing an existing node and chain.
pub fn world_on(node: LoopbackNode, chain: Arc<InMemoryChain>) -> World {
    cw_telemetry::init_test_logging();
    let store = Arc::new(InMemoryCredentialStore::new());
    let bus = Arc::new(InMemoryEventBus::new());
    let events = bus.subscribe(EventFilter::all());
    let service = Arc::new(ChannelService::new(
        config(),
        Arc::new(node.clone()),
        store.clone() as Arc<dyn CredentialStore>,
        bus,
    ));
    World {
        service,
        node,
        chain,
        store,
        events,
    }
}

impl World {
    /// Initialize with the chain's wallet as signer and reader.
    pub async fn initialize(&self) {
        self.service
            .initialize(self.chain.wallet(), self.chain.clone(), self.chain.clone())
            .await
            .expect("initialize");
    }

    /// Fund the wallet and run a full deposit of `amount`.
    pub async fn deposit(&self, amount: u64) {
        self.chain.fund(CHAIN, TOKEN, U256::from(amount));
        self.service
            .deposit_and_open_channel(U256::from(amount), CHAIN, TOKEN)
            .await
            .expect("deposit");
    }

    /// Events published since the last drain.
    pub fn drain(&mut self) -> Vec<OrchestratorEvent> {
        self.events.drain()
    }
}

/// An initialized world.
pub async fn ready() -> World {
    let world = world();
    world.initialize().await;
    world
}

/// Let spawned tasks and timers run.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(50)).await;
}

/// Error kinds in publication order.
pub fn error_kinds(events: &[OrchestratorEvent]) -> Vec<ErrorKind> {
    events
        .iter()
        .filter_map(|e| match e {
            OrchestratorEvent::Error { kind, .. } => Some(*kind),
            _ => None,
        })
        .collect()
}

/// `(step, complete)` of every deposit progress event.
pub fn deposit_steps(events: &[OrchestratorEvent]) -> Vec<(u8, bool)> {
    events
        .iter()
        .filter_map(|e| match e {
            OrchestratorEvent::DepositProgress(p) => Some((p.step, p.complete)),
            _ => None,
        })
        .collect()
}
