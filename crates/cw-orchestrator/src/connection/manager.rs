//! Connection manager.
//!
//! Owns the single transport to the clearing node, the reader and
//! keep-alive tasks of the current link, and a supervisor that reconnects
//! with exponential backoff after an unexpected close.
//!
//! ```text
//!   connect ──→ open link ──→ reader task ──frames──→ RpcCorrelator
//!                    │             │
//!                    │             └──LinkClosed──→ supervisor ──→ backoff
//!                    └──→ keep-alive task                 │          │
//!                                                         └── reopen + re-authenticate
//! ```

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use cw_telemetry::metrics::RECONNECT_ATTEMPTS;
use shared_bus::{ErrorKind, EventPublisher, InMemoryEventBus, OrchestratorEvent};

use super::keepalive::run_keepalive;
use crate::config::ReconnectPolicy;
use crate::domain::{Address, ConnectionState, OrchestratorError};
use crate::ports::{NodeTransport, TransportEvent};
use crate::rpc::RpcCorrelator;

/// Re-establishes the session after the transport was reopened.
#[async_trait]
pub trait ReconnectHandler: Send + Sync {
    /// Re-authenticate and refresh anything tied to the old connection.
    async fn on_reopen(&self) -> Result<(), OrchestratorError>;
}

#[derive(Debug)]
struct LinkClosed {
    generation: u64,
    reason: String,
}

struct Inner {
    transport: Arc<dyn NodeTransport>,
    rpc: Arc<RpcCorrelator>,
    bus: Arc<InMemoryEventBus>,
    policy: ReconnectPolicy,
    keepalive_interval: Duration,
    url: RwLock<String>,
    participant: Arc<RwLock<Option<Address>>>,
    state: watch::Sender<ConnectionState>,
    generation: AtomicU64,
    deliberate: AtomicBool,
    attempts: AtomicU32,
    link_tasks: Mutex<Vec<JoinHandle<()>>>,
    closed_tx: mpsc::UnboundedSender<LinkClosed>,
    handler: RwLock<Option<Arc<dyn ReconnectHandler>>>,
}

/// Single connection to the clearing node.
pub struct ConnectionManager {
    inner: Arc<Inner>,
    closed_rx: Mutex<Option<mpsc::UnboundedReceiver<LinkClosed>>>,
    supervisor: Mutex<Option<JoinHandle<()>>>,
}

impl ConnectionManager {
    /// Create a manager; nothing is opened until [`connect`](Self::connect).
    pub fn new(
        transport: Arc<dyn NodeTransport>,
        rpc: Arc<RpcCorrelator>,
        bus: Arc<InMemoryEventBus>,
        policy: ReconnectPolicy,
        keepalive_interval: Duration,
    ) -> Self {
        let (closed_tx, closed_rx) = mpsc::unbounded_channel();
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            inner: Arc::new(Inner {
                transport,
                rpc,
                bus,
                policy,
                keepalive_interval,
                url: RwLock::new(String::new()),
                participant: Arc::new(RwLock::new(None)),
                state,
                generation: AtomicU64::new(0),
                deliberate: AtomicBool::new(false),
                attempts: AtomicU32::new(0),
                link_tasks: Mutex::new(Vec::new()),
                closed_tx,
                handler: RwLock::new(None),
            }),
            closed_rx: Mutex::new(Some(closed_rx)),
            supervisor: Mutex::new(None),
        }
    }

    /// Install the handler run after every successful reopen.
    pub fn set_reconnect_handler(&self, handler: Arc<dyn ReconnectHandler>) {
        *self.inner.handler.write() = Some(handler);
    }

    /// Current state.
    pub fn state(&self) -> ConnectionState {
        *self.inner.state.borrow()
    }

    /// Watch state changes.
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state.subscribe()
    }

    /// Reconnect attempts made since the last successful open.
    pub fn reconnect_attempts(&self) -> u32 {
        self.inner.attempts.load(Ordering::SeqCst)
    }

    /// Open the transport to `url`.
    pub async fn connect(&self, url: &str) -> Result<(), OrchestratorError> {
        self.inner.deliberate.store(false, Ordering::SeqCst);
        *self.inner.url.write() = url.to_string();
        self.ensure_supervisor();
        self.inner.open(url).await
    }

    /// Record the authenticated wallet; enables keep-alive.
    pub fn mark_authenticated(&self, wallet: Address) {
        *self.inner.participant.write() = Some(wallet);
        self.inner.set_state(ConnectionState::Authenticated);
    }

    /// Close deliberately. No reconnect is scheduled and in-flight requests
    /// fail immediately.
    pub async fn disconnect(&self) {
        self.inner.deliberate.store(true, Ordering::SeqCst);
        let was = self.state();
        self.inner.drop_link("disconnected by client");
        if was != ConnectionState::Disconnected {
            self.inner.bus.publish(OrchestratorEvent::Disconnected {
                reason: "disconnected by client".into(),
                will_retry: false,
            });
            info!("[cw-conn] Disconnected");
        }
    }

    fn ensure_supervisor(&self) {
        let mut supervisor = self.supervisor.lock();
        if supervisor.is_some() {
            return;
        }
        if let Some(mut closed_rx) = self.closed_rx.lock().take() {
            let inner = self.inner.clone();
            *supervisor = Some(tokio::spawn(async move {
                while let Some(closed) = closed_rx.recv().await {
                    if closed.generation != inner.generation.load(Ordering::SeqCst) {
                        debug!(generation = closed.generation, "[cw-conn] Ignoring stale close");
                        continue;
                    }
                    inner.handle_close(closed.reason).await;
                }
            }));
        }
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        if let Some(handle) = self.supervisor.lock().take() {
            handle.abort();
        }
        for handle in self.inner.link_tasks.lock().drain(..) {
            handle.abort();
        }
    }
}

impl Inner {
    fn set_state(&self, state: ConnectionState) {
        let previous = self.state.send_replace(state);
        if previous != state {
            debug!(from = %previous, to = %state, "[cw-conn] State change");
        }
    }

    async fn open(self: &Arc<Self>, url: &str) -> Result<(), OrchestratorError> {
        self.set_state(ConnectionState::Connecting);
        let link = match self.transport.connect(url).await {
            Ok(link) => link,
            Err(e) => {
                self.set_state(ConnectionState::Disconnected);
                return Err(e);
            }
        };

        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        self.rpc.attach(link.outbound);

        let reader = {
            let inner = self.clone();
            let mut inbound = link.inbound;
            tokio::spawn(async move {
                let reason = loop {
                    match inbound.recv().await {
                        Some(TransportEvent::Frame(frame)) => inner.rpc.dispatch(&frame),
                        Some(TransportEvent::Closed(reason)) => break reason,
                        None => break "transport ended".to_string(),
                    }
                };
                if inner.generation.load(Ordering::SeqCst) == generation {
                    inner.rpc.detach(&reason);
                }
                let _ = inner.closed_tx.send(LinkClosed { generation, reason });
            })
        };

        let keepalive = tokio::spawn(run_keepalive(
            self.rpc.clone(),
            self.state.subscribe(),
            self.participant.clone(),
            self.keepalive_interval,
        ));

        for old in self.link_tasks.lock().drain(..) {
            old.abort();
        }
        self.link_tasks.lock().extend([reader, keepalive]);

        self.attempts.store(0, Ordering::SeqCst);
        self.set_state(ConnectionState::Connected);
        self.bus.publish(OrchestratorEvent::Connected {
            url: url.to_string(),
        });
        info!(url, generation, "[cw-conn] Connected");
        Ok(())
    }

    fn drop_link(&self, reason: &str) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        for handle in self.link_tasks.lock().drain(..) {
            handle.abort();
        }
        self.rpc.detach(reason);
        self.set_state(ConnectionState::Disconnected);
    }

    async fn handle_close(self: &Arc<Self>, reason: String) {
        let deliberate = self.deliberate.load(Ordering::SeqCst);
        for handle in self.link_tasks.lock().drain(..) {
            handle.abort();
        }
        self.rpc.detach(&reason);
        self.set_state(ConnectionState::Disconnected);
        self.bus.publish(OrchestratorEvent::Disconnected {
            reason: reason.clone(),
            will_retry: !deliberate,
        });
        warn!(reason = %reason, will_retry = !deliberate, "[cw-conn] Connection closed");

        if !deliberate {
            self.reconnect().await;
        }
    }

    async fn reconnect(self: &Arc<Self>) {
        let url = self.url.read().clone();

        for attempt in 0..self.policy.max_attempts {
            if self.deliberate.load(Ordering::SeqCst) {
                return;
            }
            let delay = self.policy.delay(attempt);
            self.attempts.store(attempt + 1, Ordering::SeqCst);
            RECONNECT_ATTEMPTS.inc();
            self.bus.publish(OrchestratorEvent::Reconnecting {
                attempt: attempt + 1,
                delay_ms: delay.as_millis() as u64,
            });
            info!(
                attempt = attempt + 1,
                max = self.policy.max_attempts,
                delay_ms = delay.as_millis() as u64,
                "[cw-conn] Reconnecting"
            );

            tokio::time::sleep(delay).await;
            if self.deliberate.load(Ordering::SeqCst) {
                return;
            }

            if let Err(e) = self.open(&url).await {
                warn!(attempt = attempt + 1, error = %e, "[cw-conn] Reconnect attempt failed");
                continue;
            }

            let handler = self.handler.read().clone();
            let restored = match &handler {
                Some(handler) => handler.on_reopen().await,
                None => Ok(()),
            };
            match restored {
                Ok(()) => {
                    if handler.is_some() {
                        self.set_state(ConnectionState::Authenticated);
                    }
                    info!(attempt = attempt + 1, "[cw-conn] Session restored");
                    return;
                }
                Err(e) => {
                    warn!(attempt = attempt + 1, error = %e, "[cw-conn] Re-authentication failed");
                    self.drop_link("re-authentication failed");
                }
            }
        }

        let message = format!(
            "Connection lost; gave up after {} reconnect attempts",
            self.policy.max_attempts
        );
        error!("[cw-conn] {}", message);
        self.set_state(ConnectionState::Disconnected);
        self.bus.publish(OrchestratorEvent::Error {
            kind: ErrorKind::Connection,
            message,
        });
    }
}
