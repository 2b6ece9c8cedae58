//! RPC correlator.
//!
//! Multiplexes request/response pairs over the single node connection and
//! routes unsolicited notifications to push subscribers.
//!
//! ```text
//!  send_rpc ──register──→ PendingRequestStore ←──resolve── dispatch(frame)
//!     │                                                       │
//!     └──frame──→ outbound sender          notifications ──→ broadcast
//! ```

use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::time::Instant;
use tracing::{debug, warn};

use cw_telemetry::metrics::{RPC_LATENCY, RPC_REQUESTS};

use super::pending::{PendingGuard, PendingRequestStore, PendingSnapshot};
use crate::domain::{OrchestratorError, SessionKey};
use crate::protocol::{
    AssetList, ChannelInfo, ErrorResult, LedgerBalances, Method, RequestEnvelope,
    ResponseEnvelope, RpcRequest, TransferNotification,
};

/// Buffered notifications per push subscriber.
const PUSH_CAPACITY: usize = 256;

/// Unsolicited message from the node.
#[derive(Debug, Clone, PartialEq)]
pub enum PushMessage {
    /// Unified ledger balances changed.
    Balances(LedgerBalances),
    /// A channel changed status or allocation.
    Channel(ChannelInfo),
    /// Asset list.
    Assets(AssetList),
    /// Incoming transfer.
    Transfer(TransferNotification),
    /// Error not attributable to any outstanding request.
    Error(String),
}

/// Request/response correlator.
pub struct RpcCorrelator {
    pending: PendingRequestStore,
    outbound: RwLock<Option<mpsc::Sender<String>>>,
    session_key: RwLock<Option<SessionKey>>,
    pushes: broadcast::Sender<PushMessage>,
    default_timeout: Duration,
}

impl RpcCorrelator {
    /// Create a detached correlator.
    pub fn new(default_timeout: Duration) -> Self {
        let (pushes, _) = broadcast::channel(PUSH_CAPACITY);
        Self {
            pending: PendingRequestStore::new(),
            outbound: RwLock::new(None),
            session_key: RwLock::new(None),
            pushes,
            default_timeout,
        }
    }

    /// Start sending frames on `sender`.
    pub fn attach(&self, sender: mpsc::Sender<String>) {
        *self.outbound.write() = Some(sender);
    }

    /// Stop sending and fail every in-flight request. Dropping the sender
    /// closes the transport.
    pub fn detach(&self, reason: &str) -> usize {
        self.outbound.write().take();
        let failed = self.pending.fail_all(reason);
        if failed > 0 {
            warn!(failed, reason, "[cw-rpc] Failed in-flight requests on disconnect");
        }
        failed
    }

    /// Whether a transport is attached.
    pub fn is_attached(&self) -> bool {
        self.outbound
            .read()
            .as_ref()
            .map(|s| !s.is_closed())
            .unwrap_or(false)
    }

    /// Key used to sign requests after authentication; `None` sends unsigned.
    pub fn set_session_key(&self, key: Option<SessionKey>) {
        *self.session_key.write() = key;
    }

    /// Subscribe to notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<PushMessage> {
        self.pushes.subscribe()
    }

    /// Request statistics.
    pub fn stats(&self) -> PendingSnapshot {
        self.pending.snapshot()
    }

    /// Send `method` and await its response.
    ///
    /// The pending entry is removed on every exit path: response, timeout,
    /// disconnect or the caller's future being dropped.
    pub async fn send_rpc(
        &self,
        method: Method,
        params: Value,
        timeout: Option<Duration>,
    ) -> Result<Value, OrchestratorError> {
        let sender = self
            .outbound
            .read()
            .clone()
            .ok_or_else(|| OrchestratorError::Connection("not connected".into()))?;

        let (id, rx) = self.pending.register(method, method.response_method());
        let _guard = PendingGuard::new(&self.pending, id);

        let key = if method.is_handshake() {
            None
        } else {
            self.session_key.read().clone()
        };
        let frame = RequestEnvelope::signed(RpcRequest::new(id, method, params), key.as_ref())?
            .to_frame()?;

        let started = Instant::now();
        sender
            .send(frame)
            .await
            .map_err(|_| OrchestratorError::Connection("transport closed".into()))?;

        let timeout = timeout.unwrap_or(self.default_timeout);
        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(outcome)) => {
                RPC_LATENCY.observe(started.elapsed().as_secs_f64());
                let label = if outcome.is_ok() { "ok" } else { "remote_error" };
                RPC_REQUESTS.with_label_values(&[method.as_str(), label]).inc();
                outcome
            }
            Ok(Err(_)) => Err(OrchestratorError::Connection(
                "request dropped before a response arrived".into(),
            )),
            Err(_) => {
                self.pending.expire(&id);
                RPC_REQUESTS.with_label_values(&[method.as_str(), "timeout"]).inc();
                warn!(method = %method, request_id = %id, "[cw-rpc] Request timed out");
                Err(OrchestratorError::RpcTimeout {
                    method: method.to_string(),
                    timeout,
                })
            }
        }
    }

    /// Typed call with the default timeout.
    pub async fn call<P, R>(&self, method: Method, params: &P) -> Result<R, OrchestratorError>
    where
        P: Serialize + Sync,
        R: DeserializeOwned,
    {
        self.call_with_timeout(method, params, None).await
    }

    /// Typed call with an explicit timeout.
    pub async fn call_with_timeout<P, R>(
        &self,
        method: Method,
        params: &P,
        timeout: Option<Duration>,
    ) -> Result<R, OrchestratorError>
    where
        P: Serialize + Sync,
        R: DeserializeOwned,
    {
        let params =
            serde_json::to_value(params).map_err(|e| OrchestratorError::Protocol(e.to_string()))?;
        let result = self.send_rpc(method, params, timeout).await?;
        serde_json::from_value(result)
            .map_err(|e| OrchestratorError::Protocol(format!("{method} result: {e}")))
    }

    /// Classify an inbound frame: resolve its pending request or route it
    /// to push subscribers.
    pub fn dispatch(&self, frame: &str) {
        let envelope = match ResponseEnvelope::from_frame(frame) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!(error = %e, "[cw-rpc] Dropping malformed frame");
                return;
            }
        };
        let res = envelope.res;

        if let Some(id) = res.id {
            if self.pending.is_pending(&id) {
                self.pending.resolve(id, res.method, res.result);
                return;
            }
            if !res.method.is_notification() && res.method != Method::Error {
                debug!(request_id = %id, method = %res.method, "[cw-rpc] Late response dropped");
                return;
            }
        }

        self.route_push(res.method, res.result);
    }

    fn route_push(&self, method: Method, result: Value) {
        let parsed = match method {
            Method::BalanceUpdate => serde_json::from_value(result).map(PushMessage::Balances),
            Method::ChannelUpdate => serde_json::from_value(result).map(PushMessage::Channel),
            Method::Assets => serde_json::from_value(result).map(PushMessage::Assets),
            Method::TransferNotification => {
                serde_json::from_value(result).map(PushMessage::Transfer)
            }
            Method::Error => Ok(PushMessage::Error(
                serde_json::from_value::<ErrorResult>(result.clone())
                    .map(|e| e.error)
                    .unwrap_or_else(|_| result.to_string()),
            )),
            other => {
                debug!(method = %other, "[cw-rpc] Ignoring unsolicited message");
                return;
            }
        };

        match parsed {
            Ok(push) => {
                let _ = self.pushes.send(push);
            }
            Err(e) => warn!(method = %method, error = %e, "[cw-rpc] Malformed notification"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{recover_hex, RequestId};
    use primitive_types::U256;
    use serde_json::json;
    use std::sync::Arc;

    fn attached() -> (Arc<RpcCorrelator>, mpsc::Receiver<String>) {
        let rpc = Arc::new(RpcCorrelator::new(Duration::from_secs(60)));
        let (tx, rx) = mpsc::channel(16);
        rpc.attach(tx);
        (rpc, rx)
    }

    fn request_of(frame: &str) -> RequestEnvelope {
        serde_json::from_str(frame).unwrap()
    }

    fn reply(id: RequestId, method: Method, result: Value) -> String {
        ResponseEnvelope::reply(id, method, result).to_frame().unwrap()
    }

    #[tokio::test]
    async fn test_round_trip() {
        let (rpc, mut wire) = attached();
        let caller = {
            let rpc = rpc.clone();
            tokio::spawn(async move { rpc.send_rpc(Method::GetConfig, json!({}), None).await })
        };

        let sent = request_of(&wire.recv().await.unwrap());
        assert_eq!(sent.req.method, Method::GetConfig);
        rpc.dispatch(&reply(sent.req.id, Method::GetConfig, json!({"networks": []})));

        let result = caller.await.unwrap().unwrap();
        assert_eq!(result, json!({"networks": []}));
        assert_eq!(rpc.stats().outstanding, 0);
    }

    #[tokio::test]
    async fn test_call_stays_pending_until_reply() {
        let (rpc, mut wire) = attached();
        let mut call = tokio_test::task::spawn(rpc.send_rpc(Method::GetChannels, json!({}), None));
        tokio_test::assert_pending!(call.poll());

        let sent = request_of(&wire.try_recv().unwrap());
        rpc.dispatch(&reply(sent.req.id, Method::GetChannels, json!({"channels": []})));
        assert!(call.is_woken());
        let result = tokio_test::assert_ready!(call.poll());
        assert_eq!(result.unwrap(), json!({"channels": []}));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_removes_entry() {
        let (rpc, _wire) = attached();
        let err = rpc
            .send_rpc(Method::GetChannels, json!({}), Some(Duration::from_secs(60)))
            .await
            .unwrap_err();

        assert!(matches!(err, OrchestratorError::RpcTimeout { .. }));
        let stats = rpc.stats();
        assert_eq!(stats.outstanding, 0);
        assert_eq!(stats.timeouts, 1);
    }

    #[tokio::test]
    async fn test_error_is_attributed_by_id() {
        let (rpc, mut wire) = attached();
        let first = {
            let rpc = rpc.clone();
            tokio::spawn(async move { rpc.send_rpc(Method::GetConfig, json!({}), None).await })
        };
        let first_req = request_of(&wire.recv().await.unwrap());
        let second = {
            let rpc = rpc.clone();
            tokio::spawn(async move { rpc.send_rpc(Method::Transfer, json!({}), None).await })
        };
        let second_req = request_of(&wire.recv().await.unwrap());

        rpc.dispatch(&reply(second_req.req.id, Method::Error, json!({"error": "denied"})));
        let err = second.await.unwrap().unwrap_err();
        assert!(matches!(err, OrchestratorError::Remote(ref m) if m == "denied"));

        // The older request was not the one rejected
        assert_eq!(rpc.stats().outstanding, 1);
        rpc.dispatch(&reply(first_req.req.id, Method::GetConfig, json!({})));
        assert!(first.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn test_error_without_id_goes_to_push_handlers() {
        let (rpc, _wire) = attached();
        let mut pushes = rpc.subscribe();
        let frame = ResponseEnvelope::notification(Method::Error, json!({"error": "maintenance"}))
            .to_frame()
            .unwrap();
        rpc.dispatch(&frame);
        assert_eq!(pushes.recv().await.unwrap(), PushMessage::Error("maintenance".into()));
    }

    #[tokio::test]
    async fn test_balance_push_routing() {
        let (rpc, _wire) = attached();
        let mut pushes = rpc.subscribe();
        let frame = ResponseEnvelope::notification(
            Method::BalanceUpdate,
            json!({"ledger_balances": [{"asset": "usdc", "amount": "5"}]}),
        )
        .to_frame()
        .unwrap();
        rpc.dispatch(&frame);

        match pushes.recv().await.unwrap() {
            PushMessage::Balances(b) => assert_eq!(b.amount_of("usdc"), U256::from(5u64)),
            other => panic!("unexpected push {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_detach_fails_in_flight() {
        let (rpc, mut wire) = attached();
        let caller = {
            let rpc = rpc.clone();
            tokio::spawn(async move { rpc.send_rpc(Method::GetConfig, json!({}), None).await })
        };
        let _ = wire.recv().await.unwrap();

        assert_eq!(rpc.detach("closed by peer"), 1);
        let err = caller.await.unwrap().unwrap_err();
        assert!(matches!(err, OrchestratorError::Connection(_)));
        assert!(!rpc.is_attached());
    }

    #[tokio::test]
    async fn test_send_without_transport() {
        let rpc = RpcCorrelator::new(Duration::from_secs(1));
        let err = rpc.send_rpc(Method::GetConfig, json!({}), None).await.unwrap_err();
        assert!(matches!(err, OrchestratorError::Connection(_)));
    }

    #[tokio::test]
    async fn test_requests_signed_after_authentication() {
        let (rpc, mut wire) = attached();
        let key = SessionKey::generate();
        rpc.set_session_key(Some(key.clone()));

        let caller = {
            let rpc = rpc.clone();
            tokio::spawn(async move { rpc.send_rpc(Method::GetLedgerBalances, json!({}), None).await })
        };
        let sent = request_of(&wire.recv().await.unwrap());
        let signer = recover_hex(&sent.req.digest().unwrap(), &sent.sig[0]).unwrap();
        assert_eq!(signer, key.address());

        rpc.dispatch(&reply(sent.req.id, Method::GetLedgerBalances, json!({})));
        caller.await.unwrap().unwrap();

        let handshake = {
            let rpc = rpc.clone();
            tokio::spawn(async move { rpc.send_rpc(Method::AuthRequest, json!({}), None).await })
        };
        let sent = request_of(&wire.recv().await.unwrap());
        assert!(sent.sig.is_empty());
        rpc.dispatch(&reply(sent.req.id, Method::AuthChallenge, json!({})));
        handshake.await.unwrap().unwrap();
    }
}
