//! In-process clearing node.
//!
//! Speaks the same envelopes as the real node over a [`TransportLink`]:
//! verifies the wallet's policy signature during the handshake, requires a
//! session-key signature on every later request, keeps a unified ledger per
//! wallet, issues node-signed channel states and pushes `cu`/`bu`
//! notifications after channel and ledger changes.
//!
//! Test hooks inject faults: refused handshakes or tokens, silent methods,
//! refused connections and node-side connection drops.

use async_trait::async_trait;
use parking_lot::Mutex;
use primitive_types::U256;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::domain::{
    keccak256, recover_hex, Address, Allocation, ChainContracts, ChainId, ChannelId,
    ChannelParams, ChannelState, NetworkConfig, OrchestratorError, StateIntent,
};
use crate::ports::{NodeTransport, TransportEvent, TransportLink, TypedData};
use crate::protocol::{
    AuthChallenge, AuthRequestParams, AuthVerifyParams, AuthVerifyResult, ChannelInfo,
    ChannelList, ChannelStateResult, CloseChannelParams, ConfigResult, CreateChannelParams,
    CreateChannelResult, GetChannelsParams, LedgerBalance, LedgerBalances, LedgerBalancesParams,
    Method, NetworkInfo, NodeChannelStatus, RequestEnvelope, ResizeChannelParams,
    ResponseEnvelope, TransferNotification, TransferParams, TransferResult,
};

const LINK_CAPACITY: usize = 128;
const CHALLENGE_PERIOD_SECS: u64 = 3600;

/// Node-side channel record.
#[derive(Debug, Clone)]
struct NodeChannel {
    participant: Address,
    chain_id: ChainId,
    token: Address,
    amount: U256,
    status: NodeChannelStatus,
    version: u64,
    final_state: Option<ChannelState>,
}

impl NodeChannel {
    fn info(&self, id: ChannelId) -> ChannelInfo {
        ChannelInfo {
            channel_id: id,
            participant: self.participant,
            chain_id: self.chain_id,
            token: self.token,
            amount: self.amount,
            status: self.status,
            version: self.version,
        }
    }
}

struct LinkHandle {
    inbound: mpsc::Sender<TransportEvent>,
    kill: watch::Sender<bool>,
}

#[derive(Default)]
struct NodeState {
    challenges: HashMap<String, AuthRequestParams>,
    sessions: HashMap<Address, Address>,
    tokens: HashMap<String, Address>,
    balances: HashMap<Address, U256>,
    channels: BTreeMap<ChannelId, NodeChannel>,
    transfers: Vec<TransferParams>,
    received: Vec<Method>,
    silent: HashSet<Method>,
    reject_auth: bool,
    refuse_tokens: bool,
    mute_channel_updates: bool,
    fail_connects: u32,
    connects: u32,
    nonce: u64,
    links: Vec<LinkHandle>,
}

struct NodeInner {
    network: NetworkConfig,
    asset: String,
    state: Mutex<NodeState>,
}

type Handled = Result<(Value, Vec<(Method, Value)>), String>;

/// In-process clearing node implementing [`NodeTransport`].
#[derive(Clone)]
pub struct LoopbackNode {
    inner: Arc<NodeInner>,
}

impl LoopbackNode {
    /// Node serving `network` with a ledger in `asset`.
    pub fn new(network: NetworkConfig, asset: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(NodeInner {
                network,
                asset: asset.into(),
                state: Mutex::new(NodeState::default()),
            }),
        }
    }

    /// Node on chain 137 with fixed custody, adjudicator and broker
    /// addresses and a `usdc` ledger.
    pub fn standard() -> Self {
        Self::new(
            NetworkConfig {
                broker: Address([0xbb; 20]),
                chains: vec![ChainContracts {
                    chain_id: ChainId(137),
                    custody: Address([0xc1; 20]),
                    adjudicator: Address([0xad; 20]),
                }],
            },
            "usdc",
        )
    }

    /// Network configuration served by `get_config`.
    pub fn network(&self) -> &NetworkConfig {
        &self.inner.network
    }

    /// Methods received so far, in order.
    pub fn received_methods(&self) -> Vec<Method> {
        self.inner.state.lock().received.clone()
    }

    /// How many times a method was received.
    pub fn count(&self, method: Method) -> usize {
        self.inner
            .state
            .lock()
            .received
            .iter()
            .filter(|m| **m == method)
            .count()
    }

    /// Transfers accepted so far.
    pub fn transfers(&self) -> Vec<TransferParams> {
        self.inner.state.lock().transfers.clone()
    }

    /// Connection attempts seen, including refused ones.
    pub fn connects(&self) -> u32 {
        self.inner.state.lock().connects
    }

    /// Refuse wallet signatures during `auth_verify`.
    pub fn reject_auth(&self, reject: bool) {
        self.inner.state.lock().reject_auth = reject;
    }

    /// Refuse previously issued tokens during `auth_verify`.
    pub fn refuse_tokens(&self, refuse: bool) {
        self.inner.state.lock().refuse_tokens = refuse;
    }

    /// Never answer `method`.
    pub fn silence(&self, method: Method) {
        self.inner.state.lock().silent.insert(method);
    }

    /// Answer `method` again.
    pub fn unsilence(&self, method: Method) {
        self.inner.state.lock().silent.remove(&method);
    }

    /// Stop sending channel update notifications.
    pub fn mute_channel_updates(&self, mute: bool) {
        self.inner.state.lock().mute_channel_updates = mute;
    }

    /// Refuse the next `n` connection attempts.
    pub fn fail_next_connects(&self, n: u32) {
        self.inner.state.lock().fail_connects = n;
    }

    /// Close every open connection from the node side.
    pub fn drop_connection(&self) {
        let links = std::mem::take(&mut self.inner.state.lock().links);
        for link in links {
            let _ = link
                .inbound
                .try_send(TransportEvent::Closed("connection reset by node".into()));
            let _ = link.kill.send(true);
        }
    }

    /// Unified balance of `wallet`.
    pub fn unified_balance(&self, wallet: &Address) -> U256 {
        self.inner
            .state
            .lock()
            .balances
            .get(wallet)
            .copied()
            .unwrap_or_default()
    }

    /// Set the unified balance of `wallet` and push a balance update.
    pub fn set_unified_balance(&self, wallet: Address, amount: U256) {
        let payload = {
            let mut state = self.inner.state.lock();
            state.balances.insert(wallet, amount);
            self.inner.balances_payload(&state, &wallet)
        };
        self.broadcast(Method::BalanceUpdate, payload);
    }

    /// Register an open channel left over from an earlier run.
    pub fn add_channel(&self, wallet: Address, chain_id: ChainId, token: Address, amount: U256) -> ChannelId {
        let mut state = self.inner.state.lock();
        let id = NodeInner::next_channel_id(&mut state, wallet);
        state.channels.insert(
            id,
            NodeChannel {
                participant: wallet,
                chain_id,
                token,
                amount,
                status: NodeChannelStatus::Open,
                version: 1,
                final_state: None,
            },
        );
        id
    }

    /// Node-side status of a channel.
    pub fn channel_status(&self, id: &ChannelId) -> Option<NodeChannelStatus> {
        self.inner.state.lock().channels.get(id).map(|c| c.status)
    }

    /// Credit `to` from an external sender and push the transfer.
    pub fn push_transfer(&self, from: Address, to: Address, amount: U256) {
        let (transfer, balances) = {
            let mut state = self.inner.state.lock();
            let balance = state.balances.entry(to).or_default();
            *balance = balance.saturating_add(amount);
            let transfer = TransferNotification {
                from,
                to,
                asset: self.inner.asset.clone(),
                amount,
            };
            (to_value(&transfer), self.inner.balances_payload(&state, &to))
        };
        self.broadcast(Method::TransferNotification, transfer);
        self.broadcast(Method::BalanceUpdate, balances);
    }

    fn broadcast(&self, method: Method, payload: Value) {
        let Ok(frame) = ResponseEnvelope::notification(method, payload).to_frame() else {
            return;
        };
        let mut state = self.inner.state.lock();
        state.links.retain(|l| !l.inbound.is_closed());
        for link in &state.links {
            let _ = link.inbound.try_send(TransportEvent::Frame(frame.clone()));
        }
    }
}

#[async_trait]
impl NodeTransport for LoopbackNode {
    async fn connect(&self, url: &str) -> Result<TransportLink, OrchestratorError> {
        let (outbound_tx, mut outbound_rx) = mpsc::channel::<String>(LINK_CAPACITY);
        let (inbound_tx, inbound_rx) = mpsc::channel::<TransportEvent>(LINK_CAPACITY);
        let (kill_tx, mut kill_rx) = watch::channel(false);
        {
            let mut state = self.inner.state.lock();
            state.connects += 1;
            if state.fail_connects > 0 {
                state.fail_connects -= 1;
                return Err(OrchestratorError::Connection(format!("{url} refused the connection")));
            }
            state.links.retain(|l| !l.inbound.is_closed());
            state.links.push(LinkHandle {
                inbound: inbound_tx.clone(),
                kill: kill_tx,
            });
        }
        debug!(url, "[cw-loopback] Link opened");

        let inner = self.inner.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = kill_rx.changed() => break,
                    frame = outbound_rx.recv() => match frame {
                        Some(frame) => {
                            for reply in inner.handle(&frame) {
                                if inbound_tx.send(TransportEvent::Frame(reply)).await.is_err() {
                                    return;
                                }
                            }
                        }
                        None => break,
                    },
                }
            }
        });

        Ok(TransportLink {
            outbound: outbound_tx,
            inbound: inbound_rx,
        })
    }
}

impl NodeInner {
    /// Handle one request frame; returns frames to send back, reply first.
    fn handle(&self, frame: &str) -> Vec<String> {
        let envelope: RequestEnvelope = match serde_json::from_str(frame) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!(error = %e, "[cw-loopback] Unparseable request");
                return Vec::new();
            }
        };
        let req = envelope.req;

        let mut state = self.state.lock();
        state.received.push(req.method);
        if state.silent.contains(&req.method) {
            return Vec::new();
        }

        let handled = if req.method.is_handshake() {
            self.route(&mut state, Address::ZERO, req.method, req.params.clone())
        } else {
            match Self::authorize(&state, &envelope.sig, &req.digest().unwrap_or_default()) {
                Ok(wallet) => self.route(&mut state, wallet, req.method, req.params.clone()),
                Err(e) => Err(e),
            }
        };
        let mute = state.mute_channel_updates;
        drop(state);

        let mut frames = Vec::new();
        match handled {
            Ok((result, pushes)) => {
                let reply = ResponseEnvelope::reply(req.id, req.method.response_method(), result);
                frames.extend(reply.to_frame());
                for (method, payload) in pushes {
                    if mute && method == Method::ChannelUpdate {
                        continue;
                    }
                    frames.extend(ResponseEnvelope::notification(method, payload).to_frame());
                }
            }
            Err(error) => {
                debug!(method = %req.method, error = %error, "[cw-loopback] Refused");
                let reply = ResponseEnvelope::reply(req.id, Method::Error, json!({ "error": error }));
                frames.extend(reply.to_frame());
            }
        }
        frames
    }

    fn authorize(state: &NodeState, sig: &[String], digest: &[u8; 32]) -> Result<Address, String> {
        let signature = sig.first().ok_or("missing signature")?;
        let key = recover_hex(digest, signature).map_err(|e| e.to_string())?;
        state
            .sessions
            .get(&key)
            .copied()
            .ok_or_else(|| "unauthorized session key".to_string())
    }

    fn route(&self, state: &mut NodeState, wallet: Address, method: Method, params: Value) -> Handled {
        match method {
            Method::AuthRequest => {
                let request: AuthRequestParams = parse(params)?;
                let challenge = Uuid::new_v4().to_string();
                state.challenges.insert(challenge.clone(), request);
                Ok((
                    to_value(&AuthChallenge {
                        challenge_message: challenge,
                    }),
                    Vec::new(),
                ))
            }
            Method::AuthVerify => self.verify(state, parse(params)?),
            Method::GetConfig => Ok((to_value(&self.config_result()), Vec::new())),
            Method::GetLedgerBalances => {
                let query: LedgerBalancesParams = parse(params)?;
                Ok((self.balances_payload(state, &query.participant), Vec::new()))
            }
            Method::GetChannels => {
                let query: GetChannelsParams = parse(params)?;
                let channels = state
                    .channels
                    .iter()
                    .filter(|(_, c)| c.participant == query.participant)
                    .map(|(id, c)| c.info(*id))
                    .collect();
                Ok((to_value(&ChannelList { channels }), Vec::new()))
            }
            Method::CreateChannel => self.create_channel(state, wallet, parse(params)?),
            Method::ResizeChannel => self.resize_channel(state, wallet, parse(params)?),
            Method::CloseChannel => self.close_channel(state, wallet, parse(params)?),
            Method::Transfer => self.transfer(state, wallet, parse(params)?),
            other => Err(format!("unsupported method {other}")),
        }
    }

    fn verify(&self, state: &mut NodeState, params: AuthVerifyParams) -> Handled {
        let request = state
            .challenges
            .remove(&params.challenge)
            .ok_or("unknown challenge")?;

        if let Some(token) = &params.jwt {
            if state.refuse_tokens {
                return Err("token expired".into());
            }
            if state.tokens.get(token) != Some(&request.address) {
                return Err("invalid token".into());
            }
        } else {
            if state.reject_auth {
                return Err("signature rejected".into());
            }
            let signature = params.signature.as_deref().ok_or("missing signature")?;
            let policy = TypedData::session_policy(
                &request.application,
                &params.challenge,
                &request.scope,
                request.address,
                request.session_key,
                request.expires_at,
                &request.allowances,
            );
            let signer = recover_hex(&policy.digest(), signature).map_err(|e| e.to_string())?;
            if signer != request.address {
                return Err("invalid signature".into());
            }
        }

        let token = format!("jwt-{}", Uuid::new_v4().simple());
        state.tokens.insert(token.clone(), request.address);
        state.sessions.insert(request.session_key, request.address);
        let result = AuthVerifyResult {
            success: true,
            address: request.address,
            session_key: request.session_key,
            jwt_token: Some(token),
        };
        Ok((to_value(&result), Vec::new()))
    }

    fn create_channel(&self, state: &mut NodeState, wallet: Address, params: CreateChannelParams) -> Handled {
        let contracts = self
            .network
            .contracts_for(params.chain_id)
            .ok_or_else(|| format!("unsupported chain {}", params.chain_id))?;
        let nonce = state.nonce + 1;
        let id = Self::next_channel_id(state, wallet);
        let channel = NodeChannel {
            participant: wallet,
            chain_id: params.chain_id,
            token: params.token,
            amount: U256::zero(),
            status: NodeChannelStatus::Open,
            version: 0,
            final_state: None,
        };
        let result = CreateChannelResult {
            channel_id: id,
            channel: ChannelParams {
                participants: vec![wallet, self.network.broker],
                adjudicator: contracts.adjudicator,
                challenge: CHALLENGE_PERIOD_SECS,
                nonce,
            },
            state: self.sign_state(StateIntent::Initialize, &channel, wallet, U256::zero()),
        };
        let push = (Method::ChannelUpdate, to_value(&channel.info(id)));
        state.channels.insert(id, channel);
        Ok((to_value(&result), vec![push]))
    }

    fn resize_channel(&self, state: &mut NodeState, wallet: Address, params: ResizeChannelParams) -> Handled {
        let channel = Self::owned_channel(state, wallet, &params.channel_id)?;
        let mut pushes = Vec::new();
        channel.version += 1;

        let intent = if !params.lock_amount.is_zero() {
            channel.amount = channel.amount.saturating_add(params.lock_amount);
            StateIntent::Resize
        } else {
            channel.amount = channel
                .amount
                .checked_sub(params.release_amount)
                .ok_or("insufficient channel funds")?;
            StateIntent::Allocate
        };
        let snapshot = channel.clone();
        pushes.push((Method::ChannelUpdate, to_value(&snapshot.info(params.channel_id))));

        if intent == StateIntent::Allocate {
            let balance = state.balances.entry(wallet).or_default();
            *balance = balance.saturating_add(params.release_amount);
            pushes.push((Method::BalanceUpdate, self.balances_payload(state, &wallet)));
        }

        let result = ChannelStateResult {
            channel_id: params.channel_id,
            state: self.sign_state(intent, &snapshot, wallet, snapshot.amount),
        };
        Ok((to_value(&result), pushes))
    }

    fn close_channel(&self, state: &mut NodeState, wallet: Address, params: CloseChannelParams) -> Handled {
        // Already finalized here: hand out the same final state so the
        // participant can still settle it on chain.
        if let Some(final_state) = state
            .channels
            .get(&params.channel_id)
            .filter(|c| c.participant == wallet)
            .and_then(|c| c.final_state.clone())
        {
            let result = ChannelStateResult {
                channel_id: params.channel_id,
                state: final_state,
            };
            return Ok((to_value(&result), Vec::new()));
        }

        let ledger = state.balances.get(&wallet).copied().unwrap_or_default();
        let channel = Self::owned_channel(state, wallet, &params.channel_id)?;
        let payout = channel.amount.saturating_add(ledger);
        channel.amount = U256::zero();
        channel.status = NodeChannelStatus::Closed;
        channel.version += 1;
        let snapshot = channel.clone();
        let final_state = self.sign_state(StateIntent::Finalize, &snapshot, params.funds_destination, payout);
        channel.final_state = Some(final_state.clone());
        state.balances.remove(&wallet);

        let result = ChannelStateResult {
            channel_id: params.channel_id,
            state: final_state,
        };
        let pushes = vec![
            (Method::ChannelUpdate, to_value(&snapshot.info(params.channel_id))),
            (Method::BalanceUpdate, self.balances_payload(state, &wallet)),
        ];
        Ok((to_value(&result), pushes))
    }

    fn transfer(&self, state: &mut NodeState, wallet: Address, params: TransferParams) -> Handled {
        let amount = params
            .allocations
            .iter()
            .filter(|a| a.asset.eq_ignore_ascii_case(&self.asset))
            .fold(U256::zero(), |acc, a| acc.saturating_add(a.amount));
        if amount.is_zero() {
            return Err("empty transfer".into());
        }
        let available = state.balances.get(&wallet).copied().unwrap_or_default();
        let rest = available
            .checked_sub(amount)
            .ok_or_else(|| format!("insufficient unified balance: {available} < {amount}"))?;
        state.balances.insert(wallet, rest);
        let credited = state.balances.entry(params.destination).or_default();
        *credited = credited.saturating_add(amount);

        let transaction_id = format!("tx-{}", state.transfers.len() + 1);
        state.transfers.push(params);
        Ok((
            to_value(&TransferResult { transaction_id }),
            vec![(Method::BalanceUpdate, self.balances_payload(state, &wallet))],
        ))
    }

    fn owned_channel<'a>(
        state: &'a mut NodeState,
        wallet: Address,
        id: &ChannelId,
    ) -> Result<&'a mut NodeChannel, String> {
        state
            .channels
            .get_mut(id)
            .filter(|c| c.participant == wallet && c.status != NodeChannelStatus::Closed)
            .ok_or_else(|| format!("unknown channel {}", id.short()))
    }

    fn next_channel_id(state: &mut NodeState, wallet: Address) -> ChannelId {
        state.nonce += 1;
        let mut preimage = wallet.0.to_vec();
        preimage.extend_from_slice(&state.nonce.to_be_bytes());
        ChannelId(keccak256(&preimage))
    }

    fn sign_state(&self, intent: StateIntent, channel: &NodeChannel, to: Address, amount: U256) -> ChannelState {
        let allocations = vec![
            Allocation {
                destination: to,
                token: channel.token,
                amount,
            },
            Allocation {
                destination: self.network.broker,
                token: channel.token,
                amount: U256::zero(),
            },
        ];
        let mut state = ChannelState {
            intent,
            version: channel.version,
            state_data: "0x".into(),
            allocations,
            server_signature: String::new(),
        };
        let digest = keccak256(&serde_json::to_vec(&state).unwrap_or_default());
        state.server_signature = format!("0x{}", hex::encode(digest));
        state
    }

    fn config_result(&self) -> ConfigResult {
        ConfigResult {
            broker_address: self.network.broker,
            networks: self
                .network
                .chains
                .iter()
                .map(|c| NetworkInfo {
                    chain_id: c.chain_id,
                    custody_address: c.custody,
                    adjudicator_address: c.adjudicator,
                })
                .collect(),
        }
    }

    fn balances_payload(&self, state: &NodeState, wallet: &Address) -> Value {
        let amount = state.balances.get(wallet).copied().unwrap_or_default();
        to_value(&LedgerBalances {
            ledger_balances: vec![LedgerBalance {
                asset: self.asset.clone(),
                amount,
            }],
        })
    }
}

fn parse<T: DeserializeOwned>(params: Value) -> Result<T, String> {
    serde_json::from_value(params).map_err(|e| format!("invalid params: {e}"))
}

fn to_value<T: Serialize>(value: &T) -> Value {
    serde_json::to_value(value).unwrap_or(Value::Null)
}
