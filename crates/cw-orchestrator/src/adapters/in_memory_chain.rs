//! In-memory wallet and chain.
//!
//! Implements [`WalletSigner`] and [`ChainReader`] for one wallet against a
//! simulated ledger of token balances, allowances, custody balances and
//! channels. Transactions are mined instantly. Calls are recorded in order
//! and individual call kinds can be made to fail, either as a wallet
//! rejection or as an on-chain revert.

use async_trait::async_trait;
use parking_lot::Mutex;
use primitive_types::U256;
use std::collections::{BTreeMap, HashMap, HashSet};
use tracing::debug;

use crate::domain::{
    keccak256, Address, CallKind, ChainId, ChannelId, OrchestratorError, SessionKey, TxHash,
};
use crate::ports::{ChainReader, ContractCall, Receipt, SignerError, TypedData, WalletSigner};

/// Channel as recorded by the custody contract.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OnChainChannel {
    /// Chain.
    pub chain_id: ChainId,
    /// Token.
    pub token: Address,
    /// Wallet funds held by the channel.
    pub locked: U256,
    /// Whether the channel is still open.
    pub open: bool,
}

#[derive(Default)]
struct ChainState {
    balances: HashMap<(ChainId, Address), U256>,
    allowances: HashMap<(ChainId, Address, Address), U256>,
    custody: HashMap<(ChainId, Address, Address), U256>,
    channels: BTreeMap<ChannelId, OnChainChannel>,
    receipts: HashMap<TxHash, Receipt>,
    calls: Vec<ContractCall>,
    rejected: HashSet<CallKind>,
    reverted: HashSet<CallKind>,
    refuse_signatures: bool,
    block: u64,
}

/// Simulated wallet and chain.
pub struct InMemoryChain {
    key: SessionKey,
    state: Mutex<ChainState>,
}

impl Default for InMemoryChain {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryChain {
    /// Wallet with a fresh random key.
    pub fn new() -> Self {
        Self::with_key(SessionKey::generate())
    }

    /// Wallet controlled by `key`.
    pub fn with_key(key: SessionKey) -> Self {
        Self {
            key,
            state: Mutex::new(ChainState::default()),
        }
    }

    /// Wallet address.
    pub fn wallet(&self) -> Address {
        self.key.address()
    }

    /// Credit the wallet with `amount` of `token`.
    pub fn fund(&self, chain_id: ChainId, token: Address, amount: U256) {
        let mut state = self.state.lock();
        let balance = state.balances.entry((chain_id, token)).or_default();
        *balance = balance.saturating_add(amount);
    }

    /// Set the wallet's allowance for `spender`.
    pub fn set_allowance(&self, chain_id: ChainId, token: Address, spender: Address, amount: U256) {
        self.state
            .lock()
            .allowances
            .insert((chain_id, token, spender), amount);
    }

    /// Set the wallet's custody balance.
    pub fn set_custody(&self, chain_id: ChainId, custody: Address, token: Address, amount: U256) {
        self.state
            .lock()
            .custody
            .insert((chain_id, custody, token), amount);
    }

    /// Wallet token balance.
    pub fn wallet_balance(&self, chain_id: ChainId, token: Address) -> U256 {
        self.state
            .lock()
            .balances
            .get(&(chain_id, token))
            .copied()
            .unwrap_or_default()
    }

    /// Wallet custody balance.
    pub fn custody_of(&self, chain_id: ChainId, custody: Address, token: Address) -> U256 {
        self.state
            .lock()
            .custody
            .get(&(chain_id, custody, token))
            .copied()
            .unwrap_or_default()
    }

    /// Channel record.
    pub fn channel(&self, id: &ChannelId) -> Option<OnChainChannel> {
        self.state.lock().channels.get(id).cloned()
    }

    /// Every call submitted, in order.
    pub fn calls(&self) -> Vec<ContractCall> {
        self.state.lock().calls.clone()
    }

    /// Kinds of every call submitted, in order.
    pub fn call_kinds(&self) -> Vec<CallKind> {
        self.state.lock().calls.iter().map(ContractCall::kind).collect()
    }

    /// Make the wallet refuse to sign calls of `kind`.
    pub fn reject(&self, kind: CallKind) {
        self.state.lock().rejected.insert(kind);
    }

    /// Make calls of `kind` revert on chain.
    pub fn revert(&self, kind: CallKind) {
        self.state.lock().reverted.insert(kind);
    }

    /// Clear injected failures.
    pub fn heal(&self) {
        let mut state = self.state.lock();
        state.rejected.clear();
        state.reverted.clear();
        state.refuse_signatures = false;
    }

    /// Make the wallet refuse typed-data signature requests.
    pub fn refuse_signatures(&self) {
        self.state.lock().refuse_signatures = true;
    }
}

impl ChainState {
    fn debit(slot: &mut U256, amount: U256) -> bool {
        match slot.checked_sub(amount) {
            Some(rest) => {
                *slot = rest;
                true
            }
            None => false,
        }
    }

    /// Apply `call`; false means revert.
    fn apply(&mut self, wallet: Address, call: &ContractCall) -> bool {
        match call {
            ContractCall::Approve {
                chain_id,
                token,
                spender,
                amount,
            } => {
                self.allowances.insert((*chain_id, *token, *spender), *amount);
                true
            }
            ContractCall::Deposit {
                chain_id,
                custody,
                account,
                token,
                amount,
            } => {
                let allowance = self
                    .allowances
                    .entry((*chain_id, *token, *custody))
                    .or_default();
                if *allowance < *amount {
                    return false;
                }
                let balance = self.balances.entry((*chain_id, *token)).or_default();
                if !Self::debit(balance, *amount) {
                    return false;
                }
                Self::debit(allowance, *amount);
                if *account == wallet {
                    let held = self.custody.entry((*chain_id, *custody, *token)).or_default();
                    *held = held.saturating_add(*amount);
                }
                true
            }
            ContractCall::CreateChannel {
                chain_id,
                channel_id,
                channel,
                initial_state,
                ..
            } => {
                if self.channels.contains_key(channel_id) || !channel.participants.contains(&wallet) {
                    return false;
                }
                let token = initial_state
                    .allocations
                    .first()
                    .map(|a| a.token)
                    .unwrap_or_default();
                self.channels.insert(
                    *channel_id,
                    OnChainChannel {
                        chain_id: *chain_id,
                        token,
                        locked: initial_state.allocated_to(&wallet),
                        open: true,
                    },
                );
                true
            }
            ContractCall::Resize {
                custody,
                channel_id,
                candidate,
                ..
            } => {
                let Some(channel) = self.channels.get_mut(channel_id).filter(|c| c.open) else {
                    return false;
                };
                let target = candidate.allocated_to(&wallet);
                if target > channel.locked {
                    let held = self
                        .custody
                        .entry((channel.chain_id, *custody, channel.token))
                        .or_default();
                    if !Self::debit(held, target - channel.locked) {
                        return false;
                    }
                }
                channel.locked = target;
                true
            }
            ContractCall::Allocate {
                channel_id,
                candidate,
                ..
            } => match self.channels.get_mut(channel_id).filter(|c| c.open) {
                Some(channel) => {
                    channel.locked = candidate.allocated_to(&wallet);
                    true
                }
                None => false,
            },
            ContractCall::Close {
                custody,
                channel_id,
                candidate,
                ..
            } => {
                let Some(channel) = self.channels.get_mut(channel_id).filter(|c| c.open) else {
                    return false;
                };
                channel.open = false;
                channel.locked = U256::zero();
                let key = (channel.chain_id, *custody, channel.token);
                let held = self.custody.entry(key).or_default();
                *held = held.saturating_add(candidate.allocated_to(&wallet));
                true
            }
            ContractCall::Withdraw {
                chain_id,
                custody,
                token,
                amount,
            } => {
                let held = self.custody.entry((*chain_id, *custody, *token)).or_default();
                if !Self::debit(held, *amount) {
                    return false;
                }
                let balance = self.balances.entry((*chain_id, *token)).or_default();
                *balance = balance.saturating_add(*amount);
                true
            }
        }
    }
}

#[async_trait]
impl WalletSigner for InMemoryChain {
    fn address(&self) -> Address {
        self.key.address()
    }

    async fn sign_typed_data(&self, data: &TypedData) -> Result<String, SignerError> {
        if self.state.lock().refuse_signatures {
            return Err(SignerError::Rejected("user denied signature".into()));
        }
        let raw = self
            .key
            .sign_digest(&data.digest())
            .map_err(|e| SignerError::Failed(e.to_string()))?;
        Ok(format!("0x{}", hex::encode(raw)))
    }

    async fn submit(&self, call: ContractCall) -> Result<TxHash, SignerError> {
        let kind = call.kind();
        let wallet = self.key.address();
        let mut state = self.state.lock();
        if state.rejected.contains(&kind) {
            return Err(SignerError::Rejected(format!("user denied {kind}")));
        }

        state.block += 1;
        let block_number = state.block;
        let mut preimage = wallet.0.to_vec();
        preimage.extend_from_slice(&block_number.to_be_bytes());
        let tx_hash = TxHash(keccak256(&preimage));

        let success = !state.reverted.contains(&kind) && state.apply(wallet, &call);
        debug!(call = %kind, tx = %tx_hash.short(), success, "[cw-chain] Simulated transaction");
        state.calls.push(call);
        state.receipts.insert(
            tx_hash,
            Receipt {
                tx_hash,
                success,
                block_number,
            },
        );
        Ok(tx_hash)
    }
}

#[async_trait]
impl ChainReader for InMemoryChain {
    async fn allowance(
        &self,
        chain_id: ChainId,
        token: Address,
        owner: Address,
        spender: Address,
    ) -> Result<U256, OrchestratorError> {
        if owner != self.key.address() {
            return Ok(U256::zero());
        }
        Ok(self
            .state
            .lock()
            .allowances
            .get(&(chain_id, token, spender))
            .copied()
            .unwrap_or_default())
    }

    async fn custody_balance(
        &self,
        chain_id: ChainId,
        custody: Address,
        account: Address,
        token: Address,
    ) -> Result<U256, OrchestratorError> {
        if account != self.key.address() {
            return Ok(U256::zero());
        }
        Ok(self.custody_of(chain_id, custody, token))
    }

    async fn wait_for_receipt(
        &self,
        _chain_id: ChainId,
        tx_hash: TxHash,
    ) -> Result<Receipt, OrchestratorError> {
        self.state
            .lock()
            .receipts
            .get(&tx_hash)
            .copied()
            .ok_or_else(|| OrchestratorError::Protocol(format!("unknown transaction {tx_hash}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::recover_hex;

    const CHAIN: ChainId = ChainId(137);
    const TOKEN: Address = Address([0x70; 20]);
    const CUSTODY: Address = Address([0xc1; 20]);

    #[tokio::test]
    async fn test_deposit_needs_allowance() {
        let chain = InMemoryChain::new();
        chain.fund(CHAIN, TOKEN, U256::from(100u64));
        let deposit = ContractCall::Deposit {
            chain_id: CHAIN,
            custody: CUSTODY,
            account: chain.wallet(),
            token: TOKEN,
            amount: U256::from(40u64),
        };

        let tx = chain.submit(deposit.clone()).await.unwrap();
        assert!(!chain.wait_for_receipt(CHAIN, tx).await.unwrap().success);

        chain.set_allowance(CHAIN, TOKEN, CUSTODY, U256::from(40u64));
        let tx = chain.submit(deposit).await.unwrap();
        assert!(chain.wait_for_receipt(CHAIN, tx).await.unwrap().success);
        assert_eq!(chain.custody_of(CHAIN, CUSTODY, TOKEN), U256::from(40u64));
        assert_eq!(chain.wallet_balance(CHAIN, TOKEN), U256::from(60u64));
    }

    #[tokio::test]
    async fn test_withdraw_returns_custody_to_wallet() {
        let chain = InMemoryChain::new();
        chain.set_custody(CHAIN, CUSTODY, TOKEN, U256::from(3u64));
        let tx = chain
            .submit(ContractCall::Withdraw {
                chain_id: CHAIN,
                custody: CUSTODY,
                token: TOKEN,
                amount: U256::from(3u64),
            })
            .await
            .unwrap();
        assert!(chain.wait_for_receipt(CHAIN, tx).await.unwrap().success);
        assert_eq!(chain.wallet_balance(CHAIN, TOKEN), U256::from(3u64));
        assert_eq!(chain.call_kinds(), vec![CallKind::Withdraw]);
    }

    #[tokio::test]
    async fn test_injected_failures() {
        let chain = InMemoryChain::new();
        chain.reject(CallKind::Approve);
        let approve = ContractCall::Approve {
            chain_id: CHAIN,
            token: TOKEN,
            spender: CUSTODY,
            amount: U256::one(),
        };
        assert!(matches!(
            chain.submit(approve.clone()).await,
            Err(SignerError::Rejected(_))
        ));
        assert!(chain.calls().is_empty());

        chain.heal();
        chain.revert(CallKind::Approve);
        let tx = chain.submit(approve).await.unwrap();
        assert!(!chain.wait_for_receipt(CHAIN, tx).await.unwrap().success);
    }

    #[tokio::test]
    async fn test_typed_data_signature_recovers_wallet() {
        let chain = InMemoryChain::new();
        let data = TypedData::session_policy("app", "challenge", "tips", chain.wallet(), Address::ZERO, 1, &[]);
        let signature = chain.sign_typed_data(&data).await.unwrap();
        assert_eq!(recover_hex(&data.digest(), &signature).unwrap(), chain.wallet());

        chain.refuse_signatures();
        assert!(matches!(
            chain.sign_typed_data(&data).await,
            Err(SignerError::Rejected(_))
        ));
    }
}
