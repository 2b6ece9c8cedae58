//! # Session Ledger
//!
//! Local accounting for a spending session: budget, spent, remaining and
//! the commission split of every tip. Remote balances are authoritative;
//! this is a cache that gates spends before anything reaches the node.
//!
//! ## Invariants
//!
//! - `spent <= initial_budget` after any sequence of spends
//! - a rejected spend leaves the session unchanged
//! - spends are applied optimistically and never reverted

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use primitive_types::U256;
use serde::Serialize;
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

use crate::config::CommissionConfig;
use crate::domain::amount::decimal;
use crate::domain::{invariant_within_budget, Address, CommissionTier};

/// Basis-point denominator.
const BPS_DENOMINATOR: u64 = 10_000;

/// Why the ledger refused an operation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LedgerRejection {
    /// Zero amount.
    #[error("amount must be positive")]
    ZeroAmount,

    /// No session open.
    #[error("no active session")]
    NoActiveSession,

    /// A session is already open.
    #[error("session {0} is still active")]
    SessionActive(String),

    /// Tip addressed to someone other than the session's streamer.
    #[error("session is for {expected}, not {requested}")]
    StreamerMismatch {
        /// Session streamer.
        expected: Address,
        /// Requested recipient.
        requested: Address,
    },

    /// Spend larger than what is left.
    #[error("amount {amount} exceeds remaining budget {remaining}")]
    ExceedsRemaining {
        /// Requested.
        amount: U256,
        /// Left in the session.
        remaining: U256,
    },
}

/// Session status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SessionStatus {
    /// Accepting spends.
    Active,
    /// Closed; no further spends.
    Closed,
}

/// A recorded tip.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TipRecord {
    /// Tip id.
    pub id: String,
    /// Recipient.
    pub streamer: Address,
    /// Gross amount.
    #[serde(with = "decimal")]
    pub amount: U256,
    /// Commission part.
    #[serde(with = "decimal")]
    pub commission: U256,
    /// Optional note.
    pub message: Option<String>,
    /// Recording time.
    pub timestamp: DateTime<Utc>,
}

impl TipRecord {
    /// Part going to the streamer.
    pub fn streamer_amount(&self) -> U256 {
        self.amount - self.commission
    }
}

/// Spending session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Session {
    /// Session id.
    pub id: String,
    /// Recipient of the session's tips.
    pub streamer: Address,
    /// Budget at open.
    #[serde(with = "decimal")]
    pub initial_budget: U256,
    /// Total spent.
    #[serde(with = "decimal")]
    pub spent: U256,
    /// Budget left.
    #[serde(with = "decimal")]
    pub remaining: U256,
    /// Commission tier.
    pub tier: CommissionTier,
    /// Commission rate (basis points).
    pub commission_bps: u32,
    /// Status.
    pub status: SessionStatus,
    /// Open time.
    pub opened_at: DateTime<Utc>,
    /// Tips in order.
    pub tips: Vec<TipRecord>,
}

/// Result of a successful tip.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TipReceipt {
    /// Tip id.
    pub tip_id: String,
    /// Recipient.
    pub streamer: Address,
    /// Gross amount.
    #[serde(with = "decimal")]
    pub amount: U256,
    /// Commission part.
    #[serde(with = "decimal")]
    pub commission: U256,
    /// Session budget left.
    #[serde(with = "decimal")]
    pub remaining: U256,
    /// Node transfer id, once the node accepted it.
    pub transfer_id: Option<String>,
}

/// Closing summary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionSummary {
    /// Session id.
    pub session_id: String,
    /// Session length.
    pub duration: Duration,
    /// Deposited through the channel flows.
    #[serde(with = "decimal")]
    pub total_deposited: U256,
    /// Spent in tips.
    #[serde(with = "decimal")]
    pub total_spent: U256,
    /// Commission recorded.
    #[serde(with = "decimal")]
    pub total_commission: U256,
    /// Budget not spent.
    #[serde(with = "decimal")]
    pub unused_balance: U256,
    /// Tips recorded.
    pub tip_count: usize,
}

/// Outcome of a spending-limit check. Never mutates the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SpendingCheck {
    /// Neither the limit nor the budget would be exceeded.
    pub allowed: bool,
    /// `spent + amount` exceeds the caller's limit.
    pub exceeds_limit: bool,
    /// `spent + amount` exceeds the session budget (always true without a session).
    pub exceeds_budget: bool,
    /// `spent + amount`, saturating.
    #[serde(with = "decimal")]
    pub projected_spent: U256,
    /// Budget left now.
    #[serde(with = "decimal")]
    pub remaining: U256,
}

#[derive(Default)]
struct LedgerState {
    session: Option<Session>,
    deposited: U256,
}

/// Session ledger.
pub struct SessionLedger {
    commission: CommissionConfig,
    state: Mutex<LedgerState>,
}

impl SessionLedger {
    /// Empty ledger.
    pub fn new(commission: CommissionConfig) -> Self {
        Self {
            commission,
            state: Mutex::new(LedgerState::default()),
        }
    }

    /// Add to the deposited total reported at close.
    pub fn record_deposit(&self, amount: U256) {
        let mut state = self.state.lock();
        state.deposited = state.deposited.saturating_add(amount);
    }

    /// Deposited total.
    pub fn total_deposited(&self) -> U256 {
        self.state.lock().deposited
    }

    /// Open a session for `streamer`.
    pub fn open(
        &self,
        streamer: Address,
        budget: U256,
        is_partner: bool,
    ) -> Result<Session, LedgerRejection> {
        if budget.is_zero() {
            return Err(LedgerRejection::ZeroAmount);
        }
        let mut state = self.state.lock();
        if let Some(active) = state.session.as_ref().filter(|s| s.status == SessionStatus::Active) {
            return Err(LedgerRejection::SessionActive(active.id.clone()));
        }

        let tier = if is_partner {
            CommissionTier::Partner
        } else {
            CommissionTier::Standard
        };
        let session = Session {
            id: Uuid::new_v4().to_string(),
            streamer,
            initial_budget: budget,
            spent: U256::zero(),
            remaining: budget,
            tier,
            commission_bps: self.commission.bps(tier),
            status: SessionStatus::Active,
            opened_at: Utc::now(),
            tips: Vec::new(),
        };
        state.session = Some(session.clone());
        Ok(session)
    }

    /// Active session.
    pub fn active(&self) -> Option<Session> {
        self.state
            .lock()
            .session
            .clone()
            .filter(|s| s.status == SessionStatus::Active)
    }

    /// Validate a spend without applying it.
    pub fn preview(&self, streamer: Address, amount: U256) -> Result<(), LedgerRejection> {
        let state = self.state.lock();
        validate(state.session.as_ref(), streamer, amount).map(|_| ())
    }

    /// Apply a spend. Rejections leave the session unchanged.
    pub fn record_spend(
        &self,
        streamer: Address,
        amount: U256,
        message: Option<String>,
    ) -> Result<TipReceipt, LedgerRejection> {
        let mut state = self.state.lock();
        let session = validate(state.session.as_mut(), streamer, amount)?;

        let commission = commission_of(amount, session.commission_bps);
        session.spent += amount;
        session.remaining -= amount;

        let record = TipRecord {
            id: Uuid::new_v4().to_string(),
            streamer: session.streamer,
            amount,
            commission,
            message,
            timestamp: Utc::now(),
        };
        let receipt = TipReceipt {
            tip_id: record.id.clone(),
            streamer: record.streamer,
            amount,
            commission,
            remaining: session.remaining,
            transfer_id: None,
        };
        session.tips.push(record);
        Ok(receipt)
    }

    /// Close the active session.
    pub fn close(&self) -> Result<SessionSummary, LedgerRejection> {
        let mut state = self.state.lock();
        let deposited = state.deposited;
        let session = state
            .session
            .as_mut()
            .filter(|s| s.status == SessionStatus::Active)
            .ok_or(LedgerRejection::NoActiveSession)?;

        session.status = SessionStatus::Closed;
        let duration = (Utc::now() - session.opened_at)
            .to_std()
            .unwrap_or_default();
        let total_commission = session
            .tips
            .iter()
            .fold(U256::zero(), |acc, tip| acc + tip.commission);

        Ok(SessionSummary {
            session_id: session.id.clone(),
            duration,
            total_deposited: deposited,
            total_spent: session.spent,
            total_commission,
            unused_balance: session.remaining,
            tip_count: session.tips.len(),
        })
    }

    /// Would `amount` push spending past `limit` or the session budget?
    pub fn check_spending_limit(&self, amount: U256, limit: U256) -> SpendingCheck {
        let state = self.state.lock();
        let active = state
            .session
            .as_ref()
            .filter(|s| s.status == SessionStatus::Active);

        let (spent, budget, remaining) = match active {
            Some(s) => (s.spent, s.initial_budget, s.remaining),
            None => (U256::zero(), U256::zero(), U256::zero()),
        };
        let projected_spent = spent.saturating_add(amount);
        let exceeds_limit = projected_spent > limit;
        let exceeds_budget = active.is_none() || !invariant_within_budget(spent, amount, budget);

        SpendingCheck {
            allowed: !exceeds_limit && !exceeds_budget,
            exceeds_limit,
            exceeds_budget,
            projected_spent,
            remaining,
        }
    }
}

fn validate<S>(session: Option<S>, streamer: Address, amount: U256) -> Result<S, LedgerRejection>
where
    S: std::ops::Deref<Target = Session>,
{
    if amount.is_zero() {
        return Err(LedgerRejection::ZeroAmount);
    }
    let session = session
        .filter(|s| s.status == SessionStatus::Active)
        .ok_or(LedgerRejection::NoActiveSession)?;
    if session.streamer != streamer {
        return Err(LedgerRejection::StreamerMismatch {
            expected: session.streamer,
            requested: streamer,
        });
    }
    if amount > session.remaining {
        return Err(LedgerRejection::ExceedsRemaining {
            amount,
            remaining: session.remaining,
        });
    }
    Ok(session)
}

/// `amount * bps / 10_000`, rounded down.
pub fn commission_of(amount: U256, bps: u32) -> U256 {
    let bps = U256::from(bps);
    let denominator = U256::from(BPS_DENOMINATOR);
    match amount.checked_mul(bps) {
        Some(product) => product / denominator,
        None => amount / denominator * bps + (amount % denominator) * bps / denominator,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn ledger() -> SessionLedger {
        SessionLedger::new(CommissionConfig::default())
    }

    const STREAMER: Address = Address([0x5e; 20]);

    #[test]
    fn test_open_sets_commission_tier() {
        let ledger = ledger();
        let session = ledger.open(STREAMER, U256::from(100), true).unwrap();
        assert_eq!(session.commission_bps, 500);
        assert_eq!(session.remaining, U256::from(100));

        ledger.close().unwrap();
        let session = ledger.open(STREAMER, U256::from(100), false).unwrap();
        assert_eq!(session.commission_bps, 1000);
    }

    #[test]
    fn test_second_open_rejected_while_active() {
        let ledger = ledger();
        let first = ledger.open(STREAMER, U256::from(10), false).unwrap();
        assert_eq!(
            ledger.open(STREAMER, U256::from(10), false),
            Err(LedgerRejection::SessionActive(first.id))
        );
    }

    #[test]
    fn test_spend_splits_commission() {
        let ledger = ledger();
        ledger.open(STREAMER, U256::from(1000), false).unwrap();

        let receipt = ledger.record_spend(STREAMER, U256::from(99), Some("gg".into())).unwrap();
        // 10% of 99 rounds down to 9
        assert_eq!(receipt.commission, U256::from(9));
        assert_eq!(receipt.remaining, U256::from(901));

        let session = ledger.active().unwrap();
        assert_eq!(session.tips[0].streamer_amount(), U256::from(90));
        assert_eq!(session.tips[0].message.as_deref(), Some("gg"));
    }

    #[test]
    fn test_rejections_leave_state_unchanged() {
        let ledger = ledger();
        assert_eq!(
            ledger.record_spend(STREAMER, U256::one(), None),
            Err(LedgerRejection::NoActiveSession)
        );

        ledger.open(STREAMER, U256::from(10), false).unwrap();
        ledger.record_spend(STREAMER, U256::from(4), None).unwrap();
        let before = ledger.active().unwrap();

        assert_eq!(
            ledger.record_spend(STREAMER, U256::zero(), None),
            Err(LedgerRejection::ZeroAmount)
        );
        assert_eq!(
            ledger.record_spend(STREAMER, U256::from(7), None),
            Err(LedgerRejection::ExceedsRemaining {
                amount: U256::from(7),
                remaining: U256::from(6),
            })
        );
        assert_eq!(ledger.active().unwrap(), before);
    }

    #[test]
    fn test_tip_to_other_streamer_rejected() {
        let ledger = ledger();
        ledger.open(STREAMER, U256::from(10), false).unwrap();
        let other = Address([0x01; 20]);
        assert_eq!(
            ledger.preview(other, U256::one()),
            Err(LedgerRejection::StreamerMismatch {
                expected: STREAMER,
                requested: other,
            })
        );
        assert!(ledger.preview(STREAMER, U256::one()).is_ok());
    }

    #[test]
    fn test_close_summary() {
        let ledger = ledger();
        ledger.record_deposit(U256::from(50));
        ledger.open(STREAMER, U256::from(40), true).unwrap();
        ledger.record_spend(STREAMER, U256::from(30), None).unwrap();

        let summary = ledger.close().unwrap();
        assert_eq!(summary.total_deposited, U256::from(50));
        assert_eq!(summary.total_spent, U256::from(30));
        assert_eq!(summary.unused_balance, U256::from(10));
        assert_eq!(summary.total_commission, U256::from(1));
        assert_eq!(summary.tip_count, 1);

        assert!(ledger.active().is_none());
        assert_eq!(ledger.close(), Err(LedgerRejection::NoActiveSession));
    }

    #[test]
    fn test_check_spending_limit_is_read_only() {
        let ledger = ledger();
        ledger.open(STREAMER, U256::from(100), false).unwrap();
        ledger.record_spend(STREAMER, U256::from(60), None).unwrap();

        let check = ledger.check_spending_limit(U256::from(30), U256::from(80));
        assert!(check.exceeds_limit);
        assert!(!check.exceeds_budget);
        assert!(!check.allowed);
        assert_eq!(check.projected_spent, U256::from(90));

        let check = ledger.check_spending_limit(U256::from(20), U256::from(1000));
        assert!(check.allowed);

        let check = ledger.check_spending_limit(U256::from(41), U256::from(1000));
        assert!(check.exceeds_budget);
        assert_eq!(ledger.active().unwrap().spent, U256::from(60));
    }

    #[test]
    fn test_check_without_session() {
        let check = ledger().check_spending_limit(U256::one(), U256::from(10));
        assert!(check.exceeds_budget);
        assert!(!check.allowed);
    }

    #[test]
    fn test_commission_overflow_path() {
        let amount = U256::MAX;
        let expected = amount / U256::from(10_000u64) * U256::from(500u64)
            + (amount % U256::from(10_000u64)) * U256::from(500u64) / U256::from(10_000u64);
        assert_eq!(commission_of(amount, 500), expected);
        assert!(commission_of(amount, 500) < amount);
    }

    proptest! {
        /// Spent never decreases and never exceeds the budget.
        #[test]
        fn prop_spent_monotonic_and_bounded(
            budget in 1u64..1_000_000,
            spends in prop::collection::vec(0u64..200_000, 0..40),
        ) {
            let ledger = ledger();
            ledger.open(STREAMER, U256::from(budget), false).unwrap();
            let mut last = U256::zero();

            for amount in spends {
                let before = ledger.active().unwrap();
                let outcome = ledger.record_spend(STREAMER, U256::from(amount), None);
                let after = ledger.active().unwrap();

                prop_assert!(after.spent >= last);
                prop_assert!(after.spent <= after.initial_budget);
                prop_assert_eq!(after.spent + after.remaining, after.initial_budget);
                if outcome.is_err() {
                    prop_assert_eq!(&after, &before);
                }
                last = after.spent;
            }
        }

        /// Commission never exceeds the amount and matches the rate.
        #[test]
        fn prop_commission_rounds_down(amount in 0u64..u64::MAX, bps in 0u32..=10_000) {
            let commission = commission_of(U256::from(amount), bps);
            prop_assert!(commission <= U256::from(amount));
            let exact = (amount as u128) * (bps as u128) / 10_000;
            prop_assert_eq!(commission, U256::from(exact));
        }
    }
}
