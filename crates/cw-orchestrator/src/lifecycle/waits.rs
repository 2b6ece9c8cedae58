//! Bounded waits for asynchronous acknowledgements.
//!
//! Each wait races push notifications against a timer inside the calling
//! flow's future; dropping the flow drops the wait. Expiry is reported as
//! [`Acknowledgement::Unconfirmed`], never as an error.

use primitive_types::U256;
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tokio::time::{interval, sleep, MissedTickBehavior};
use tracing::{debug, warn};

use cw_telemetry::metrics::UNCONFIRMED_WAITS;

use crate::domain::{Acknowledgement, Address, ConnectionState};
use crate::protocol::{ChannelInfo, LedgerBalances, LedgerBalancesParams, Method};
use crate::rpc::{PushMessage, RpcCorrelator};

/// Wait up to `timeout` for a channel notification matching `predicate`.
pub async fn wait_for_channel<F>(
    pushes: &mut broadcast::Receiver<PushMessage>,
    label: &'static str,
    timeout: Duration,
    predicate: F,
) -> Acknowledgement
where
    F: Fn(&ChannelInfo) -> bool,
{
    let deadline = sleep(timeout);
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            _ = &mut deadline => break,
            push = pushes.recv() => match push {
                Ok(PushMessage::Channel(info)) if predicate(&info) => {
                    debug!(wait = label, channel = %info.channel_id.short(), "[cw-flow] Acknowledged");
                    return Acknowledgement::Confirmed;
                }
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    debug!(wait = label, skipped, "[cw-flow] Push receiver lagged");
                }
                Err(broadcast::error::RecvError::Closed) => {
                    (&mut deadline).await;
                    break;
                }
            }
        }
    }

    UNCONFIRMED_WAITS.with_label_values(&[label]).inc();
    warn!(wait = label, timeout_secs = timeout.as_secs(), "[cw-flow] No acknowledgement, continuing");
    Acknowledgement::Unconfirmed
}

/// Poll parameters for [`wait_for_unified_balance`].
pub struct BalanceWait<'a> {
    /// Correlator used for polling.
    pub rpc: &'a RpcCorrelator,
    /// Account whose balance is awaited.
    pub wallet: Address,
    /// Ledger asset symbol.
    pub asset: &'a str,
    /// Poll interval.
    pub poll: Duration,
    /// Overall deadline.
    pub timeout: Duration,
}

/// Wait until the unified balance for `asset` is positive.
///
/// Polls on an interval, listens for balance pushes and re-queries as soon
/// as the connection is re-authenticated. Returns the acknowledgement and
/// the last balance seen.
pub async fn wait_for_unified_balance(
    wait: BalanceWait<'_>,
    pushes: &mut broadcast::Receiver<PushMessage>,
    connection: &mut watch::Receiver<ConnectionState>,
) -> (Acknowledgement, U256) {
    let deadline = sleep(wait.timeout);
    tokio::pin!(deadline);
    let mut ticker = interval(wait.poll);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut last = U256::zero();
    let mut pushes_open = true;
    let mut watching = true;

    loop {
        tokio::select! {
            _ = &mut deadline => break,
            _ = ticker.tick() => {
                if let Some(amount) = query_balance(&wait).await {
                    last = amount;
                    if !amount.is_zero() {
                        return (Acknowledgement::Confirmed, amount);
                    }
                }
            }
            changed = connection.changed(), if watching => {
                if changed.is_err() {
                    watching = false;
                } else if *connection.borrow() == ConnectionState::Authenticated {
                    debug!("[cw-flow] Re-authenticated, re-querying balance");
                    ticker.reset_immediately();
                }
            }
            push = pushes.recv(), if pushes_open => match push {
                Ok(PushMessage::Balances(balances)) => {
                    let amount = balances.amount_of(wait.asset);
                    last = amount;
                    if !amount.is_zero() {
                        return (Acknowledgement::Confirmed, amount);
                    }
                }
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => {}
                Err(broadcast::error::RecvError::Closed) => pushes_open = false,
            }
        }
    }

    UNCONFIRMED_WAITS.with_label_values(&["unified_balance"]).inc();
    warn!(
        timeout_secs = wait.timeout.as_secs(),
        "[cw-flow] Unified balance not confirmed, continuing"
    );
    (Acknowledgement::Unconfirmed, last)
}

async fn query_balance(wait: &BalanceWait<'_>) -> Option<U256> {
    let params = LedgerBalancesParams {
        participant: wait.wallet,
    };
    match wait
        .rpc
        .call_with_timeout::<_, LedgerBalances>(Method::GetLedgerBalances, &params, Some(wait.poll))
        .await
    {
        Ok(balances) => Some(balances.amount_of(wait.asset)),
        Err(e) => {
            debug!(error = %e, "[cw-flow] Balance poll failed");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{ChainId, ChannelId};
    use crate::protocol::{LedgerBalance, NodeChannelStatus, ResponseEnvelope};

    fn open_info(id: ChannelId) -> ChannelInfo {
        ChannelInfo {
            channel_id: id,
            participant: Address([1; 20]),
            chain_id: ChainId(137),
            token: Address([2; 20]),
            amount: U256::zero(),
            status: NodeChannelStatus::Open,
            version: 0,
        }
    }

    fn push_frame(method: Method, result: serde_json::Value) -> String {
        ResponseEnvelope::notification(method, result).to_frame().unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_channel_wait_confirms_on_matching_push() {
        let rpc = RpcCorrelator::new(Duration::from_secs(60));
        let mut pushes = rpc.subscribe();
        let id = ChannelId([7; 32]);

        rpc.dispatch(&push_frame(
            Method::ChannelUpdate,
            serde_json::to_value(open_info(ChannelId([8; 32]))).unwrap(),
        ));
        rpc.dispatch(&push_frame(
            Method::ChannelUpdate,
            serde_json::to_value(open_info(id)).unwrap(),
        ));

        let ack = wait_for_channel(&mut pushes, "open", Duration::from_secs(30), |c| {
            c.channel_id == id
        })
        .await;
        assert_eq!(ack, Acknowledgement::Confirmed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_channel_wait_times_out_unconfirmed() {
        let rpc = RpcCorrelator::new(Duration::from_secs(60));
        let mut pushes = rpc.subscribe();
        let started = tokio::time::Instant::now();

        let ack = wait_for_channel(&mut pushes, "open", Duration::from_secs(30), |_| true).await;
        assert_eq!(ack, Acknowledgement::Unconfirmed);
        assert_eq!(started.elapsed(), Duration::from_secs(30));
    }

    #[tokio::test(start_paused = true)]
    async fn test_balance_wait_confirms_on_push() {
        let rpc = RpcCorrelator::new(Duration::from_secs(60));
        let mut pushes = rpc.subscribe();
        let (_state_tx, mut state_rx) = watch::channel(ConnectionState::Authenticated);

        let balances = LedgerBalances {
            ledger_balances: vec![LedgerBalance {
                asset: "usdc".into(),
                amount: U256::from(5),
            }],
        };
        rpc.dispatch(&push_frame(Method::BalanceUpdate, serde_json::to_value(&balances).unwrap()));

        let wait = BalanceWait {
            rpc: &rpc,
            wallet: Address([1; 20]),
            asset: "usdc",
            poll: Duration::from_secs(10),
            timeout: Duration::from_secs(120),
        };
        let (ack, amount) = wait_for_unified_balance(wait, &mut pushes, &mut state_rx).await;
        assert_eq!(ack, Acknowledgement::Confirmed);
        assert_eq!(amount, U256::from(5));
    }

    #[tokio::test(start_paused = true)]
    async fn test_balance_wait_gives_up_after_deadline() {
        let rpc = RpcCorrelator::new(Duration::from_secs(60));
        let mut pushes = rpc.subscribe();
        let (_state_tx, mut state_rx) = watch::channel(ConnectionState::Authenticated);
        let started = tokio::time::Instant::now();

        // No transport: every poll fails immediately
        let wait = BalanceWait {
            rpc: &rpc,
            wallet: Address([1; 20]),
            asset: "usdc",
            poll: Duration::from_secs(10),
            timeout: Duration::from_secs(120),
        };
        let (ack, amount) = wait_for_unified_balance(wait, &mut pushes, &mut state_rx).await;
        assert_eq!(ack, Acknowledgement::Unconfirmed);
        assert!(amount.is_zero());
        assert_eq!(started.elapsed(), Duration::from_secs(120));
    }
}
