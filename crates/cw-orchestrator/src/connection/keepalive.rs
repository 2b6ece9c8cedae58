//! Keep-alive loop for an open link.

use parking_lot::RwLock;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::debug;

use cw_telemetry::metrics::KEEPALIVES_SENT;

use crate::domain::{Address, ConnectionState};
use crate::protocol::{LedgerBalances, LedgerBalancesParams, Method};
use crate::rpc::RpcCorrelator;

/// Send a balance query every `period` while authenticated.
///
/// Each query runs on its own task so a slow reply never delays the next
/// tick. The loop ends when the link task is aborted.
pub(crate) async fn run_keepalive(
    rpc: Arc<RpcCorrelator>,
    state: watch::Receiver<ConnectionState>,
    participant: Arc<RwLock<Option<Address>>>,
    period: Duration,
) {
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        ticker.tick().await;

        if *state.borrow() != ConnectionState::Authenticated {
            continue;
        }
        let Some(wallet) = *participant.read() else {
            continue;
        };

        KEEPALIVES_SENT.inc();
        let rpc = rpc.clone();
        tokio::spawn(async move {
            let params = LedgerBalancesParams {
                participant: wallet,
            };
            if let Err(e) = rpc
                .call_with_timeout::<_, LedgerBalances>(Method::GetLedgerBalances, &params, Some(period))
                .await
            {
                debug!(error = %e, "[cw-conn] Keep-alive query failed");
            }
        });
    }
}
