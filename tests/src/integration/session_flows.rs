//! # Session Scenarios
//!
//! Session budget, tips against the unified ledger, spending checks and
//! the session close that withdraws what is left.

#[cfg(test)]
mod tests {
    use primitive_types::U256;

    use cw_orchestrator::domain::{Address, CallKind, ChannelStatus, FlowKind, FlowStage};
    use cw_orchestrator::ledger::LedgerRejection;
    use cw_orchestrator::protocol::Method;
    use cw_orchestrator::{ChannelOrchestratorApi, OrchestratorError};
    use shared_bus::{ErrorKind, OrchestratorEvent};

    use crate::integration::fixtures::*;

    const DEPOSIT: u64 = 1_000_000;

    async fn funded() -> World {
        let w = ready().await;
        w.deposit(DEPOSIT).await;
        w
    }

    fn units(n: u64) -> U256 {
        U256::from(n)
    }

    // =========================================================================
    // SESSIONS AND TIPS
    // =========================================================================

    #[tokio::test(start_paused = true)]
    async fn test_tip_after_allocation_reaches_streamer() {
        let mut w = funded().await;
        w.service
            .create_session(STREAMER, units(DEPOSIT), false)
            .await
            .unwrap();
        w.drain();

        let receipt = w
            .service
            .send_tip(units(100_000), STREAMER, Some("gg".into()))
            .await
            .unwrap();

        assert_eq!(receipt.commission, units(10_000));
        assert_eq!(receipt.remaining, units(900_000));
        assert_eq!(receipt.transfer_id.as_deref(), Some("tx-1"));

        let transfers = w.node.transfers();
        assert_eq!(transfers.len(), 1);
        assert_eq!(transfers[0].destination, STREAMER);
        assert_eq!(transfers[0].allocations[0].asset, "usdc");
        assert_eq!(transfers[0].allocations[0].amount, units(100_000));
        assert_eq!(transfers[0].memo.as_deref(), Some("gg"));
        assert_eq!(w.node.unified_balance(&STREAMER), units(100_000));
        assert_eq!(w.node.unified_balance(&w.chain.wallet()), units(900_000));

        let sent = w.drain().into_iter().find_map(|e| match e {
            OrchestratorEvent::TipSent {
                amount, remaining, ..
            } => Some((amount, remaining)),
            _ => None,
        });
        assert_eq!(sent, Some((units(100_000), units(900_000))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_partner_session_uses_partner_rate() {
        let mut w = funded().await;
        w.drain();
        w.service
            .create_session(STREAMER, units(DEPOSIT), true)
            .await
            .unwrap();

        let bps = w.drain().into_iter().find_map(|e| match e {
            OrchestratorEvent::SessionCreated { commission_bps, .. } => Some(commission_bps),
            _ => None,
        });
        assert_eq!(bps, Some(500));

        let receipt = w
            .service
            .send_tip(units(100_000), STREAMER, None)
            .await
            .unwrap();
        assert_eq!(receipt.commission, units(5_000));
    }

    #[tokio::test(start_paused = true)]
    async fn test_tip_over_budget_never_reaches_node() {
        let mut w = funded().await;
        w.service
            .create_session(STREAMER, units(500_000), false)
            .await
            .unwrap();
        w.drain();

        let err = w
            .service
            .send_tip(units(600_000), STREAMER, None)
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            OrchestratorError::Rejected(LedgerRejection::ExceedsRemaining { .. })
        ));
        assert_eq!(w.node.count(Method::Transfer), 0);
        assert_eq!(w.service.active_session().unwrap().spent, U256::zero());
        assert_eq!(error_kinds(&w.drain()), vec![ErrorKind::InsufficientBalance]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_tip_to_other_streamer_is_rejected() {
        let w = funded().await;
        w.service
            .create_session(STREAMER, units(500_000), false)
            .await
            .unwrap();

        let err = w
            .service
            .send_tip(units(1_000), Address([0x11; 20]), None)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            OrchestratorError::Rejected(LedgerRejection::StreamerMismatch { .. })
        ));
        assert!(w.node.transfers().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_session_budget_limited_by_funds() {
        let w = funded().await;
        let err = w
            .service
            .create_session(STREAMER, units(DEPOSIT + 1), false)
            .await
            .unwrap_err();
        assert!(matches!(err, OrchestratorError::InsufficientBalance { .. }));

        w.service
            .create_session(STREAMER, units(DEPOSIT), false)
            .await
            .unwrap();
        let err = w
            .service
            .create_session(STREAMER, units(1), false)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            OrchestratorError::Rejected(LedgerRejection::SessionActive(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_spending_check_does_not_mutate() {
        let w = funded().await;
        w.service
            .create_session(STREAMER, units(500_000), false)
            .await
            .unwrap();
        w.service
            .send_tip(units(100_000), STREAMER, None)
            .await
            .unwrap();

        let over_limit = w.service.check_spending_limit(units(300_000), units(350_000));
        assert!(!over_limit.allowed);
        assert!(over_limit.exceeds_limit);
        assert!(!over_limit.exceeds_budget);

        let fine = w.service.check_spending_limit(units(100_000), units(1_000_000));
        assert!(fine.allowed);
        assert_eq!(fine.projected_spent, units(200_000));
        assert_eq!(fine.remaining, units(400_000));

        assert_eq!(w.service.active_session().unwrap().spent, units(100_000));
    }

    #[tokio::test(start_paused = true)]
    async fn test_tip_metrics_are_exported() {
        cw_telemetry::register_metrics().unwrap();
        let w = funded().await;
        w.service
            .create_session(STREAMER, units(200_000), false)
            .await
            .unwrap();

        let sent = cw_telemetry::metrics::TIPS_SENT.get();
        let rejected = cw_telemetry::metrics::TIPS_REJECTED.get();
        w.service
            .send_tip(units(100_000), STREAMER, None)
            .await
            .unwrap();
        w.service
            .send_tip(units(500_000), STREAMER, None)
            .await
            .unwrap_err();

        assert!(cw_telemetry::metrics::TIPS_SENT.get() >= sent + 1.0);
        assert!(cw_telemetry::metrics::TIPS_REJECTED.get() >= rejected + 1.0);
        let text = cw_telemetry::encode_metrics().unwrap();
        assert!(text.contains("cw_session_tips_sent_total"));
    }

    // =========================================================================
    // SESSION CLOSE
    // =========================================================================

    #[tokio::test(start_paused = true)]
    async fn test_end_session_withdraws_remaining_balance() {
        let mut w = funded().await;
        w.service
            .create_session(STREAMER, units(DEPOSIT), false)
            .await
            .unwrap();
        w.service
            .send_tip(units(700_000), STREAMER, None)
            .await
            .unwrap();
        w.drain();

        let summary = w.service.end_session().await.unwrap();

        assert_eq!(summary.total_deposited, units(DEPOSIT));
        assert_eq!(summary.total_spent, units(700_000));
        assert_eq!(summary.total_commission, units(70_000));
        assert_eq!(summary.unused_balance, units(300_000));
        assert_eq!(summary.tip_count, 1);

        assert_eq!(
            w.chain.call_kinds()[5..].to_vec(),
            vec![CallKind::Close, CallKind::Withdraw]
        );
        assert_eq!(w.chain.wallet_balance(CHAIN, TOKEN), units(300_000));
        assert!(w.service.active_session().is_none());
        assert!(w.service.tracker().current().is_none());

        let closed = w
            .drain()
            .iter()
            .any(|e| matches!(e, OrchestratorEvent::SessionClosed { .. }));
        assert!(closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_withdraw_retry_after_rejected_close_recovers_funds() {
        let w = funded().await;
        let id = w.service.tracker().current().unwrap().id;
        w.chain.reject(CallKind::Close);

        let err = w.service.close_channel_and_withdraw().await.unwrap_err();
        match err {
            OrchestratorError::Flow { flow, stage, .. } => {
                assert_eq!(flow, FlowKind::Withdraw);
                assert_eq!(stage, FlowStage::Close);
            }
            other => panic!("expected a flow error, got {other:?}"),
        }
        settle().await;
        assert_eq!(
            w.service.tracker().current().unwrap().status,
            ChannelStatus::Closing
        );

        w.chain.heal();
        let outcome = w.service.close_channel_and_withdraw().await.unwrap();

        assert_eq!(outcome.closed, Some(id));
        assert_eq!(outcome.withdrawn, units(DEPOSIT));
        assert_eq!(
            w.chain.call_kinds()[5..].to_vec(),
            vec![CallKind::Close, CallKind::Withdraw]
        );
        assert!(!w.chain.channel(&id).unwrap().open);
        assert_eq!(w.chain.wallet_balance(CHAIN, TOKEN), units(DEPOSIT));
        assert!(w.service.tracker().current().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_withdraw_retry_after_reverted_close_recovers_funds() {
        let w = funded().await;
        w.chain.revert(CallKind::Close);
        w.service.close_channel_and_withdraw().await.unwrap_err();

        w.chain.heal();
        w.service.close_channel_and_withdraw().await.unwrap();

        assert_eq!(
            w.chain.call_kinds()[5..].to_vec(),
            vec![CallKind::Close, CallKind::Close, CallKind::Withdraw]
        );
        assert_eq!(w.chain.wallet_balance(CHAIN, TOKEN), units(DEPOSIT));
    }

    #[tokio::test(start_paused = true)]
    async fn test_end_session_with_empty_ledger_only_closes() {
        let w = funded().await;
        w.service
            .create_session(STREAMER, units(DEPOSIT), false)
            .await
            .unwrap();
        w.service
            .send_tip(units(DEPOSIT), STREAMER, None)
            .await
            .unwrap();

        w.service.end_session().await.unwrap();

        assert_eq!(w.chain.call_kinds()[5..].to_vec(), vec![CallKind::Close]);
        assert_eq!(w.chain.wallet_balance(CHAIN, TOKEN), U256::zero());
    }

    #[tokio::test(start_paused = true)]
    async fn test_tip_after_session_closed_is_rejected() {
        let w = funded().await;
        w.service
            .create_session(STREAMER, units(DEPOSIT), false)
            .await
            .unwrap();
        w.service.end_session().await.unwrap();

        let err = w
            .service
            .send_tip(units(1), STREAMER, None)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            OrchestratorError::Rejected(LedgerRejection::NoActiveSession)
        ));
        let err = w.service.end_session().await.unwrap_err();
        assert!(matches!(
            err,
            OrchestratorError::Rejected(LedgerRejection::NoActiveSession)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_withdraw_without_channel_is_a_no_op() {
        let w = ready().await;
        let outcome = w.service.close_channel_and_withdraw().await.unwrap();
        assert!(outcome.closed.is_none());
        assert_eq!(outcome.withdrawn, U256::zero());
        assert!(w.chain.calls().is_empty());
    }
}
