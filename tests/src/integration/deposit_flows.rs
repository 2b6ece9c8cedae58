//! # Deposit and Cleanup Scenarios
//!
//! Wallet → custody → channel → unified ledger, the leftover-state
//! pre-check, and `deep_cleanup`.

#[cfg(test)]
mod tests {
    use primitive_types::U256;

    use cw_orchestrator::domain::{
        Acknowledgement, CallKind, ChainId, ChannelStatus, FlowKind, FlowStage,
    };
    use cw_orchestrator::protocol::{Method, NodeChannelStatus};
    use cw_orchestrator::{ChannelOrchestratorApi, OrchestratorError};
    use shared_bus::ErrorKind;

    use crate::integration::fixtures::*;

    // =========================================================================
    // DEPOSIT
    // =========================================================================

    #[tokio::test(start_paused = true)]
    async fn test_deposit_with_zero_allowance_runs_all_five_calls() {
        let mut w = ready().await;
        w.drain();
        w.chain.fund(CHAIN, TOKEN, U256::from(1_000u64));

        let outcome = w
            .service
            .deposit_and_open_channel(U256::from(1_000u64), CHAIN, TOKEN)
            .await
            .unwrap();

        let expected = vec![
            CallKind::Approve,
            CallKind::Deposit,
            CallKind::CreateChannel,
            CallKind::Resize,
            CallKind::Allocate,
        ];
        assert_eq!(w.chain.call_kinds(), expected);
        let submitted: Vec<CallKind> = outcome.transactions.iter().map(|(k, _)| *k).collect();
        assert_eq!(submitted, expected);
        assert_eq!(outcome.funded, Acknowledgement::Confirmed);
        assert_eq!(outcome.unified_balance, U256::from(1_000u64));

        let channel = w.service.tracker().current().unwrap();
        assert_eq!(channel.id, outcome.channel_id);
        assert_eq!(channel.status, ChannelStatus::Allocated);
        let onchain = w.chain.channel(&outcome.channel_id).unwrap();
        assert!(onchain.open);
        assert_eq!(onchain.locked, U256::zero());
        assert_eq!(w.node.unified_balance(&w.chain.wallet()), U256::from(1_000u64));
        assert_eq!(w.chain.wallet_balance(CHAIN, TOKEN), U256::zero());

        let steps = deposit_steps(&w.drain());
        assert_eq!(steps.first(), Some(&(0, false)));
        assert_eq!(steps.last(), Some(&(7, true)));
        assert!(steps.windows(2).all(|pair| pair[0].0 <= pair[1].0));
    }

    #[tokio::test(start_paused = true)]
    async fn test_sufficient_allowance_skips_approve() {
        let w = ready().await;
        w.chain
            .set_allowance(CHAIN, TOKEN, CUSTODY, U256::from(5_000u64));
        w.deposit(1_000).await;

        assert_eq!(
            w.chain.call_kinds(),
            vec![
                CallKind::Deposit,
                CallKind::CreateChannel,
                CallKind::Resize,
                CallKind::Allocate
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_unsupported_chain_submits_nothing() {
        let mut w = ready().await;
        w.drain();
        w.chain.fund(ChainId(1), TOKEN, U256::from(1_000u64));

        let err = w
            .service
            .deposit_and_open_channel(U256::from(1_000u64), ChainId(1), TOKEN)
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::ChainUnsupported);
        assert!(w.chain.calls().is_empty());
        assert_eq!(w.node.count(Method::CreateChannel), 0);
        assert_eq!(error_kinds(&w.drain()), vec![ErrorKind::ChainUnsupported]);
        assert!(w.service.tracker().current().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_amount_is_refused_before_any_call() {
        let w = ready().await;
        let err = w
            .service
            .deposit_and_open_channel(U256::zero(), CHAIN, TOKEN)
            .await
            .unwrap_err();
        assert!(matches!(err, OrchestratorError::InvalidAmount(_)));
        assert!(w.chain.calls().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_reverted_deposit_aborts_at_its_stage() {
        let mut w = ready().await;
        w.drain();
        w.chain.fund(CHAIN, TOKEN, U256::from(1_000u64));
        w.chain.revert(CallKind::Deposit);

        let err = w
            .service
            .deposit_and_open_channel(U256::from(1_000u64), CHAIN, TOKEN)
            .await
            .unwrap_err();

        match &err {
            OrchestratorError::Flow { flow, stage, .. } => {
                assert_eq!(*flow, FlowKind::Deposit);
                assert_eq!(*stage, FlowStage::Deposit);
            }
            other => panic!("expected a flow error, got {other:?}"),
        }
        assert_eq!(err.kind(), ErrorKind::Transaction);
        assert_eq!(w.chain.call_kinds(), vec![CallKind::Approve, CallKind::Deposit]);
        assert_eq!(w.node.count(Method::CreateChannel), 0);
        assert_eq!(error_kinds(&w.drain()), vec![ErrorKind::Transaction]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_deposit_rerun_after_reverted_deposit_completes() {
        let w = ready().await;
        w.chain.fund(CHAIN, TOKEN, U256::from(1_000u64));
        w.chain.revert(CallKind::Deposit);
        w.service
            .deposit_and_open_channel(U256::from(1_000u64), CHAIN, TOKEN)
            .await
            .unwrap_err();

        w.chain.heal();
        let outcome = w
            .service
            .deposit_and_open_channel(U256::from(1_000u64), CHAIN, TOKEN)
            .await
            .unwrap();

        // The approval from the first run still covers the amount.
        assert_eq!(
            w.chain.call_kinds(),
            vec![
                CallKind::Approve,
                CallKind::Deposit,
                CallKind::Deposit,
                CallKind::CreateChannel,
                CallKind::Resize,
                CallKind::Allocate,
            ]
        );
        assert_eq!(outcome.unified_balance, U256::from(1_000u64));
        assert_eq!(w.chain.wallet_balance(CHAIN, TOKEN), U256::zero());
        assert_eq!(
            w.service.tracker().current().unwrap().status,
            ChannelStatus::Allocated
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_channel_acknowledgements_do_not_fail_deposit() {
        let w = ready().await;
        w.node.mute_channel_updates(true);
        w.deposit(1_000).await;

        let channel = w.service.tracker().current().unwrap();
        assert_eq!(channel.status, ChannelStatus::Allocated);
        assert_eq!(channel.acks.opened, Some(Acknowledgement::Unconfirmed));
        assert_eq!(channel.acks.locked, Some(Acknowledgement::Unconfirmed));
        assert_eq!(channel.acks.funded, Some(Acknowledgement::Confirmed));
    }

    // =========================================================================
    // PRE-CHECK AND CLEANUP
    // =========================================================================

    #[tokio::test(start_paused = true)]
    async fn test_precheck_closes_channel_left_by_previous_run() {
        let first = ready().await;
        first.deposit(1_000).await;
        let stale = first.service.tracker().current().unwrap().id;
        first.service.shutdown().await;

        let second = world_on(first.node.clone(), first.chain.clone());
        second.initialize().await;
        second.deposit(500).await;

        assert_eq!(
            second.chain.call_kinds()[5..].to_vec(),
            vec![
                CallKind::Close,
                CallKind::Withdraw,
                CallKind::Approve,
                CallKind::Deposit,
                CallKind::CreateChannel,
                CallKind::Resize,
                CallKind::Allocate,
            ]
        );
        assert_eq!(second.node.channel_status(&stale), Some(NodeChannelStatus::Closed));
        assert_eq!(second.node.unified_balance(&second.chain.wallet()), U256::from(500u64));
        assert_eq!(second.chain.wallet_balance(CHAIN, TOKEN), U256::from(1_000u64));
    }

    #[tokio::test(start_paused = true)]
    async fn test_deep_cleanup_is_idempotent() {
        let w = ready().await;
        w.deposit(1_000).await;
        let id = w.service.tracker().current().unwrap().id;

        let summary = w.service.deep_cleanup(CHAIN, TOKEN).await.unwrap();
        assert_eq!(summary.channels_closed.len(), 1);
        assert!(!w.chain.channel(&id).unwrap().open);
        assert_eq!(summary.custody_drained.amount, U256::from(1_000u64));
        assert!(summary.errors.is_empty());
        assert!(w.service.tracker().current().is_none());
        let calls = w.chain.call_kinds().len();

        let again = w.service.deep_cleanup(CHAIN, TOKEN).await.unwrap();
        assert!(again.is_empty());
        assert_eq!(w.chain.call_kinds().len(), calls);
        assert_eq!(w.chain.wallet_balance(CHAIN, TOKEN), U256::from(1_000u64));
    }

    #[tokio::test(start_paused = true)]
    async fn test_deep_cleanup_settles_close_rejected_by_wallet() {
        let w = ready().await;
        w.deposit(1_000).await;
        let id = w.service.tracker().current().unwrap().id;

        w.chain.reject(CallKind::Close);
        w.service.close_channel_and_withdraw().await.unwrap_err();
        assert_eq!(w.node.channel_status(&id), Some(NodeChannelStatus::Closed));
        assert!(w.chain.channel(&id).unwrap().open);

        w.chain.heal();
        let summary = w.service.deep_cleanup(CHAIN, TOKEN).await.unwrap();

        assert_eq!(summary.channels_closed, vec![id]);
        assert_eq!(summary.custody_drained.amount, U256::from(1_000u64));
        assert!(summary.errors.is_empty());
        assert!(!w.chain.channel(&id).unwrap().open);
        assert_eq!(w.chain.wallet_balance(CHAIN, TOKEN), U256::from(1_000u64));
    }

    #[tokio::test(start_paused = true)]
    async fn test_deep_cleanup_reports_failed_close_without_failing() {
        let mut w = ready().await;
        let orphan = w
            .node
            .add_channel(w.chain.wallet(), CHAIN, TOKEN, U256::from(5u64));
        w.drain();

        let summary = w.service.deep_cleanup(CHAIN, TOKEN).await.unwrap();

        assert!(summary.channels_closed.is_empty());
        assert_eq!(summary.errors.len(), 1);
        assert_eq!(summary.errors[0].step, "close");
        assert_eq!(summary.errors[0].channel, Some(orphan));
        assert!(error_kinds(&w.drain()).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_deposit_requires_initialize() {
        let w = world();
        let err = w
            .service
            .deposit_and_open_channel(U256::from(1u64), CHAIN, TOKEN)
            .await
            .unwrap_err();
        assert!(matches!(err, OrchestratorError::NotInitialized));
        assert_eq!(w.node.connects(), 0);
    }
}
