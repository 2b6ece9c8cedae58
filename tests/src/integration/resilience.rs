//! # Resilience Scenarios
//!
//! Handshake failures, reconnect with re-authentication, the reconnect
//! bound, unanswered requests and the one-flow-at-a-time rule.

#[cfg(test)]
mod tests {
    use primitive_types::U256;
    use std::sync::Arc;
    use std::time::Duration;

    use cw_orchestrator::adapters::FileCredentialStore;
    use cw_orchestrator::domain::{ConnectionState, FlowKind};
    use cw_orchestrator::protocol::Method;
    use cw_orchestrator::{ChannelOrchestratorApi, ChannelService, OrchestratorError};
    use shared_bus::{ErrorKind, EventFilter, InMemoryEventBus, OrchestratorEvent};

    use crate::integration::fixtures::*;

    fn reconnect_attempts(events: &[OrchestratorEvent]) -> Vec<u32> {
        events
            .iter()
            .filter_map(|e| match e {
                OrchestratorEvent::Reconnecting { attempt, .. } => Some(*attempt),
                _ => None,
            })
            .collect()
    }

    // =========================================================================
    // AUTHENTICATION
    // =========================================================================

    #[tokio::test(start_paused = true)]
    async fn test_unanswered_handshake_times_out() {
        let mut w = world();
        w.node.silence(Method::AuthRequest);

        let err = w
            .service
            .initialize(w.chain.wallet(), w.chain.clone(), w.chain.clone())
            .await
            .unwrap_err();

        assert!(matches!(err, OrchestratorError::AuthTimeout(_)));
        assert_eq!(w.service.connection_state(), ConnectionState::Disconnected);
        assert_eq!(error_kinds(&w.drain()), vec![ErrorKind::AuthTimeout]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejected_signature_fails_initialize() {
        let mut w = world();
        w.node.reject_auth(true);

        let err = w
            .service
            .initialize(w.chain.wallet(), w.chain.clone(), w.chain.clone())
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::AuthRejected);
        assert!(w.store.is_empty());
        assert_eq!(error_kinds(&w.drain()), vec![ErrorKind::AuthRejected]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wallet_declining_to_sign_fails_initialize() {
        let w = world();
        w.chain.refuse_signatures();

        let err = w
            .service
            .initialize(w.chain.wallet(), w.chain.clone(), w.chain.clone())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AuthRejected);
        assert_eq!(w.node.count(Method::AuthVerify), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stored_token_skips_wallet_signature() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("credentials.json");
        let node = cw_orchestrator::LoopbackNode::standard();
        let chain = Arc::new(cw_orchestrator::InMemoryChain::new());

        let service = |node: &cw_orchestrator::LoopbackNode| {
            ChannelService::new(
                config(),
                Arc::new(node.clone()),
                Arc::new(FileCredentialStore::new(&path)),
                Arc::new(InMemoryEventBus::new()),
            )
        };

        let first = service(&node);
        first
            .initialize(chain.wallet(), chain.clone(), chain.clone())
            .await
            .unwrap();
        first.shutdown().await;

        chain.refuse_signatures();
        let second = service(&node);
        second
            .initialize(chain.wallet(), chain.clone(), chain.clone())
            .await
            .unwrap();
        assert_eq!(second.connection_state(), ConnectionState::Authenticated);
        assert_eq!(node.count(Method::AuthVerify), 2);
    }

    // =========================================================================
    // RECONNECT
    // =========================================================================

    #[tokio::test(start_paused = true)]
    async fn test_dropped_connection_is_restored_and_reauthenticated() {
        let mut w = ready().await;
        w.drain();

        w.node.drop_connection();
        tokio::time::sleep(Duration::from_secs(1)).await;

        assert_eq!(w.service.connection_state(), ConnectionState::Authenticated);
        assert_eq!(w.node.connects(), 2);
        assert_eq!(w.node.count(Method::AuthVerify), 2);

        let events = w.drain();
        assert!(events.iter().any(|e| matches!(
            e,
            OrchestratorEvent::Disconnected {
                will_retry: true,
                ..
            }
        )));
        assert_eq!(reconnect_attempts(&events), vec![1]);
        assert!(events
            .iter()
            .any(|e| matches!(e, OrchestratorEvent::ConfigReady { .. })));
        assert!(error_kinds(&events).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnect_gives_up_after_bound() {
        let mut w = ready().await;
        w.drain();

        w.node.fail_next_connects(10);
        w.node.drop_connection();
        tokio::time::sleep(Duration::from_secs(10)).await;

        let events = w.drain();
        assert_eq!(reconnect_attempts(&events), vec![1, 2, 3]);
        assert_eq!(error_kinds(&events), vec![ErrorKind::Connection]);
        assert_eq!(w.node.connects(), 4);
        assert_eq!(w.service.connection_state(), ConnectionState::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_does_not_reconnect() {
        let mut w = ready().await;
        w.drain();

        w.service.shutdown().await;
        tokio::time::sleep(Duration::from_secs(10)).await;

        let events = w.drain();
        assert!(reconnect_attempts(&events).is_empty());
        assert!(events.iter().any(|e| matches!(
            e,
            OrchestratorEvent::Disconnected {
                will_retry: false,
                ..
            }
        )));
        assert_eq!(w.node.connects(), 1);
    }

    // =========================================================================
    // REQUESTS AND FLOWS
    // =========================================================================

    #[tokio::test(start_paused = true)]
    async fn test_unanswered_channel_query_becomes_cleanup_warning() {
        let w = ready().await;
        w.node.silence(Method::GetChannels);

        let summary = w.service.deep_cleanup(CHAIN, TOKEN).await.unwrap();

        assert_eq!(summary.errors.len(), 1);
        assert_eq!(summary.errors[0].step, "get_channels");
        assert!(summary.channels_closed.is_empty());

        w.node.unsilence(Method::GetChannels);
        let again = w.service.deep_cleanup(CHAIN, TOKEN).await.unwrap();
        assert!(again.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_deposits_admit_one_flow() {
        let w = ready().await;
        w.chain.fund(CHAIN, TOKEN, U256::from(2_000u64));

        let (a, b) = tokio::join!(
            w.service
                .deposit_and_open_channel(U256::from(1_000u64), CHAIN, TOKEN),
            w.service
                .deposit_and_open_channel(U256::from(1_000u64), CHAIN, TOKEN),
        );

        assert!(a.is_ok());
        assert!(matches!(
            b,
            Err(OrchestratorError::FlowInProgress(FlowKind::Deposit))
        ));
        assert_eq!(w.node.count(Method::CreateChannel), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_balance_push_reaches_subscribers() {
        let w = ready().await;
        let mut late = w.service.bus().subscribe(EventFilter::all());
        assert!(late.drain().is_empty());

        w.node
            .set_unified_balance(w.chain.wallet(), U256::from(42u64));
        settle().await;

        let balance = late.drain().into_iter().find_map(|e| match e {
            OrchestratorEvent::BalanceUpdate { amount, .. } => Some(amount),
            _ => None,
        });
        assert_eq!(balance, Some(U256::from(42u64)));
    }
}
