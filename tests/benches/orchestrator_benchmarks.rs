//! # Clearway Benchmarks
//!
//! Hot paths on the client side:
//!
//! | Area | Operation |
//! |------|-----------|
//! | Protocol | Sign a request envelope, parse a response frame |
//! | Correlator | Dispatch a notification to subscribers |
//! | Ledger | Record a tip, commission arithmetic |

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use primitive_types::U256;
use serde_json::json;
use std::time::Duration;

use cw_orchestrator::config::CommissionConfig;
use cw_orchestrator::domain::{Address, RequestId, SessionKey};
use cw_orchestrator::ledger::{commission_of, SessionLedger};
use cw_orchestrator::protocol::{Method, RequestEnvelope, ResponseEnvelope, RpcRequest};
use cw_orchestrator::rpc::RpcCorrelator;

// ============================================================================
// Protocol
// ============================================================================

fn bench_envelopes(c: &mut Criterion) {
    let mut group = c.benchmark_group("protocol");
    let key = SessionKey::generate();
    let params = json!({ "participant": Address([7; 20]).to_string() });

    group.bench_function("sign_request", |b| {
        b.iter(|| {
            let req = RpcRequest::new(RequestId::new(), Method::GetLedgerBalances, params.clone());
            black_box(RequestEnvelope::signed(req, Some(&key)).and_then(|env| env.to_frame()))
        })
    });

    let frame = ResponseEnvelope::reply(
        RequestId::new(),
        Method::GetLedgerBalances,
        json!({ "ledger_balances": [{ "asset": "usdc", "amount": "1000000" }] }),
    )
    .to_frame()
    .unwrap();
    group.bench_function("parse_response", |b| {
        b.iter(|| black_box(ResponseEnvelope::from_frame(&frame)))
    });

    group.finish();
}

// ============================================================================
// Correlator
// ============================================================================

fn bench_dispatch(c: &mut Criterion) {
    let rpc = RpcCorrelator::new(Duration::from_secs(60));
    let mut pushes = rpc.subscribe();
    let frame = ResponseEnvelope::notification(
        Method::BalanceUpdate,
        json!({ "ledger_balances": [{ "asset": "usdc", "amount": "42" }] }),
    )
    .to_frame()
    .unwrap();

    c.bench_function("correlator/dispatch_notification", |b| {
        b.iter(|| {
            rpc.dispatch(black_box(&frame));
            black_box(pushes.try_recv().ok())
        })
    });
}

// ============================================================================
// Ledger
// ============================================================================

fn bench_ledger(c: &mut Criterion) {
    let mut group = c.benchmark_group("ledger");
    let streamer = Address([0x5e; 20]);

    group.bench_function("commission_of", |b| {
        b.iter(|| black_box(commission_of(black_box(U256::from(123_456_789u64)), 1000)))
    });

    group.bench_function("record_spend", |b| {
        let ledger = SessionLedger::new(CommissionConfig::default());
        ledger.open(streamer, U256::MAX, false).unwrap();
        b.iter(|| black_box(ledger.record_spend(streamer, U256::one(), None)))
    });

    group.finish();
}

criterion_group!(benches, bench_envelopes, bench_dispatch, bench_ledger);
criterion_main!(benches);
