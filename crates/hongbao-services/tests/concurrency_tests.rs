//! Concurrent claims and creations against shared envelopes.
//!
//! Threads line up on a `Barrier` so the claims genuinely race on the same pool.

mod common;

use common::*;
use hongbao_core::{EnvelopeConfig, EnvelopeStatus, HongbaoError, PointsLedger, SplitMode, UserId};
use hongbao_services::{CreateEnvelopeRequest, RedEnvelopeService};
use std::sync::{Arc, Barrier};
use std::thread;

/// A budget larger than the slice count: every lost race means one slice fewer, so
/// no claimant can run out of attempts while slices remain.
fn roomy(seed: u64) -> EnvelopeConfig {
    EnvelopeConfig {
        retry_budget: 32,
        ..seeded(seed)
    }
}

fn race<T, F>(service: &Arc<RedEnvelopeService>, threads: usize, f: F) -> Vec<T>
where
    T: Send + 'static,
    F: Fn(&RedEnvelopeService, usize) -> T + Send + Sync + 'static,
{
    let barrier = Arc::new(Barrier::new(threads));
    let f = Arc::new(f);
    let handles: Vec<_> = (0..threads)
        .map(|i| {
            let service = Arc::clone(service);
            let barrier = Arc::clone(&barrier);
            let f = Arc::clone(&f);
            thread::spawn(move || {
                barrier.wait();
                f(&service, i)
            })
        })
        .collect();
    handles.into_iter().map(|h| h.join().unwrap()).collect()
}

#[test]
fn oversubscribed_envelope_pays_exactly_its_slices() {
    for (mode, seed) in [(SplitMode::Random, 11), (SplitMode::Equal, 12), (SplitMode::Random, 13)] {
        let h = harness(roomy(seed));
        h.ledger.grant(FUNDER, 200).unwrap();
        let token = h
            .service
            .create_envelope(CreateEnvelopeRequest::new(FUNDER, 200, 20).mode(mode))
            .unwrap()
            .token;

        let service = Arc::new(h.service);
        let claimants = 20 + 12;
        let claim_token = token.clone();
        let results = race(&service, claimants, move |svc, i| {
            svc.claim_envelope(&claim_token, UserId(1_000 + i as i64), "racer")
        });

        let wins: Vec<_> = results.iter().filter_map(|r| r.as_ref().ok()).collect();
        let finished = results
            .iter()
            .filter(|r| matches!(r, Err(HongbaoError::EnvelopeFinished)))
            .count();
        assert_eq!(wins.len(), 20, "{mode:?}: {results:?}");
        assert_eq!(finished, 12);
        assert_eq!(wins.iter().map(|o| o.amount).sum::<u64>(), 200);
        assert_eq!(wins.iter().filter(|o| o.is_finished).count(), 1);
        assert!(wins.iter().filter(|o| o.is_luckiest).count() <= 1);

        let summary = service.envelope_summary(&token).unwrap();
        assert_eq!(summary.envelope.status, EnvelopeStatus::Finished);
        assert_conserved(&summary);
        assert_luckiest(&summary);

        let mut slots: Vec<u32> = summary.claims.iter().map(|c| c.slice_index).collect();
        slots.sort_unstable();
        assert_eq!(slots, (1..=20).collect::<Vec<_>>());
        assert_eq!(h.ledger.total_supply().unwrap(), 200);
    }
}

#[test]
fn same_claimant_racing_itself_wins_once() {
    let h = harness(roomy(7));
    h.ledger.grant(FUNDER, 100).unwrap();
    let token = h
        .service
        .create_envelope(CreateEnvelopeRequest::new(FUNDER, 100, 10))
        .unwrap()
        .token;

    let service = Arc::new(h.service);
    let claim_token = token.clone();
    let results = race(&service, 16, move |svc, _| {
        svc.claim_envelope(&claim_token, UserId(77), "twin")
    });

    let wins: Vec<_> = results.iter().filter_map(|r| r.as_ref().ok()).collect();
    assert_eq!(wins.len(), 1);
    assert!(results
        .iter()
        .filter(|r| r.is_err())
        .all(|r| matches!(r, Err(HongbaoError::AlreadyClaimed))));

    let summary = service.envelope_summary(&token).unwrap();
    assert_eq!(summary.claims.len(), 1);
    assert_eq!(h.ledger.balance(UserId(77)).unwrap(), wins[0].amount);
    assert_conserved(&summary);
}

#[test]
fn concurrent_creations_never_overspend() {
    let h = harness(EnvelopeConfig::default());
    h.ledger.grant(FUNDER, 100).unwrap();

    let service = Arc::new(h.service);
    let results = race(&service, 12, |svc, _| {
        svc.create_envelope(CreateEnvelopeRequest::new(FUNDER, 30, 3))
    });

    let created = results.iter().filter(|r| r.is_ok()).count();
    assert_eq!(created, 3);
    assert!(results.iter().filter(|r| r.is_err()).all(|r| matches!(
        r,
        Err(HongbaoError::InsufficientBalance { required: 30, .. })
    )));
    assert_eq!(h.ledger.balance(FUNDER).unwrap(), 10);
    assert_eq!(h.store.envelope_count().unwrap(), 3);
}

#[test]
fn sweep_racing_claims_keeps_the_books_balanced() {
    let h = harness(roomy(99));
    h.ledger.grant(FUNDER, 500).unwrap();
    let created = h
        .service
        .create_envelope(CreateEnvelopeRequest::new(FUNDER, 500, 50))
        .unwrap();
    // Expire mid-flight: claims and sweeps race for the same pool.
    h.clock.set(created.expires_at_ms);

    let service = Arc::new(h.service);
    let token = created.token.clone();
    let results = race(&service, 24, move |svc, i| {
        if i % 4 == 0 {
            svc.sweep_expired().map(|r| r.refunded_points())
        } else {
            svc.claim_envelope(&token, UserId(2_000 + i as i64), "racer")
                .map(|o| o.amount)
        }
    });

    // Whoever wins the expiry transition (a sweep or a claim) refunds exactly once.
    for (i, r) in results.iter().enumerate() {
        if i % 4 != 0 {
            assert_eq!(r, &Err(HongbaoError::EnvelopeExpired));
        }
    }
    let metrics = service.metrics_snapshot();
    assert_eq!(metrics.envelopes_expired, 1);
    assert_eq!(metrics.points_refunded, 500);

    let summary = service.envelope_summary(&created.token).unwrap();
    assert_eq!(summary.envelope.status, EnvelopeStatus::Expired);
    assert!(summary.claims.is_empty());
    assert_eq!(h.ledger.balance(FUNDER).unwrap(), 500);
}
