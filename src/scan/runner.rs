//! Orchestration of the discovery and verification passes.

use crate::config::ScannerConfig;
use crate::scan::addr;
use crate::scan::batch::{BatchScheduler, VERIFY_BATCH_MULTIPLIER};
use crate::scan::geo::GeoLocator;
use crate::scan::models::{ProxyRecord, Task, Verification};
use crate::scan::progress::RunContext;
use crate::scan::retry::{self, MAX_RETRIES};
use crate::scan::stealth::StealthProbe;
use crate::scan::verify::VerificationPipeline;
use crate::store::ResultStore;
use log::warn;
use std::collections::HashMap;

/// Stealth-probe every task; returns the candidates that looked like open
/// proxies. A probe that fails its whole retry budget is simply not open.
pub async fn discover_open_proxies(
    config: &ScannerConfig,
    probe: &StealthProbe,
    ctx: &RunContext,
    tasks: Vec<Task>,
) -> Vec<Task> {
    ctx.record("discovery", format!("probing {} targets", tasks.len()), "started");

    let scheduler = BatchScheduler::new(config.concurrency);
    let results = scheduler
        .run(tasks, ctx, |task| async move {
            let open = retry::probe_with_retries(MAX_RETRIES, || async move {
                Ok(probe.classify(task.addr, task.port).await)
            })
            .await;
            if open {
                ctx.mark_found();
            }
            (task, open)
        })
        .await;

    let open: Vec<Task> = results
        .into_iter()
        .filter(|(_, open)| *open)
        .map(|(task, _)| task)
        .collect();
    ctx.record(
        "discovery",
        format!("found {} open proxies", open.len()),
        "completed",
    );
    open
}

/// Fully verify each open candidate; returns the working subset with its
/// measurements, in completion order.
pub async fn verify_candidates(
    config: &ScannerConfig,
    pipeline: &VerificationPipeline,
    ctx: &RunContext,
    candidates: Vec<Task>,
) -> Vec<(Task, Verification)> {
    ctx.record(
        "verification",
        format!("testing {} candidates", candidates.len()),
        "started",
    );

    let scheduler =
        BatchScheduler::new(config.concurrency).with_batch_multiplier(VERIFY_BATCH_MULTIPLIER);
    let results = scheduler
        .run(candidates, ctx, |task| async move {
            let outcome = pipeline.verify(task.addr, task.port).await;
            if outcome.is_some() {
                ctx.mark_found();
            }
            (task, outcome)
        })
        .await;

    let working: Vec<(Task, Verification)> = results
        .into_iter()
        .filter_map(|(task, outcome)| outcome.map(|verification| (task, verification)))
        .collect();
    ctx.record(
        "verification",
        format!("{} proxies working", working.len()),
        "completed",
    );
    working
}

/// Persist the verified set and fold per-/24 success fractions into the
/// range feedback. A failed single write is logged and skipped; the run
/// continues. Returns how many proxy records were stored.
pub async fn record_verified(
    store: &ResultStore,
    geo: Option<&GeoLocator>,
    probed: &[Task],
    verified: &[(Task, Verification)],
    ctx: &RunContext,
) -> usize {
    let mut stored = 0usize;
    for (task, verification) in verified {
        let mut record = ProxyRecord::verified(*task, *verification);
        if let Some(geo) = geo {
            if let Ok(details) = geo.lookup(task.addr.into()) {
                if let Some(country) = details.country {
                    record.country = country;
                }
                if let Some(city) = details.city {
                    record.city = city;
                }
            }
        }
        match store.upsert_proxy(&record).await {
            Ok(()) => {
                stored += 1;
                ctx.record(
                    "verification",
                    record.endpoint(),
                    format!("working: {}ms, {}", record.speed, record.anonymity),
                );
            }
            Err(err) => warn!("failed to record {}: {err}", record.endpoint()),
        }
    }

    for (cidr, observed) in range_hit_fractions(probed, verified) {
        if let Err(err) = store.upsert_range_hit(&cidr, observed).await {
            warn!("failed to record range {cidr}: {err}");
        }
    }
    stored
}

/// Per-/24 success fractions for this run: verified over probed, only for
/// networks that produced at least one working proxy.
fn range_hit_fractions(probed: &[Task], verified: &[(Task, Verification)]) -> Vec<(String, f64)> {
    let mut probed_per_net: HashMap<String, u32> = HashMap::new();
    for task in probed {
        *probed_per_net
            .entry(addr::containing_slash24(task.addr).to_string())
            .or_default() += 1;
    }

    let mut hits_per_net: HashMap<String, u32> = HashMap::new();
    for (task, _) in verified {
        *hits_per_net
            .entry(addr::containing_slash24(task.addr).to_string())
            .or_default() += 1;
    }

    hits_per_net
        .into_iter()
        .map(|(cidr, hits)| {
            let denominator = probed_per_net.get(&cidr).copied().unwrap_or(hits).max(1);
            (cidr, f64::from(hits) / f64::from(denominator))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scan::models::Anonymity;
    use std::net::Ipv4Addr;

    fn task(a: u8, b: u8, port: u16) -> Task {
        Task::new(Ipv4Addr::new(203, 0, a, b), port)
    }

    fn ok(task: Task) -> (Task, Verification) {
        (
            task,
            Verification {
                latency_ms: 100,
                anonymity: Anonymity::Unknown,
            },
        )
    }

    #[test]
    fn test_hit_fractions_cover_only_networks_with_hits() {
        let probed = vec![
            task(113, 1, 80),
            task(113, 2, 80),
            task(113, 3, 80),
            task(113, 4, 80),
            task(200, 1, 80),
        ];
        let verified = vec![ok(task(113, 1, 80))];
        let fractions = range_hit_fractions(&probed, &verified);
        assert_eq!(fractions.len(), 1);
        assert_eq!(fractions[0].0, "203.0.113.0/24");
        assert!((fractions[0].1 - 0.25).abs() < 1e-9);
    }

    #[test]
    fn test_hit_fraction_is_capped_at_one() {
        // Two ports on one host: two probed tasks, two hits, one /24.
        let probed = vec![task(113, 1, 80), task(113, 1, 8080)];
        let verified = vec![ok(task(113, 1, 80)), ok(task(113, 1, 8080))];
        let fractions = range_hit_fractions(&probed, &verified);
        assert_eq!(fractions.len(), 1);
        assert!((fractions[0].1 - 1.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_record_verified_upserts_and_feeds_ranges() {
        let store = ResultStore::open(":memory:").await.unwrap();
        let ctx = RunContext::new();
        let probed = vec![task(113, 1, 80), task(113, 2, 80)];
        let verified = vec![ok(task(113, 1, 80))];

        let stored = record_verified(&store, None, &probed, &verified, &ctx).await;
        assert_eq!(stored, 1);
        assert_eq!(store.active_count().await.unwrap(), 1);

        let ranges = store.working_ranges(10).await.unwrap();
        assert_eq!(ranges.len(), 1);
        assert_eq!(ranges[0].cidr, "203.0.113.0/24");
        assert!((ranges[0].hit_rate - 0.5).abs() < 1e-9);

        let events = ctx.events();
        assert!(events.iter().any(|e| e.detail == "203.0.113.1:80"));
    }
}
