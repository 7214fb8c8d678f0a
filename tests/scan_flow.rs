//! End-to-end shape of a scan over a tiny range with nothing listening.

use proxy_sweep::scan::addr;
use proxy_sweep::scan::batch::BatchScheduler;
use proxy_sweep::scan::models::Task;
use proxy_sweep::scan::progress::RunContext;
use proxy_sweep::scan::retry::{self, MAX_RETRIES};
use proxy_sweep::scan::targets::TargetGenerator;
use proxy_sweep::report;

#[test]
fn tiny_range_yields_one_task_per_host_and_port() {
    let net = addr::parse_range("203.0.113.0/30").unwrap();
    let generator = TargetGenerator::new(vec![80]);
    let tasks = generator.from_ranges(&[net]);

    // Two usable hosts, one port.
    assert_eq!(tasks.len(), 2);
    for task in &tasks {
        assert!(net.contains(&task.addr));
        assert_eq!(task.port, 80);
    }
}

#[tokio::test(start_paused = true)]
async fn failing_sweep_finds_nothing_and_exports_an_empty_list() {
    let net = addr::parse_range("203.0.113.0/30").unwrap();
    let generator = TargetGenerator::new(vec![80]);
    let tasks = generator.from_ranges(&[net]);
    assert_eq!(tasks.len(), 2);

    let ctx = RunContext::new();
    let ctx_ref = &ctx;

    // Every probe errors through its whole retry budget, exactly like an
    // unroutable target.
    let results = BatchScheduler::new(4)
        .run(tasks, ctx_ref, |task| async move {
            let open = retry::probe_with_retries(MAX_RETRIES, || async {
                Err(anyhow::anyhow!("connection timed out"))
            })
            .await;
            if open {
                ctx_ref.mark_found();
            }
            (task, open)
        })
        .await;

    assert_eq!(ctx.completed(), 2);
    assert_eq!(ctx.completed(), ctx.total());
    assert_eq!(ctx.found(), 0);

    let open: Vec<Task> = results
        .into_iter()
        .filter(|(_, open)| *open)
        .map(|(task, _)| task)
        .collect();
    assert!(open.is_empty());

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("open_proxies.txt");
    report::write_task_list(&open, &path).unwrap();
    assert_eq!(std::fs::read_to_string(&path).unwrap(), "");
}
