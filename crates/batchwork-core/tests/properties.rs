//! End-to-end behaviour of the public API: backpressure, ordering, retry
//! accounting, panicking tasks, concurrency cap and retirement.

use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use batchwork_core::impls::CollectingReporter;
use batchwork_core::{
    BatchError, BatchManager, Executor, ManagerBuilder, ManagerOptions, ManagerRegistry, Mode,
    QueueState, Task, TaskError, batch_manager,
};
use rstest::rstest;
use serde_json::json;
use tokio::sync::watch;
use tokio::time::sleep;

fn always_failing(calls: &Arc<AtomicU32>) -> Task<u32> {
    let calls = Arc::clone(calls);
    Task::call(move || {
        let calls = Arc::clone(&calls);
        async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err::<u32, TaskError>("unavailable".into())
        }
    })
}

fn waiting_for(rx: &watch::Receiver<bool>, value: u32) -> Task<u32> {
    let rx = rx.clone();
    Task::call(move || {
        let mut rx = rx.clone();
        async move {
            rx.wait_for(|open| *open).await?;
            Ok::<_, TaskError>(value)
        }
    })
}

#[rstest]
#[case(Mode::Sequential)]
#[case(Mode::Parallel)]
#[tokio::test(start_paused = true)]
async fn submit_blocks_until_space_frees(#[case] mode: Mode) {
    let registry = ManagerRegistry::new();
    let manager = Arc::new(
        batch_manager::<u32>(
            ManagerOptions::default()
                .with_mode(mode)
                .with_unresolved_batch_limit(3)
                .with_max_in_flight(1),
            &registry,
        )
        .unwrap(),
    );
    let (gate, rx) = watch::channel(false);

    let mut admitted = 0;
    while admitted < 10 {
        let submit = manager.submit(waiting_for(&rx, admitted));
        match tokio::time::timeout(Duration::from_millis(200), submit).await {
            Ok(result) => {
                result.unwrap();
                admitted += 1;
            }
            Err(_) => break,
        }
    }
    assert!(manager.pending_len() <= 3);
    assert!(admitted < 10);

    let blocked = tokio::spawn({
        let manager = Arc::clone(&manager);
        let task = waiting_for(&rx, 99);
        async move { manager.submit(task).await }
    });
    sleep(Duration::from_millis(300)).await;
    assert!(!blocked.is_finished());

    gate.send(true).unwrap();
    blocked.await.unwrap().unwrap();
    manager.wait_idle().await;
    assert_eq!(manager.results_len(), admitted as usize + 1);
}

#[tokio::test(start_paused = true)]
async fn sequential_completes_slow_task_before_instant_one() {
    let registry = ManagerRegistry::new();
    let manager = batch_manager::<&'static str>(ManagerOptions::default(), &registry).unwrap();

    manager
        .submit(Task::call(|| async {
            sleep(Duration::from_millis(1000)).await;
            Ok::<_, TaskError>("slow")
        }))
        .await
        .unwrap();
    manager
        .submit(Task::call(|| async { Ok::<_, TaskError>("instant") }))
        .await
        .unwrap();

    manager.wait_idle().await;
    assert_eq!(manager.results(), vec!["slow", "instant"]);
}

#[tokio::test(start_paused = true)]
async fn sequential_retries_in_place_then_reports_with_arguments() {
    let registry = ManagerRegistry::new();
    let reporter = CollectingReporter::new();
    let manager = ManagerBuilder::new()
        .max_retries(2)
        .registry(&registry)
        .reporter(reporter.clone())
        .build::<u32>()
        .unwrap();
    let sequential = manager.as_sequential().unwrap();

    let calls = Arc::new(AtomicU32::new(0));
    let counter = Arc::clone(&calls);
    manager
        .submit(Task::call_with(
            move |_records| {
                let counter = Arc::clone(&counter);
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    sleep(Duration::from_millis(10)).await;
                    Err::<u32, TaskError>("rejected".into())
                }
            },
            vec![json!("foo"), json!("bar")],
        ))
        .await
        .unwrap();
    assert_eq!(sequential.queue_state(), QueueState::Waiting);

    manager.wait_idle().await;
    assert_eq!(calls.load(Ordering::SeqCst), 3);
    assert_eq!(sequential.queue_state(), QueueState::Ready);
    assert_eq!(sequential.retry_count(), 0);

    let failures = reporter.failures();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].args(), Some(&[json!("foo"), json!("bar")][..]));
    assert_eq!(failures[0].err.to_string(), "rejected");
}

#[tokio::test(start_paused = true)]
async fn parallel_runs_at_most_fifty_of_a_hundred() {
    let registry = ManagerRegistry::new();
    let manager = batch_manager::<usize>(
        ManagerOptions::default().with_mode(Mode::Parallel),
        &registry,
    )
    .unwrap();
    let running = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));

    let tasks = (0..100usize)
        .map(|n| {
            let running = Arc::clone(&running);
            let peak = Arc::clone(&peak);
            Task::call(move || {
                let running = Arc::clone(&running);
                let peak = Arc::clone(&peak);
                async move {
                    peak.fetch_max(running.fetch_add(1, Ordering::SeqCst) + 1, Ordering::SeqCst);
                    sleep(Duration::from_millis(50 + (n as u64 % 7) * 10)).await;
                    running.fetch_sub(1, Ordering::SeqCst);
                    Ok::<_, TaskError>(n)
                }
            })
        })
        .collect();
    manager.submit_many(tasks).await.unwrap();
    assert_eq!(manager.as_parallel().unwrap().current_in_flight(), 50);

    manager.wait_idle().await;
    assert_eq!(peak.load(Ordering::SeqCst), 50);
    let mut results = manager.take_results();
    results.sort_unstable();
    assert_eq!(results, (0..100).collect::<Vec<_>>());
}

#[tokio::test(start_paused = true)]
async fn parallel_single_retry_budget_reports_one_attempt() {
    let registry = ManagerRegistry::new();
    let reporter = CollectingReporter::new();
    let manager = ManagerBuilder::new()
        .mode(Mode::Parallel)
        .max_retries(1)
        .registry(&registry)
        .reporter(reporter.clone())
        .build::<u32>()
        .unwrap();

    let calls = Arc::new(AtomicU32::new(0));
    manager.submit(always_failing(&calls)).await.unwrap();
    manager.wait_idle().await;

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    let failures = reporter.failures();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].attempts, 1);
}

// sequential retries `max_retries` times after the first call; parallel
// counts the first call against the budget
#[rstest]
#[case(Mode::Sequential, 2)]
#[case(Mode::Parallel, 3)]
#[tokio::test(start_paused = true)]
async fn panicking_task_is_reported_once_and_the_next_item_completes(
    #[case] mode: Mode,
    #[case] max_retries: u32,
) {
    let registry = ManagerRegistry::new();
    let reporter = CollectingReporter::new();
    let manager: BatchManager<u32> = ManagerBuilder::new()
        .options(ManagerOptions::default().with_retry_backoff(Duration::from_millis(10), false))
        .mode(mode)
        .max_retries(max_retries)
        .max_in_flight(1)
        .registry(&registry)
        .reporter(reporter.clone())
        .build()
        .unwrap();

    let calls = Arc::new(AtomicU32::new(0));
    let counter = Arc::clone(&calls);
    manager
        .submit(Task::call(move || {
            let counter = Arc::clone(&counter);
            async move {
                if counter.fetch_add(1, Ordering::SeqCst) < u32::MAX {
                    panic!("task body exploded");
                }
                Ok::<u32, TaskError>(0)
            }
        }))
        .await
        .unwrap();
    manager
        .submit(Task::call(|| async { Ok::<_, TaskError>(7) }))
        .await
        .unwrap();

    tokio::time::timeout(Duration::from_secs(60), manager.wait_idle())
        .await
        .expect("executor stayed busy after a panic");
    assert_eq!(calls.load(Ordering::SeqCst), 3);
    assert_eq!(manager.results(), vec![7]);
    let failures = reporter.failures();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].attempts, 3);
}

#[rstest]
#[case(Mode::Sequential)]
#[case(Mode::Parallel)]
#[tokio::test(start_paused = true)]
async fn retire_is_idempotent_and_silences_late_outcomes(#[case] mode: Mode) {
    let registry = ManagerRegistry::new();
    let reporter = CollectingReporter::new();
    let manager: BatchManager<u32> = ManagerBuilder::new()
        .mode(mode)
        .max_retries(0)
        .registry(&registry)
        .reporter(reporter.clone())
        .build()
        .unwrap();
    for n in 0..3u32 {
        manager
            .submit(Task::call(move || {
                async move {
                    sleep(Duration::from_millis(100)).await;
                    if n == 1 {
                        Err::<u32, TaskError>("late failure".into())
                    } else {
                        Ok(n)
                    }
                }
            }))
            .await
            .unwrap();
    }

    manager.retire();
    manager.retire();
    assert!(!manager.is_active());
    assert!(registry.is_empty());
    assert_eq!(manager.pending_len(), 0);
    assert_eq!(manager.errored_len(), 0);

    sleep(Duration::from_millis(1000)).await;
    assert_eq!(manager.results_len(), 0);
    assert_eq!(reporter.count(), 0);

    let err = manager
        .submit(Task::call(|| async { Ok::<_, TaskError>(0) }))
        .await
        .unwrap_err();
    assert!(matches!(err, BatchError::Retired(_)));
}
