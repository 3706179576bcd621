use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use mapprobe_core::{BoxError, CancellationToken, ConditionPoller, Error, PollSpec, ResourceAccessor};
use tokio::time::{sleep, Instant};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn poller(interval_secs: u64, timeout_secs: u64) -> (ConditionPoller, CancellationToken) {
    let cancel = CancellationToken::new();
    let spec = PollSpec::new(
        Duration::from_secs(interval_secs),
        Duration::from_secs(timeout_secs),
    )
    .expect("valid spec");
    let poller = ConditionPoller::new(spec, cancel.clone()).expect("poller");
    (poller, cancel)
}

/// Accessor over a scripted sequence of states; the last state repeats.
struct ScriptedAccessor {
    states: Mutex<Vec<&'static str>>,
    gets: AtomicU32,
}

impl ScriptedAccessor {
    fn new(states: Vec<&'static str>) -> Self {
        Self {
            states: Mutex::new(states),
            gets: AtomicU32::new(0),
        }
    }
}

#[async_trait]
impl ResourceAccessor for ScriptedAccessor {
    type State = &'static str;

    async fn get(&self, id: &str) -> Result<Self::State, BoxError> {
        self.gets.fetch_add(1, Ordering::SeqCst);
        if id == "missing" {
            return Err(format!("domainmappings {:?} not found", id).into());
        }
        let mut states = self.states.lock().unwrap();
        if states.len() > 1 {
            Ok(states.remove(0))
        } else {
            Ok(states[0])
        }
    }

    fn is_ready(&self, state: &Self::State) -> bool {
        *state == "Ready"
    }

    fn describe(&self, state: &Self::State) -> String {
        format!("phase={}", state)
    }
}

// ---------------------------------------------------------------------------
// poll
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn ready_after_n_intervals_takes_n_plus_one_evaluations() {
    let (poller, _cancel) = poller(1, 60);
    let count = Arc::new(AtomicU32::new(0));
    let c = count.clone();
    let start = Instant::now();

    poller
        .poll("eventually-ready", move || {
            let c = c.clone();
            async move { Ok::<_, BoxError>(c.fetch_add(1, Ordering::SeqCst) + 1 >= 4) }
        })
        .await
        .expect("ready");

    assert_eq!(count.load(Ordering::SeqCst), 4);
    let elapsed = start.elapsed();
    assert!(elapsed >= Duration::from_secs(3), "elapsed {:?}", elapsed);
    assert!(elapsed < Duration::from_secs(4), "elapsed {:?}", elapsed);
}

#[tokio::test(start_paused = true)]
async fn never_ready_times_out_within_one_interval_of_deadline() {
    let (poller, _cancel) = poller(2, 7);
    let count = Arc::new(AtomicU32::new(0));
    let c = count.clone();
    let start = Instant::now();

    let err = poller
        .poll("never-ready", move || {
            let c = c.clone();
            async move {
                c.fetch_add(1, Ordering::SeqCst);
                Ok::<_, BoxError>(false)
            }
        })
        .await
        .unwrap_err();

    let elapsed = start.elapsed();
    assert!(err.is_timeout(), "unexpected error: {}", err);
    assert!(elapsed >= Duration::from_secs(7));
    assert!(elapsed <= Duration::from_secs(9));
    // t = 0, 2, 4, 6 and a final check at the deadline.
    assert_eq!(count.load(Ordering::SeqCst), 5);
    assert!(err.to_string().contains("never-ready"));
}

#[tokio::test(start_paused = true)]
async fn predicate_error_is_terminal_and_immediate() {
    let (poller, _cancel) = poller(1, 60);
    let count = Arc::new(AtomicU32::new(0));
    let c = count.clone();
    let start = Instant::now();

    let err = poller
        .poll("broken", move || {
            let c = c.clone();
            async move {
                c.fetch_add(1, Ordering::SeqCst);
                Err::<bool, _>(std::io::Error::new(
                    std::io::ErrorKind::PermissionDenied,
                    "forbidden",
                ))
            }
        })
        .await
        .unwrap_err();

    assert_eq!(start.elapsed(), Duration::ZERO);
    assert_eq!(count.load(Ordering::SeqCst), 1);
    match err {
        Error::Predicate { target, source, .. } => {
            assert_eq!(target, "broken");
            assert!(source.to_string().contains("forbidden"));
        }
        other => panic!("expected predicate error, got {}", other),
    }
}

#[tokio::test(start_paused = true)]
async fn cancel_during_interval_returns_promptly() {
    let (poller, cancel) = poller(60, 600);
    let start = Instant::now();

    tokio::spawn(async move {
        sleep(Duration::from_millis(100)).await;
        cancel.cancel();
    });

    let err = poller
        .poll("slow", || async { Ok::<_, BoxError>(false) })
        .await
        .unwrap_err();

    assert!(err.is_cancelled(), "unexpected error: {}", err);
    assert!(start.elapsed() < Duration::from_secs(1));
}

#[tokio::test(start_paused = true)]
async fn cancel_during_hanging_predicate_returns_promptly() {
    let (poller, cancel) = poller(1, 600);
    let start = Instant::now();

    tokio::spawn(async move {
        sleep(Duration::from_millis(50)).await;
        cancel.cancel();
    });

    let err = poller
        .poll("hanging", || std::future::pending::<Result<bool, BoxError>>())
        .await
        .unwrap_err();

    assert!(err.is_cancelled());
    assert!(start.elapsed() < Duration::from_secs(1));
}

#[tokio::test(start_paused = true)]
async fn already_cancelled_token_fails_before_evaluating() {
    let (poller, cancel) = poller(1, 10);
    cancel.cancel();
    let count = Arc::new(AtomicU32::new(0));
    let c = count.clone();

    let err = poller
        .poll("cancelled", move || {
            let c = c.clone();
            async move {
                c.fetch_add(1, Ordering::SeqCst);
                Ok::<_, BoxError>(true)
            }
        })
        .await
        .unwrap_err();

    assert!(err.is_cancelled());
    assert_eq!(count.load(Ordering::SeqCst), 0);
}

#[tokio::test(start_paused = true)]
async fn hanging_predicate_is_abandoned_at_deadline() {
    let (poller, _cancel) = poller(1, 5);
    let start = Instant::now();

    let err = poller
        .poll("stuck", || std::future::pending::<Result<bool, BoxError>>())
        .await
        .unwrap_err();

    assert!(err.is_timeout());
    assert_eq!(start.elapsed(), Duration::from_secs(5));
}

// ---------------------------------------------------------------------------
// wait_for_ready
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn wait_for_ready_follows_accessor_state() {
    let (poller, _cancel) = poller(1, 30);
    let accessor = ScriptedAccessor::new(vec!["Pending", "Pending", "Ready"]);

    poller
        .wait_for_ready(&accessor, "hello.example.org")
        .await
        .expect("ready");

    assert_eq!(accessor.gets.load(Ordering::SeqCst), 3);
}

#[tokio::test(start_paused = true)]
async fn wait_for_ready_timeout_reports_last_state() {
    let (poller, _cancel) = poller(1, 3);
    let accessor = ScriptedAccessor::new(vec!["Pending", "DomainClaimNotOwned"]);

    let err = poller
        .wait_for_ready(&accessor, "hello.example.org")
        .await
        .unwrap_err();

    match err {
        Error::Timeout {
            target,
            last_observed,
            ..
        } => {
            assert_eq!(target, "hello.example.org");
            assert_eq!(last_observed, "phase=DomainClaimNotOwned");
        }
        other => panic!("expected timeout, got {}", other),
    }
}

#[tokio::test(start_paused = true)]
async fn wait_for_ready_accessor_error_is_not_retried() {
    let (poller, _cancel) = poller(1, 30);
    let accessor = ScriptedAccessor::new(vec!["Ready"]);

    let err = poller.wait_for_ready(&accessor, "missing").await.unwrap_err();

    assert!(matches!(err, Error::Predicate { .. }));
    assert!(err.to_string().contains("not found"));
    assert_eq!(accessor.gets.load(Ordering::SeqCst), 1);
}
