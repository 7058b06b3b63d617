//! Poll loop behavior against scripted gateway responses, on paused time.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bridge_traits::{
    BridgeError, HttpClient, HttpRequest, HttpResponse, ResourceKey, ResourceStatus, Service,
    Status,
};
use core_resource::{
    GatewayClient, PollConfig, RequestQueue, ResourceError, StatusProbe, StatusResolver,
};
use core_runtime::events::{CoreEvent, EventBus, StatusEvent};
use parking_lot::Mutex;
use tokio::time::Instant;

struct NoHttp;

#[async_trait]
impl HttpClient for NoHttp {
    async fn execute(&self, _request: HttpRequest) -> Result<HttpResponse, BridgeError> {
        Err(BridgeError::NotAvailable("no network in tests".to_string()))
    }
}

/// Replays statuses in order, then repeats the last one.
struct ScriptedProbe {
    script: Mutex<VecDeque<ResourceStatus>>,
    last: Mutex<Option<ResourceStatus>>,
    checks: Mutex<Vec<(bool, Instant)>>,
    rebuilds: AtomicUsize,
}

impl ScriptedProbe {
    fn new(script: Vec<ResourceStatus>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script.into()),
            last: Mutex::new(None),
            checks: Mutex::new(Vec::new()),
            rebuilds: AtomicUsize::new(0),
        })
    }

    fn builds(&self) -> Vec<bool> {
        self.checks.lock().iter().map(|(build, _)| *build).collect()
    }

    fn check_count(&self) -> usize {
        self.checks.lock().len()
    }

    fn rebuilds(&self) -> usize {
        self.rebuilds.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl StatusProbe for ScriptedProbe {
    async fn status(&self, _key: &ResourceKey, build: bool) -> core_resource::Result<ResourceStatus> {
        self.checks.lock().push((build, Instant::now()));
        let next = self.script.lock().pop_front();
        let mut last = self.last.lock();
        if let Some(next) = next {
            *last = Some(next);
        }
        last.clone().ok_or_else(|| {
            ResourceError::Bridge(BridgeError::OperationFailed("gateway unreachable".to_string()))
        })
    }

    async fn rebuild(&self, _key: &ResourceKey) -> core_resource::Result<()> {
        self.rebuilds.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

fn clip() -> ResourceKey {
    ResourceKey::new(Service::Video, "alice", "clip1")
}

fn status(status: Status, percent: f64) -> ResourceStatus {
    ResourceStatus {
        percent_loaded: percent,
        ..ResourceStatus::new(status)
    }
}

fn resolver(probe: Arc<ScriptedProbe>) -> StatusResolver {
    let gateway = GatewayClient::new(Arc::new(NoHttp), "http://127.0.0.1:12391");
    StatusResolver::new(probe, gateway, RequestQueue::new("status", 5))
}

#[tokio::test(start_paused = true)]
async fn test_resolver_follows_gateway_to_ready_and_stops() {
    let probe = ScriptedProbe::new(vec![
        status(Status::Searching, 0.0),
        status(Status::Downloading, 10.0),
        status(Status::Downloading, 40.0),
        status(Status::Downloading, 70.0),
        status(Status::Ready, 100.0),
    ]);
    let bus = EventBus::new(64);
    let mut events = bus.subscribe();
    let resolver = resolver(Arc::clone(&probe)).with_event_bus(bus);

    let mut handle = resolver.track(clip());
    assert_eq!(
        handle.resource_url(),
        "http://127.0.0.1:12391/arbitrary/VIDEO/alice/clip1"
    );
    assert!(!handle.is_ready());

    let mut seen = Vec::new();
    while let Some(current) = handle.changed().await {
        assert_eq!(handle.is_ready(), current.status == Status::Ready);
        assert!(!handle.resource_url().is_empty());
        seen.push((current.status, current.percent_loaded));
        if current.status.is_terminal() {
            break;
        }
    }
    assert_eq!(
        seen,
        vec![
            (Status::Searching, 0.0),
            (Status::Downloading, 10.0),
            (Status::Downloading, 40.0),
            (Status::Downloading, 70.0),
            (Status::Ready, 100.0),
        ]
    );
    assert_eq!(probe.builds(), vec![true, false, false, false, false]);

    let checks = probe.check_count();
    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(probe.check_count(), checks);
    assert!(!resolver.is_polling(&clip()));
    assert_eq!(resolver.status(&clip()).map(|s| s.status), Some(Status::Ready));
    assert!(handle.is_ready());

    let mut ready_events = 0;
    while let Ok(event) = events.try_recv() {
        if matches!(event, CoreEvent::Status(StatusEvent::Ready { .. })) {
            ready_events += 1;
        }
    }
    assert_eq!(ready_events, 1);
}

#[tokio::test(start_paused = true)]
async fn test_stalled_progress_refetches_after_delay() {
    let probe = ScriptedProbe::new(vec![status(Status::Downloading, 40.0)]);
    let resolver = resolver(Arc::clone(&probe));
    let mut handle = resolver.track(clip());

    loop {
        let current = handle.changed().await.expect("resolver alive");
        if current.status == Status::Refetching {
            break;
        }
    }
    let paused_at = Instant::now();
    assert_eq!(probe.check_count(), 6);
    assert_eq!(probe.rebuilds(), 0);

    let resumed = handle.changed().await.expect("resolver alive");
    assert_eq!(resumed.status, Status::Downloading);
    assert!(paused_at.elapsed() >= Duration::from_secs(25));
    assert_eq!(probe.rebuilds(), 1);
    assert_eq!(probe.builds().last(), Some(&true));
}

#[tokio::test(start_paused = true)]
async fn test_retry_budget_ends_in_failed_to_download() {
    let probe = ScriptedProbe::new(Vec::new());
    let resolver = resolver(Arc::clone(&probe)).with_poll_configs(
        PollConfig::scoped().with_retry_attempts(3),
        PollConfig::global(),
    );

    let mut handle = resolver.track(clip());
    let terminal = handle.wait_terminal().await;
    assert_eq!(terminal.status, Status::FailedToDownload);
    assert_eq!(probe.check_count(), 4);

    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(probe.check_count(), 4);

    // a failed key stays failed until restarted
    let again = resolver.track(clip());
    assert_eq!(again.status().status, Status::FailedToDownload);
    assert!(!resolver.is_polling(&clip()));

    resolver.restart(&clip());
    assert!(resolver.is_polling(&clip()));
}

#[tokio::test(start_paused = true)]
async fn test_dropping_last_handle_stops_polling() {
    let probe = ScriptedProbe::new(vec![status(Status::Searching, 0.0)]);
    let resolver = resolver(Arc::clone(&probe));

    let first = resolver.track(clip());
    let second = resolver.track(clip());
    tokio::time::sleep(Duration::from_secs(12)).await;
    let polled = probe.check_count();
    assert_eq!(polled, 3);

    drop(first);
    tokio::time::sleep(Duration::from_secs(10)).await;
    assert!(probe.check_count() > polled);

    drop(second);
    tokio::time::sleep(Duration::from_millis(1)).await;
    let stopped_at = probe.check_count();
    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(probe.check_count(), stopped_at);
    assert!(!resolver.is_polling(&clip()));
}

#[tokio::test(start_paused = true)]
async fn test_background_download_outlives_handles() {
    let probe = ScriptedProbe::new(vec![
        status(Status::Downloading, 50.0),
        status(Status::Ready, 100.0),
    ]);
    let resolver = resolver(Arc::clone(&probe));

    drop(resolver.track(clip()));
    resolver.download(clip());
    assert!(resolver.is_polling(&clip()));

    tokio::time::sleep(Duration::from_secs(20)).await;
    assert_eq!(resolver.status(&clip()).map(|s| s.status), Some(Status::Ready));
    assert!(!resolver.is_polling(&clip()));

    let checks = probe.check_count();
    resolver.download(clip());
    tokio::time::sleep(Duration::from_secs(20)).await;
    assert_eq!(probe.check_count(), checks);
}

#[tokio::test(start_paused = true)]
async fn test_downloaded_triggers_immediate_build_check() {
    let probe = ScriptedProbe::new(vec![
        status(Status::Searching, 0.0),
        status(Status::Downloaded, 100.0),
        status(Status::Ready, 100.0),
    ]);
    let resolver = resolver(Arc::clone(&probe));
    let mut handle = resolver.track(clip());

    assert_eq!(handle.wait_terminal().await.status, Status::Ready);

    let checks = probe.checks.lock().clone();
    assert_eq!(checks.len(), 3);
    assert!(checks[2].0, "check after DOWNLOADED must request a build");
    assert_eq!(checks[2].1, checks[1].1);
    assert_eq!(checks[1].1 - checks[0].1, Duration::from_secs(5));
}

#[test]
fn test_tracking_outside_runtime_does_not_poll() {
    let probe = ScriptedProbe::new(vec![status(Status::Ready, 100.0)]);
    let resolver = resolver(Arc::clone(&probe));

    let handle = resolver.track(clip());
    resolver.download(clip());

    assert!(!resolver.is_polling(&clip()));
    assert_eq!(handle.status().status, Status::Initial);
    assert_eq!(probe.check_count(), 0);
}
