use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use bridge_traits::{ResourceKey, ResourceStatus, Status};
use core_runtime::events::{CoreEvent, EventBus, StatusEvent};
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use super::machine::{PollState, PollStep};
use crate::config::PollConfig;
use crate::error::Result;
use crate::gateway::GatewayClient;
use crate::queue::RequestQueue;

/// Source of status snapshots for the poll loop.
#[async_trait]
pub trait StatusProbe: Send + Sync {
    async fn status(&self, key: &ResourceKey, build: bool) -> Result<ResourceStatus>;

    /// Make the node rebuild the resource after a stall.
    async fn rebuild(&self, key: &ResourceKey) -> Result<()>;
}

#[async_trait]
impl StatusProbe for GatewayClient {
    async fn status(&self, key: &ResourceKey, build: bool) -> Result<ResourceStatus> {
        GatewayClient::status(self, key, build).await
    }

    async fn rebuild(&self, key: &ResourceKey) -> Result<()> {
        self.properties(key).await.map(|_| ())
    }
}

struct ActiveLoop {
    id: u64,
    token: CancellationToken,
    global: bool,
}

struct ResolverInner {
    probe: Arc<dyn StatusProbe>,
    gateway: GatewayClient,
    queue: RequestQueue,
    scoped_config: PollConfig,
    global_config: PollConfig,
    channels: Mutex<HashMap<ResourceKey, watch::Sender<ResourceStatus>>>,
    loops: Mutex<HashMap<ResourceKey, ActiveLoop>>,
    trackers: Mutex<HashMap<ResourceKey, Weak<TrackGuard>>>,
    next_loop_id: AtomicU64,
    event_bus: Option<EventBus>,
}

/// Polls resource status until each key is servable.
///
/// At most one poll loop runs per key. Loops started through
/// [`track`](Self::track) stop when the last [`StatusHandle`] for the key is
/// dropped; loops started through [`download`](Self::download) run until the
/// resource is ready or fails.
#[derive(Clone)]
pub struct StatusResolver {
    inner: Arc<ResolverInner>,
}

impl StatusResolver {
    pub fn new(probe: Arc<dyn StatusProbe>, gateway: GatewayClient, queue: RequestQueue) -> Self {
        Self {
            inner: Arc::new(ResolverInner {
                probe,
                gateway,
                queue,
                scoped_config: PollConfig::scoped(),
                global_config: PollConfig::global(),
                channels: Mutex::new(HashMap::new()),
                loops: Mutex::new(HashMap::new()),
                trackers: Mutex::new(HashMap::new()),
                next_loop_id: AtomicU64::new(1),
                event_bus: None,
            }),
        }
    }

    /// Override poll cadence. Must be called before the resolver is shared.
    pub fn with_poll_configs(mut self, scoped: PollConfig, global: PollConfig) -> Self {
        if let Some(inner) = Arc::get_mut(&mut self.inner) {
            inner.scoped_config = scoped;
            inner.global_config = global;
        }
        self
    }

    pub fn with_event_bus(mut self, event_bus: EventBus) -> Self {
        if let Some(inner) = Arc::get_mut(&mut self.inner) {
            inner.event_bus = Some(event_bus);
        }
        self
    }

    /// Last known status, if the key was ever polled.
    pub fn status(&self, key: &ResourceKey) -> Option<ResourceStatus> {
        self.inner
            .channels
            .lock()
            .get(key)
            .map(|tx| tx.borrow().clone())
    }

    pub fn is_polling(&self, key: &ResourceKey) -> bool {
        self.inner.loops.lock().contains_key(key)
    }

    /// Watch `key`, polling while at least one handle is alive.
    ///
    /// Terminal statuses are served from cache without polling; use
    /// [`restart`](Self::restart) to poll a failed key again.
    #[instrument(skip(self, key), fields(key = %key))]
    pub fn track(&self, key: ResourceKey) -> StatusHandle {
        let rx = self.inner.channel(&key).subscribe();

        let guard = {
            let mut trackers = self.inner.trackers.lock();
            match trackers.get(&key).and_then(Weak::upgrade) {
                Some(guard) => guard,
                None => {
                    let guard = Arc::new(TrackGuard {
                        key: key.clone(),
                        inner: Arc::downgrade(&self.inner),
                    });
                    trackers.insert(key.clone(), Arc::downgrade(&guard));
                    guard
                }
            }
        };

        if !rx.borrow().status.is_terminal() {
            self.inner.start_loop(&key, false);
        }

        StatusHandle {
            resource_url: self.inner.gateway.resource_url(&key),
            key,
            rx,
            _guard: guard,
        }
    }

    /// Background download independent of any handle. A no-op for keys
    /// already ready, apart from stopping stray loops.
    #[instrument(skip(self, key), fields(key = %key))]
    pub fn download(&self, key: ResourceKey) {
        let current = self.inner.channel(&key).borrow().status;
        if current == Status::Ready {
            self.inner.stop_loop(&key, true);
            return;
        }
        if current == Status::FailedToDownload {
            debug!("Key previously failed; restart it to download again");
            return;
        }
        self.inner.start_loop(&key, true);
    }

    pub fn cancel_download(&self, key: &ResourceKey) {
        let mut loops = self.inner.loops.lock();
        if loops.get(key).is_some_and(|active| active.global) {
            if let Some(active) = loops.remove(key) {
                active.token.cancel();
            }
        }
    }

    /// Forget the cached status of `key` and poll it again if it is tracked.
    pub fn restart(&self, key: &ResourceKey) {
        self.inner.stop_loop(key, true);
        self.inner.set_status(key, ResourceStatus::new(Status::Initial));

        let tracked = self
            .inner
            .trackers
            .lock()
            .get(key)
            .is_some_and(|weak| weak.strong_count() > 0);
        if tracked {
            self.inner.start_loop(key, false);
        }
    }

    /// Stop every loop. Cached statuses are kept.
    pub fn shutdown(&self) {
        let loops: Vec<ActiveLoop> = self.inner.loops.lock().drain().map(|(_, l)| l).collect();
        for active in loops {
            active.token.cancel();
        }
    }
}

impl ResolverInner {
    fn channel(&self, key: &ResourceKey) -> watch::Sender<ResourceStatus> {
        self.channels
            .lock()
            .entry(key.clone())
            .or_insert_with(|| watch::channel(ResourceStatus::new(Status::Initial)).0)
            .clone()
    }

    fn emit(&self, event: StatusEvent) {
        if let Some(bus) = &self.event_bus {
            let _ = bus.emit(CoreEvent::Status(event));
        }
    }

    /// Store `status`, notifying watchers only when it differs.
    fn set_status(&self, key: &ResourceKey, status: ResourceStatus) {
        let changed = self.channel(key).send_if_modified(|current| {
            if *current == status {
                false
            } else {
                *current = status.clone();
                true
            }
        });
        if changed {
            self.emit(StatusEvent::Changed {
                key: key.clone(),
                status: status.status,
                percent_loaded: status.percent_loaded,
                local_chunk_count: status.local_chunk_count,
                total_chunk_count: status.total_chunk_count,
            });
        }
    }

    /// Spawn a poll loop on the current runtime. Outside a runtime nothing
    /// is started and the key keeps its cached status.
    fn start_loop(self: &Arc<Self>, key: &ResourceKey, global: bool) {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!(key = %key, "No async runtime, status polling not started");
            return;
        };
        let mut loops = self.loops.lock();
        if let Some(existing) = loops.get(key) {
            if !global || existing.global {
                return;
            }
            // A background download outlives the scoped loop it replaces.
            existing.token.cancel();
        }

        let id = self.next_loop_id.fetch_add(1, Ordering::Relaxed);
        let token = CancellationToken::new();
        loops.insert(
            key.clone(),
            ActiveLoop {
                id,
                token: token.clone(),
                global,
            },
        );
        drop(loops);

        let config = if global {
            self.global_config.clone()
        } else {
            self.scoped_config.clone()
        };
        let inner = Arc::clone(self);
        let key = key.clone();
        debug!(key = %key, global, "Starting status poll loop");
        runtime.spawn(async move {
            inner.poll(&key, &token, config).await;
            inner.finish_loop(&key, id);
        });
    }

    fn stop_loop(&self, key: &ResourceKey, include_global: bool) {
        let mut loops = self.loops.lock();
        let stop = loops
            .get(key)
            .is_some_and(|active| include_global || !active.global);
        if stop {
            if let Some(active) = loops.remove(key) {
                active.token.cancel();
            }
        }
    }

    fn finish_loop(&self, key: &ResourceKey, id: u64) {
        let mut loops = self.loops.lock();
        if loops.get(key).is_some_and(|active| active.id == id) {
            loops.remove(key);
        }
    }

    async fn check(&self, key: &ResourceKey, build: bool) -> Option<ResourceStatus> {
        let probe = Arc::clone(&self.probe);
        let queued_key = key.clone();
        let result = self
            .queue
            .enqueue(move || async move { probe.status(&queued_key, build).await })
            .await;
        match result {
            Ok(Ok(status)) => Some(status),
            Ok(Err(e)) => {
                warn!(key = %key, error = %e, "Status check failed");
                None
            }
            Err(e) => {
                warn!(key = %key, error = %e, "Status check dropped");
                None
            }
        }
    }

    async fn poll(&self, key: &ResourceKey, token: &CancellationToken, config: PollConfig) {
        if token.is_cancelled() {
            return;
        }
        let mut state = PollState::new(&config);
        self.set_status(key, ResourceStatus::new(Status::Searching));

        loop {
            let build = state.next_check_builds();
            let observed = tokio::select! {
                biased;
                _ = token.cancelled() => return,
                observed = self.check(key, build) => observed,
            };

            let step = match observed {
                Some(status) => {
                    self.set_status(key, status.clone());
                    state.observe(&status)
                }
                None => state.record_failure(),
            };

            match step {
                PollStep::Ready => {
                    let status = self.channel(key).borrow().clone();
                    info!(key = %key, "Resource ready");
                    self.emit(StatusEvent::Ready {
                        key: key.clone(),
                        path: status.path,
                        filename: status.filename,
                    });
                    return;
                }
                PollStep::Failed => {
                    let current = self.channel(key).borrow().clone();
                    self.set_status(key, current.with_status(Status::FailedToDownload));
                    error!(key = %key, attempts = state.attempts(), "Giving up on resource download");
                    self.emit(StatusEvent::Failed {
                        key: key.clone(),
                        message: format!("no progress after {} status checks", state.attempts()),
                    });
                    return;
                }
                PollStep::CheckNow => continue,
                PollStep::Refetch => {
                    let current = self.channel(key).borrow().clone();
                    self.set_status(key, current.with_status(Status::Refetching));
                    warn!(key = %key, percent = current.percent_loaded, "Download stalled, refetching");
                    self.emit(StatusEvent::Refetching { key: key.clone() });

                    tokio::select! {
                        biased;
                        _ = token.cancelled() => return,
                        _ = tokio::time::sleep(config.refetch_delay) => {}
                    }
                    if let Err(e) = self.probe.rebuild(key).await {
                        warn!(key = %key, error = %e, "Forced rebuild failed");
                    }
                    continue;
                }
                PollStep::Continue => {}
            }

            tokio::select! {
                biased;
                _ = token.cancelled() => return,
                _ = tokio::time::sleep(config.interval) => {}
            }
        }
    }
}

/// Keeps a scoped poll loop alive.
struct TrackGuard {
    key: ResourceKey,
    inner: Weak<ResolverInner>,
}

impl Drop for TrackGuard {
    fn drop(&mut self) {
        if let Some(inner) = self.inner.upgrade() {
            inner.stop_loop(&self.key, false);
            let mut trackers = inner.trackers.lock();
            if trackers
                .get(&self.key)
                .is_some_and(|weak| weak.strong_count() == 0)
            {
                trackers.remove(&self.key);
            }
        }
    }
}

/// A consumer's view of one resource's status.
pub struct StatusHandle {
    key: ResourceKey,
    resource_url: String,
    rx: watch::Receiver<ResourceStatus>,
    _guard: Arc<TrackGuard>,
}

impl StatusHandle {
    pub fn key(&self) -> &ResourceKey {
        &self.key
    }

    pub fn status(&self) -> ResourceStatus {
        self.rx.borrow().clone()
    }

    pub fn is_ready(&self) -> bool {
        self.rx.borrow().status == Status::Ready
    }

    /// Gateway URL of the resource, available whatever the status.
    pub fn resource_url(&self) -> &str {
        &self.resource_url
    }

    /// Wait for the next status change.
    pub async fn changed(&mut self) -> Option<ResourceStatus> {
        self.rx.changed().await.ok()?;
        Some(self.rx.borrow_and_update().clone())
    }

    /// Wait until the status is `READY` or `FAILED_TO_DOWNLOAD`.
    pub async fn wait_terminal(&mut self) -> ResourceStatus {
        loop {
            let current = self.rx.borrow_and_update().clone();
            if current.status.is_terminal() {
                return current;
            }
            if self.rx.changed().await.is_err() {
                return current;
            }
        }
    }
}
