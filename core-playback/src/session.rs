//! One playback session: exactly one of the direct-append path or the range
//! proxy path is live at a time.

use std::sync::Arc;

use bridge_traits::ResourceKey;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::config::StreamingStats;
use crate::error::{PlaybackError, Result};
use crate::proxy::RangeProxy;
use crate::sink::MediaSink;
use crate::streaming::{EncryptedStreamService, StreamRequest};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackPath {
    /// Decrypted ranges are appended to a [`MediaSink`].
    Direct,
    /// A [`RangeProxy`] answers requests for a virtual URL.
    Proxy,
}

enum ActivePath {
    Idle,
    Direct {
        token: CancellationToken,
        task: JoinHandle<Result<StreamingStats>>,
    },
    Proxy(Arc<RangeProxy>),
}

pub struct PlaybackSession {
    key: ResourceKey,
    active: Mutex<ActivePath>,
}

impl PlaybackSession {
    pub fn new(key: ResourceKey) -> Self {
        Self {
            key,
            active: Mutex::new(ActivePath::Idle),
        }
    }

    pub fn key(&self) -> &ResourceKey {
        &self.key
    }

    pub fn active_path(&self) -> Option<PlaybackPath> {
        match &*self.active.lock() {
            ActivePath::Idle => None,
            ActivePath::Direct { .. } => Some(PlaybackPath::Direct),
            ActivePath::Proxy(_) => Some(PlaybackPath::Proxy),
        }
    }

    /// Start streaming into `sink`, replacing whatever path was active.
    pub fn start_direct(
        &self,
        service: Arc<EncryptedStreamService>,
        request: StreamRequest,
        sink: Arc<dyn MediaSink>,
    ) -> Result<()> {
        self.check_key(&request.key)?;
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| PlaybackError::SessionError(format!("no async runtime: {}", e)))?;

        let token = CancellationToken::new();
        let run_token = token.clone();
        let task = runtime.spawn(async move { service.run(request, sink, run_token).await });

        let previous = std::mem::replace(&mut *self.active.lock(), ActivePath::Direct { token, task });
        Self::teardown(previous);
        info!(key = %self.key, "Direct playback started");
        Ok(())
    }

    /// Serve through `proxy`, replacing whatever path was active.
    pub fn attach_proxy(&self, proxy: Arc<RangeProxy>) -> Result<()> {
        self.check_key(proxy.key())?;
        let previous = std::mem::replace(&mut *self.active.lock(), ActivePath::Proxy(proxy));
        Self::teardown(previous);
        info!(key = %self.key, "Proxy playback attached");
        Ok(())
    }

    pub fn proxy(&self) -> Option<Arc<RangeProxy>> {
        match &*self.active.lock() {
            ActivePath::Proxy(proxy) => Some(Arc::clone(proxy)),
            _ => None,
        }
    }

    /// Wait for the direct stream to finish. `None` when the direct path is
    /// not active. The session is idle afterwards.
    pub async fn finished(&self) -> Option<Result<StreamingStats>> {
        let task = {
            let mut active = self.active.lock();
            match std::mem::replace(&mut *active, ActivePath::Idle) {
                ActivePath::Direct { task, .. } => task,
                other => {
                    *active = other;
                    return None;
                }
            }
        };
        Some(match task.await {
            Ok(result) => result,
            Err(e) => Err(PlaybackError::SessionError(format!("stream task failed: {}", e))),
        })
    }

    pub fn stop(&self) {
        let previous = std::mem::replace(&mut *self.active.lock(), ActivePath::Idle);
        Self::teardown(previous);
    }

    fn check_key(&self, key: &ResourceKey) -> Result<()> {
        if *key != self.key {
            return Err(PlaybackError::SessionError(format!(
                "session for {} cannot play {}",
                self.key, key
            )));
        }
        Ok(())
    }

    fn teardown(path: ActivePath) {
        match path {
            ActivePath::Idle => {}
            ActivePath::Direct { token, task } => {
                debug!("Stopping direct stream");
                token.cancel();
                drop(task);
            }
            ActivePath::Proxy(proxy) => {
                debug!(path = %proxy.virtual_path(), "Releasing range proxy");
            }
        }
    }
}

impl Drop for PlaybackSession {
    fn drop(&mut self) {
        self.stop();
    }
}
