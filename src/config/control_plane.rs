use std::sync::{Arc, PoisonError, RwLock};

use smol_str::SmolStr;
use tracing::{debug, info, warn};

use crate::xds::{DiscoveryClient, DiscoveryError};

use super::{diff, ConfigSource, ConfigValue, Event, RefreshScheduler, Snapshot, SourceError, Wakeup};

/// Turns what the control plane knows into a snapshot of keyed config.
#[tonic::async_trait]
pub trait Pull: Send + Sync {
    /// Build a fresh snapshot. `previous` is the last snapshot that was
    /// pulled successfully, for keys that can't be rebuilt this time around.
    async fn pull(
        &self,
        client: &DiscoveryClient,
        previous: &Snapshot,
    ) -> Result<Snapshot, DiscoveryError>;
}

/// A [ConfigSource] that polls the control plane.
///
/// Every refresh pulls a full snapshot, diffs it against the last one that
/// was pulled successfully, and reports the difference. A failed pull
/// reports nothing and leaves the last snapshot in place.
///
/// Pulls are serialized, and changes are reported before the next pull
/// starts, so whoever is listening sees every transition once and in order.
pub struct ControlPlaneSource<P> {
    name: SmolStr,
    priority: i32,
    client: Arc<DiscoveryClient>,
    pull: P,
    current: RwLock<Snapshot>,
    pulling: tokio::sync::Mutex<()>,
    scheduler: tokio::sync::Mutex<RefreshScheduler>,
}

impl<P: Pull> ControlPlaneSource<P> {
    pub fn new(
        name: impl Into<SmolStr>,
        priority: i32,
        client: Arc<DiscoveryClient>,
        pull: P,
        scheduler: RefreshScheduler,
    ) -> Self {
        Self {
            name: name.into(),
            priority,
            client,
            pull,
            current: RwLock::new(Snapshot::new()),
            pulling: tokio::sync::Mutex::new(()),
            scheduler: tokio::sync::Mutex::new(scheduler),
        }
    }

    async fn pull_snapshot(&self) -> Result<Snapshot, SourceError> {
        let _timer = crate::metrics::scoped_timer!("config.refresh_time", "source" => self.name.to_string());
        let previous = self
            .current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        Ok(self.pull.pull(&self.client, &previous).await?)
    }

    fn replace(&self, snapshot: Snapshot) -> Snapshot {
        let mut current = self.current.write().unwrap_or_else(PoisonError::into_inner);
        std::mem::replace(&mut *current, snapshot)
    }

    /// Pull a new snapshot and return everything that changed since the last
    /// one.
    ///
    /// The caller is responsible for applying the events. Use
    /// [ConfigSource::sync_changes] when another task may be refreshing this
    /// source at the same time.
    pub async fn refresh(&self) -> Result<Vec<Event>, SourceError> {
        let _pulling = self.pulling.lock().await;
        self.refresh_locked().await
    }

    /// Refresh and hand every change to `callback` before anyone else gets
    /// to pull.
    async fn refresh_with(
        &self,
        callback: &(dyn Fn(Event) + Send + Sync),
    ) -> Result<usize, SourceError> {
        let _pulling = self.pulling.lock().await;
        let events = self.refresh_locked().await?;

        let count = events.len();
        for event in events {
            callback(event);
        }
        Ok(count)
    }

    async fn refresh_locked(&self) -> Result<Vec<Event>, SourceError> {
        let snapshot = self.pull_snapshot().await?;
        let old = self.replace(snapshot.clone());
        let events = diff(&self.name, &old, &snapshot);

        for event in &events {
            metrics::counter!(
                "config.events",
                "source" => self.name.to_string(),
                "kind" => event.kind().as_str()
            )
            .increment(1);
        }

        Ok(events)
    }
}

#[tonic::async_trait]
impl<P: Pull> ConfigSource for ControlPlaneSource<P> {
    fn name(&self) -> &str {
        &self.name
    }

    fn priority(&self) -> i32 {
        self.priority
    }

    async fn configurations(&self) -> Result<Snapshot, SourceError> {
        let _pulling = self.pulling.lock().await;
        let snapshot = self.pull_snapshot().await?;
        self.replace(snapshot.clone());
        Ok(snapshot)
    }

    fn configuration_by_key(&self, key: &str) -> Result<Arc<ConfigValue>, SourceError> {
        let current = self.current.read().unwrap_or_else(PoisonError::into_inner);
        current
            .get(key)
            .cloned()
            .ok_or_else(|| SourceError::NotFound(key.to_string()))
    }

    async fn dynamic_config_handler(&self, callback: &(dyn Fn(Event) + Send + Sync)) {
        let mut scheduler = self.scheduler.lock().await;

        loop {
            let wakeup = scheduler.wait().await;
            if let Wakeup::Signal(key) = &wakeup {
                debug!(source = %self.name, key, "refresh requested");
            }

            match self.refresh_with(callback).await {
                Ok(events) => debug!(source = %self.name, events, "refreshed"),
                Err(e) if e.is_connection_error() => {
                    info!(source = %self.name, err = %e, "control plane unavailable");
                }
                Err(e) => {
                    warn!(source = %self.name, err = %e, "refresh failed");
                }
            }
        }
    }

    async fn sync_changes(
        &self,
        callback: &(dyn Fn(Event) + Send + Sync),
    ) -> Result<bool, SourceError> {
        self.refresh_with(callback).await?;
        Ok(true)
    }
}
