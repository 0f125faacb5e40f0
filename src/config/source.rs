use std::{path::PathBuf, sync::Arc};

use crate::xds::DiscoveryError;

use super::{ConfigValue, Event, Snapshot};

#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("key not found: {0}")]
    NotFound(String),

    #[error(transparent)]
    Discovery(#[from] DiscoveryError),

    #[error("failed to read {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
}

impl SourceError {
    /// `true` if this is just a lost connection to the control plane and
    /// isn't worth shouting about.
    pub fn is_connection_error(&self) -> bool {
        matches!(self, SourceError::Discovery(e) if e.is_connection_error())
    }
}

/// A provider of keyed configuration.
///
/// Sources with a lower priority value win when two sources publish the
/// same key. Name and priority must not change once a source is built.
#[tonic::async_trait]
pub trait ConfigSource: Send + Sync {
    fn name(&self) -> &str;

    fn priority(&self) -> i32;

    /// Pull a full snapshot. May update the source's local copy, which is
    /// what [ConfigSource::configuration_by_key] reads from.
    async fn configurations(&self) -> Result<Snapshot, SourceError>;

    /// Look up a key in the last snapshot this source pulled.
    fn configuration_by_key(&self, key: &str) -> Result<Arc<ConfigValue>, SourceError>;

    /// Run this source's refresh loop, calling `callback` once per change.
    ///
    /// Dynamic sources never return from this. Static sources have nothing to
    /// report and return immediately.
    async fn dynamic_config_handler(&self, _callback: &(dyn Fn(Event) + Send + Sync)) {}

    /// Pull now and report what changed since the last pull through
    /// `callback`, in the same order [ConfigSource::dynamic_config_handler]
    /// would have.
    ///
    /// Returns `false` if this source doesn't keep track of its own changes.
    /// The caller has to pull a full snapshot with
    /// [ConfigSource::configurations] instead.
    async fn sync_changes(
        &self,
        _callback: &(dyn Fn(Event) + Send + Sync),
    ) -> Result<bool, SourceError> {
        Ok(false)
    }
}
