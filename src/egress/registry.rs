use std::{collections::BTreeMap, path::PathBuf, sync::Arc, time::Duration};

use crate::config::{ConfigSource, RefreshScheduler, SourceError, Trigger};
use crate::xds::DiscoveryClient;

use super::{file::FileSource, pilot::pilot_source};

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("unknown egress backend {name:?} (expected one of {known:?})")]
    UnknownBackend {
        name: String,
        known: Vec<&'static str>,
    },

    #[error("the {0} egress backend needs a control plane connection")]
    MissingClient(&'static str),

    #[error("the {0} egress backend needs a rule file")]
    MissingFile(&'static str),

    #[error(transparent)]
    Source(#[from] SourceError),
}

/// Everything an egress backend might need to build its source.
#[derive(Clone)]
pub struct SourceOptions {
    pub client: Option<Arc<DiscoveryClient>>,
    pub file: Option<PathBuf>,
    pub refresh_interval: Duration,
    pub trigger_capacity: usize,
}

/// A configuration source for egress rules, and a way to ask it to refresh
/// early if it supports that.
pub struct EgressBackend {
    pub source: Arc<dyn ConfigSource>,
    pub trigger: Option<Trigger>,
}

type Factory = fn(&SourceOptions) -> Result<EgressBackend, RegistryError>;

/// The egress backends this proxy knows how to build, by name.
pub struct EgressRegistry {
    factories: BTreeMap<&'static str, Factory>,
}

impl Default for EgressRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

impl EgressRegistry {
    pub fn builtin() -> Self {
        let factories: [(&'static str, Factory); 2] = [("pilot", build_pilot), ("file", build_file)];
        Self {
            factories: factories.into_iter().collect(),
        }
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.factories.keys().copied().collect()
    }

    pub fn build(&self, name: &str, opts: &SourceOptions) -> Result<EgressBackend, RegistryError> {
        let factory = self
            .factories
            .get(name)
            .ok_or_else(|| RegistryError::UnknownBackend {
                name: name.to_string(),
                known: self.names(),
            })?;

        factory(opts)
    }
}

fn build_pilot(opts: &SourceOptions) -> Result<EgressBackend, RegistryError> {
    let client = opts.client.clone().ok_or(RegistryError::MissingClient("pilot"))?;
    let (scheduler, trigger) = RefreshScheduler::new(opts.refresh_interval, opts.trigger_capacity);

    Ok(EgressBackend {
        source: Arc::new(pilot_source(client, scheduler)),
        trigger: Some(trigger),
    })
}

fn build_file(opts: &SourceOptions) -> Result<EgressBackend, RegistryError> {
    let path = opts.file.as_ref().ok_or(RegistryError::MissingFile("file"))?;

    Ok(EgressBackend {
        source: Arc::new(FileSource::load(path)?),
        trigger: None,
    })
}
