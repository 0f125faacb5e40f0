use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
    sync::Arc,
};

use serde::Deserialize;
use tracing::debug;

use crate::config::{ConfigSource, ConfigValue, Snapshot, SourceError};

use super::EgressRule;

pub const FILE_SOURCE_NAME: &str = "EgressFileSource";
pub const FILE_SOURCE_PRIORITY: i32 = 4;

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EgressFile {
    // the CLI picks the backend, this section is only logged.
    #[serde(default)]
    egress: Option<EgressBackend>,

    #[serde(default)]
    egress_rule: BTreeMap<String, Vec<EgressRule>>,
}

#[derive(Debug, Default, Deserialize)]
struct EgressBackend {
    #[serde(default)]
    infra: String,
    #[serde(default)]
    address: String,
}

/// Egress rules from a YAML file, read once at startup.
///
/// ```yaml
/// egressRule:
///   google-ext:
///     - hosts: ["*.yahoo.com"]
///       ports:
///         - port: 80
///           protocol: HTTP
/// ```
pub struct FileSource {
    path: PathBuf,
    snapshot: Snapshot,
}

impl FileSource {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, SourceError> {
        let path = path.as_ref().to_path_buf();
        let contents = std::fs::read_to_string(&path).map_err(|source| SourceError::Read {
            path: path.clone(),
            source,
        })?;

        Self::parse(path, &contents)
    }

    pub fn parse(path: PathBuf, contents: &str) -> Result<Self, SourceError> {
        let file: EgressFile = serde_yaml::from_str(contents).map_err(|source| SourceError::Parse {
            path: path.clone(),
            source,
        })?;

        if let Some(backend) = &file.egress {
            debug!(
                path = %path.display(),
                infra = backend.infra,
                address = backend.address,
                "ignoring egress backend settings in rule file",
            );
        }

        let snapshot = file
            .egress_rule
            .into_iter()
            .map(|(key, rules)| (key, Arc::new(ConfigValue::EgressRules(rules))))
            .collect();

        Ok(Self { path, snapshot })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[tonic::async_trait]
impl ConfigSource for FileSource {
    fn name(&self) -> &str {
        FILE_SOURCE_NAME
    }

    fn priority(&self) -> i32 {
        FILE_SOURCE_PRIORITY
    }

    async fn configurations(&self) -> Result<Snapshot, SourceError> {
        Ok(self.snapshot.clone())
    }

    fn configuration_by_key(&self, key: &str) -> Result<Arc<ConfigValue>, SourceError> {
        self.snapshot
            .get(key)
            .cloned()
            .ok_or_else(|| SourceError::NotFound(key.to_string()))
    }
}
