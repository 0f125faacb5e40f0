use std::{collections::BTreeMap, fmt, sync::Arc};

use smol_str::SmolStr;

use crate::egress::EgressRule;
use crate::endpoints::EndpointSubset;

/// A single configuration value. What a value means depends on the source
/// that produced it, so consumers match on the kind they care about and
/// ignore the rest.
#[derive(Clone, Debug, PartialEq)]
pub enum ConfigValue {
    EgressRules(Vec<EgressRule>),
    EndpointSubset(EndpointSubset),
    Raw(Vec<u8>),
}

/// A full view of a source's configuration, by key.
pub type Snapshot = BTreeMap<String, Arc<ConfigValue>>;

/// What happened to a key.
///
/// Deletes don't carry a value, so there's no way to build an update that
/// removes something.
#[derive(Clone, Debug, PartialEq)]
pub enum Change {
    Create(Arc<ConfigValue>),
    Update(Arc<ConfigValue>),
    Delete,
}

impl Change {
    pub fn kind(&self) -> ChangeKind {
        match self {
            Change::Create(_) => ChangeKind::Create,
            Change::Update(_) => ChangeKind::Update,
            Change::Delete => ChangeKind::Delete,
        }
    }

    /// The new value, if there is one.
    pub fn value(&self) -> Option<&Arc<ConfigValue>> {
        match self {
            Change::Create(v) | Change::Update(v) => Some(v),
            Change::Delete => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ChangeKind {
    Create,
    Update,
    Delete,
}

impl ChangeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeKind::Create => "create",
            ChangeKind::Update => "update",
            ChangeKind::Delete => "delete",
        }
    }
}

impl fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A change to a single key, attributed to the source that made it.
#[derive(Clone, Debug, PartialEq)]
pub struct Event {
    pub source: SmolStr,
    pub key: String,
    pub change: Change,
}

impl Event {
    pub fn kind(&self) -> ChangeKind {
        self.change.kind()
    }

    pub fn value(&self) -> Option<&Arc<ConfigValue>> {
        self.change.value()
    }
}
