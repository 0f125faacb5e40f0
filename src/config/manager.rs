use std::{
    collections::BTreeMap,
    sync::{Arc, PoisonError, RwLock},
};

use smol_str::SmolStr;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::{diff_changes, Change, ConfigSource, ConfigValue, Event, Snapshot};

/// Something that wants to hear about configuration changes.
pub trait EventListener: Send + Sync {
    fn on_event(&self, event: &Event);
}

/// Which keys a listener is interested in.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum KeyPattern {
    Any,
    Prefix(String),
    Exact(String),
}

impl KeyPattern {
    /// `*` and `.*` match everything, a trailing `*` matches a prefix, and
    /// anything else has to match exactly.
    pub fn parse(pattern: &str) -> Self {
        match pattern {
            "*" | ".*" => KeyPattern::Any,
            p => match p.strip_suffix('*') {
                Some(prefix) => KeyPattern::Prefix(prefix.to_string()),
                None => KeyPattern::Exact(p.to_string()),
            },
        }
    }

    pub fn matches(&self, key: &str) -> bool {
        match self {
            KeyPattern::Any => true,
            KeyPattern::Prefix(prefix) => key.starts_with(prefix.as_str()),
            KeyPattern::Exact(exact) => key == exact,
        }
    }
}

struct Registered {
    name: SmolStr,
    source: Arc<dyn ConfigSource>,
    snapshot: Snapshot,
}

#[derive(Clone)]
struct Owned {
    source: SmolStr,
    value: Arc<ConfigValue>,
}

#[derive(Default)]
struct State {
    // sorted by priority. sources with the same priority stay in the order
    // they were added.
    sources: Vec<Registered>,
    merged: BTreeMap<String, Owned>,
}

impl State {
    fn resolve(&self, key: &str) -> Option<Owned> {
        self.sources.iter().find_map(|r| {
            r.snapshot.get(key).map(|value| Owned {
                source: r.name.clone(),
                value: value.clone(),
            })
        })
    }

    fn values(&self) -> Snapshot {
        self.merged
            .iter()
            .map(|(k, o)| (k.clone(), o.value.clone()))
            .collect()
    }

    /// Re-resolve every key from the per-source snapshots and return what
    /// changed in the merged view.
    fn remerge(&mut self) -> Vec<Event> {
        let mut merged = BTreeMap::new();
        for registered in &self.sources {
            for (key, value) in &registered.snapshot {
                merged.entry(key.clone()).or_insert_with(|| Owned {
                    source: registered.name.clone(),
                    value: value.clone(),
                });
            }
        }

        let old = std::mem::replace(&mut self.merged, merged);
        let old_values: Snapshot = old.iter().map(|(k, o)| (k.clone(), o.value.clone())).collect();

        diff_changes(&old_values, &self.values())
            .into_iter()
            .filter_map(|(key, change)| {
                let owner = match &change {
                    Change::Delete => old.get(&key),
                    _ => self.merged.get(&key),
                };
                let source = owner.map(|o| o.source.clone())?;
                Some(Event {
                    source,
                    key,
                    change,
                })
            })
            .collect()
    }

    /// Re-resolve a single key, returning the change to the merged view if
    /// there is one.
    fn remerge_key(&mut self, key: &str) -> Option<Event> {
        let old = self.merged.get(key).cloned();
        let new = self.resolve(key);

        let (source, change) = match (old, new) {
            (None, None) => return None,
            (Some(old), None) => {
                self.merged.remove(key);
                (old.source, Change::Delete)
            }
            (None, Some(new)) => {
                self.merged.insert(key.to_string(), new.clone());
                (new.source, Change::Create(new.value))
            }
            (Some(old), Some(new)) => {
                self.merged.insert(key.to_string(), new.clone());
                if old.value == new.value {
                    return None;
                }
                (new.source, Change::Update(new.value))
            }
        };

        Some(Event {
            source,
            key: key.to_string(),
            change,
        })
    }
}

/// Merges configuration from every registered source and tells listeners
/// what changed.
///
/// Each key belongs to the source with the lowest priority value that has
/// it. Changes from sources that don't own a key are remembered but not
/// published, so if the owner later drops the key the next source in line
/// takes over.
#[derive(Default)]
pub struct ConfigManager {
    state: RwLock<State>,
    listeners: RwLock<Vec<(KeyPattern, Arc<dyn EventListener>)>>,
}

impl ConfigManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_listener(&self, pattern: &str, listener: Arc<dyn EventListener>) {
        let mut listeners = self.listeners.write().unwrap_or_else(PoisonError::into_inner);
        listeners.push((KeyPattern::parse(pattern), listener));
    }

    /// Register a source and publish its initial snapshot.
    ///
    /// Listeners should be registered first, the initial snapshot is only
    /// delivered to the listeners that exist when the source is added. A
    /// source that can't be pulled yet starts out empty and catches up on its
    /// next refresh.
    pub async fn add_source(&self, source: Arc<dyn ConfigSource>) {
        let name = SmolStr::new(source.name());
        let snapshot = match source.configurations().await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                warn!(source = %name, err = %e, "initial pull failed, starting empty");
                Snapshot::new()
            }
        };
        info!(source = %name, priority = source.priority(), keys = snapshot.len(), "adding source");

        let events = {
            let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
            let idx = state
                .sources
                .partition_point(|r| r.source.priority() <= source.priority());
            let keys: Vec<String> = snapshot.keys().cloned().collect();
            state.sources.insert(
                idx,
                Registered {
                    name,
                    source,
                    snapshot,
                },
            );

            let events: Vec<Event> = keys.iter().filter_map(|k| state.remerge_key(k)).collect();
            events
        };

        self.dispatch(&events);
    }

    /// Apply a change reported by one of the registered sources.
    pub fn apply(&self, event: Event) {
        let merged = {
            let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
            let Some(registered) = state.sources.iter_mut().find(|r| r.name == event.source) else {
                warn!(source = %event.source, key = event.key, "event from an unknown source");
                return;
            };

            match event.change {
                Change::Create(value) | Change::Update(value) => {
                    registered.snapshot.insert(event.key.clone(), value);
                }
                Change::Delete => {
                    registered.snapshot.remove(&event.key);
                }
            }

            state.remerge_key(&event.key)
        };

        match merged {
            Some(merged) => self.dispatch(std::slice::from_ref(&merged)),
            None => debug!(source = %event.source, key = event.key, "change not published"),
        }
    }

    /// Pull from every source and publish whatever changed. A source that
    /// fails to pull keeps its last snapshot.
    ///
    /// Sources that track their own changes report them as events, the same
    /// way their refresh loop does, so this is safe to call while [run] is
    /// going. Everything else is pulled and replaced wholesale.
    ///
    /// [run]: ConfigManager::run
    pub async fn refresh(&self) {
        let sources: Vec<_> = {
            let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
            state.sources.iter().map(|r| r.source.clone()).collect()
        };

        let apply = |event: Event| self.apply(event);
        let mut pulled = Vec::with_capacity(sources.len());
        for source in sources {
            match source.sync_changes(&apply).await {
                Ok(true) => continue,
                Ok(false) => (),
                Err(e) => {
                    warn!(source = source.name(), err = %e, "failed to refresh source");
                    continue;
                }
            }

            match source.configurations().await {
                Ok(snapshot) => pulled.push((SmolStr::new(source.name()), snapshot)),
                Err(e) => warn!(source = source.name(), err = %e, "failed to refresh source"),
            }
        }

        let events = {
            let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
            for (name, snapshot) in pulled {
                if let Some(registered) = state.sources.iter_mut().find(|r| r.name == name) {
                    registered.snapshot = snapshot;
                }
            }
            state.remerge()
        };

        self.dispatch(&events);
    }

    /// The current value of a key, or `None` if no source has it.
    pub fn get(&self, key: &str) -> Option<Arc<ConfigValue>> {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        state.merged.get(key).map(|o| o.value.clone())
    }

    /// The name of the source that owns a key.
    pub fn owner(&self, key: &str) -> Option<SmolStr> {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        state.merged.get(key).map(|o| o.source.clone())
    }

    /// The merged view of every source.
    pub fn configurations(&self) -> Snapshot {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        state.values()
    }

    /// Start every source's refresh loop. Changes are applied as they
    /// arrive.
    pub fn run(self: Arc<Self>) -> Vec<JoinHandle<()>> {
        let sources: Vec<_> = {
            let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
            state.sources.iter().map(|r| r.source.clone()).collect()
        };

        sources
            .into_iter()
            .map(|source| {
                let manager = self.clone();
                tokio::spawn(async move {
                    let callback = move |event: Event| manager.apply(event);
                    source.dynamic_config_handler(&callback).await;
                })
            })
            .collect()
    }

    fn dispatch(&self, events: &[Event]) {
        if events.is_empty() {
            return;
        }

        let listeners = self
            .listeners
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();

        for event in events {
            for (pattern, listener) in &listeners {
                if pattern.matches(&event.key) {
                    listener.on_event(event);
                }
            }
        }
    }
}
