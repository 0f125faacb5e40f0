use smol_str::SmolStr;

use super::{Change, Event, Snapshot};

/// Compare two snapshots key by key.
///
/// Creates and updates come first, in key order, followed by every delete.
/// Values are compared structurally, so a source that rebuilds an identical
/// value on every pull doesn't generate anything.
pub fn diff_changes(old: &Snapshot, new: &Snapshot) -> Vec<(String, Change)> {
    let mut changes = Vec::new();

    for (key, value) in new {
        match old.get(key) {
            None => changes.push((key.clone(), Change::Create(value.clone()))),
            Some(prev) if prev != value => changes.push((key.clone(), Change::Update(value.clone()))),
            Some(_) => (),
        }
    }

    for key in old.keys() {
        if !new.contains_key(key) {
            changes.push((key.clone(), Change::Delete));
        }
    }

    changes
}

/// [diff_changes], with every change attributed to `source`.
pub fn diff(source: &SmolStr, old: &Snapshot, new: &Snapshot) -> Vec<Event> {
    diff_changes(old, new)
        .into_iter()
        .map(|(key, change)| Event {
            source: source.clone(),
            key,
            change,
        })
        .collect()
}
