//! Configuration sources and the manager that merges them.
//!
//! Sources produce full snapshots of keyed configuration. The manager keeps
//! the last snapshot from each source, works out what changed, and hands the
//! resulting events to listeners.

mod control_plane;
mod diff;
mod event;
mod manager;
mod scheduler;
mod source;

pub use control_plane::{ControlPlaneSource, Pull};
pub use diff::{diff, diff_changes};
pub use event::{Change, ChangeKind, ConfigValue, Event, Snapshot};
pub use manager::{ConfigManager, EventListener, KeyPattern};
pub use scheduler::{RefreshScheduler, Trigger, Wakeup};
pub use source::{ConfigSource, SourceError};
