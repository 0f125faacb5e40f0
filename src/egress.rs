mod cache;
mod file;
mod listener;
mod pilot;
mod registry;
mod rule;

pub use cache::EgressRuleCache;
pub use file::{FileSource, FILE_SOURCE_NAME, FILE_SOURCE_PRIORITY};
pub use listener::EgressListener;
pub use pilot::{pilot_source, EgressPull, PILOT_EGRESS_KEY, PILOT_SOURCE_NAME, PILOT_SOURCE_PRIORITY};
pub use registry::{EgressBackend, EgressRegistry, RegistryError, SourceOptions};
pub use rule::{validate, validate_host, EgressConfig, EgressPort, EgressRule, Protocol, ValidRules, ValidationError};
