use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::config::{Change, ConfigValue, Event, EventListener};

use super::{validate, EgressRuleCache};

/// Publishes egress rule changes to an [EgressRuleCache].
///
/// Rules are validated before they get anywhere near the cache. A key with
/// invalid rules keeps whatever it had before.
pub struct EgressListener {
    cache: Arc<EgressRuleCache>,
}

impl EgressListener {
    pub fn new(cache: Arc<EgressRuleCache>) -> Self {
        Self { cache }
    }
}

impl EventListener for EgressListener {
    fn on_event(&self, event: &Event) {
        let value = match &event.change {
            Change::Delete => {
                if self.cache.remove(&event.key) {
                    info!(source = %event.source, key = event.key, "egress rules removed");
                }
                return;
            }
            Change::Create(value) | Change::Update(value) => value,
        };

        let ConfigValue::EgressRules(rules) = value.as_ref() else {
            debug!(key = event.key, "ignoring non-egress value");
            return;
        };

        match validate(rules) {
            Ok(valid) => {
                info!(
                    source = %event.source,
                    key = event.key,
                    kind = %event.kind(),
                    hosts = %valid,
                    "egress rules published",
                );
                self.cache.insert(event.key.clone(), valid);
            }
            Err(e) => {
                metrics::counter!("egress.rejected").increment(1);
                warn!(
                    source = %event.source,
                    key = event.key,
                    err = %e,
                    "rejecting invalid egress rules",
                );
            }
        }
    }
}
