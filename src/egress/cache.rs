use crossbeam_skiplist::SkipMap;

use super::{EgressConfig, EgressRule, ValidRules};

/// The egress rules the data plane matches against, by config key.
///
/// Entries are swapped out whole. Readers see either the old rule set for a
/// key or the new one and never wait on a writer.
#[derive(Default)]
pub struct EgressRuleCache {
    rules: SkipMap<String, ValidRules>,
}

impl EgressRuleCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, key: impl Into<String>, rules: ValidRules) {
        self.rules.insert(key.into(), rules);
        self.update_gauge();
    }

    pub fn remove(&self, key: &str) -> bool {
        let removed = self.rules.remove(key).is_some();
        self.update_gauge();
        removed
    }

    pub fn get(&self, key: &str) -> Option<ValidRules> {
        self.rules.get(key).map(|e| e.value().clone())
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Every rule in the cache, flattened across keys.
    pub fn configs(&self) -> Vec<EgressConfig> {
        self.rules
            .iter()
            .flat_map(|e| e.value().rules().iter().map(EgressConfig::from).collect::<Vec<_>>())
            .collect()
    }

    /// Find the rule for a host name.
    ///
    /// Exact host names always win over wildcards. Wildcards match any host
    /// that ends with the pattern after its leading `*`. Ties go to whichever
    /// key sorts first.
    pub fn match_egress(&self, hostname: &str) -> Option<EgressConfig> {
        self.find_rule(|pattern| !pattern.starts_with('*') && pattern == hostname)
            .or_else(|| {
                self.find_rule(|pattern| match pattern.strip_prefix('*') {
                    Some(suffix) => hostname.ends_with(suffix),
                    None => false,
                })
            })
    }

    fn find_rule(&self, matches: impl Fn(&str) -> bool) -> Option<EgressConfig> {
        for entry in self.rules.iter() {
            let found = entry
                .value()
                .rules()
                .iter()
                .find(|rule: &&EgressRule| rule.hosts.iter().any(|h| matches(h)));

            if let Some(rule) = found {
                return Some(rule.into());
            }
        }

        None
    }

    fn update_gauge(&self) {
        metrics::gauge!("cache.egress_rules").set(self.rules.len() as f64);
    }
}
