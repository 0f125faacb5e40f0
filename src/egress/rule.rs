use std::{fmt, str::FromStr, sync::Arc};

use serde::{Deserialize, Serialize};

const MAX_HOST_LEN: usize = 255;
const MAX_LABEL_LEN: usize = 63;

/// External hosts a sidecar may send traffic to, and the ports it may use.
///
/// Hosts are either exact names or a `*` followed by a suffix. Rules are
/// always replaced as a whole, never edited.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EgressRule {
    #[serde(default)]
    pub hosts: Vec<String>,
    #[serde(default)]
    pub ports: Vec<EgressPort>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EgressPort {
    pub port: i32,
    pub protocol: String,
}

impl EgressPort {
    pub fn new(port: i32, protocol: impl Into<String>) -> Self {
        Self {
            port,
            protocol: protocol.into(),
        }
    }
}

/// The rule that matched an egress lookup.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct EgressConfig {
    pub hosts: Vec<String>,
    pub ports: Vec<EgressPort>,
}

impl From<&EgressRule> for EgressConfig {
    fn from(rule: &EgressRule) -> Self {
        Self {
            hosts: rule.hosts.clone(),
            ports: rule.ports.clone(),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Protocol {
    Http,
    Https,
    Http2,
    Grpc,
    Tcp,
    Tls,
}

impl FromStr for Protocol {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "HTTP" => Ok(Protocol::Http),
            "HTTPS" => Ok(Protocol::Https),
            "HTTP2" => Ok(Protocol::Http2),
            "GRPC" => Ok(Protocol::Grpc),
            "TCP" => Ok(Protocol::Tcp),
            "TLS" => Ok(Protocol::Tls),
            _ => Err(ValidationError::UnknownProtocol(s.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("rule {index} has no hosts")]
    NoHosts { index: usize },

    #[error("rule {index} has no ports")]
    NoPorts { index: usize },

    #[error("invalid host name {host:?}: {reason}")]
    InvalidHost { host: String, reason: &'static str },

    #[error("invalid port: {0}")]
    InvalidPort(i32),

    #[error("unknown protocol: {0:?}")]
    UnknownProtocol(String),
}

/// A set of rules that passed [validate].
///
/// This is the only form of rule the egress cache accepts.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ValidRules(Arc<[EgressRule]>);

impl ValidRules {
    pub fn rules(&self) -> &[EgressRule] {
        &self.0
    }
}

impl fmt::Display for ValidRules {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let hosts: Vec<&str> = self
            .0
            .iter()
            .flat_map(|r| r.hosts.iter().map(String::as_str))
            .collect();
        write!(f, "[{}]", hosts.join(", "))
    }
}

/// Check that every rule has hosts and ports, that all the hosts are valid
/// host names or wildcards, and that every port has a known protocol.
pub fn validate(rules: &[EgressRule]) -> Result<ValidRules, ValidationError> {
    for (index, rule) in rules.iter().enumerate() {
        if rule.hosts.is_empty() {
            return Err(ValidationError::NoHosts { index });
        }
        if rule.ports.is_empty() {
            return Err(ValidationError::NoPorts { index });
        }

        for host in &rule.hosts {
            validate_host(host)?;
        }

        for port in &rule.ports {
            if !(1..=65535).contains(&port.port) {
                return Err(ValidationError::InvalidPort(port.port));
            }
            port.protocol.parse::<Protocol>()?;
        }
    }

    Ok(ValidRules(rules.into()))
}

/// Validate a host name. The first label may be `*` or start with `*`,
/// everything else has to be a DNS-1123 label.
pub fn validate_host(host: &str) -> Result<(), ValidationError> {
    let invalid = |reason| ValidationError::InvalidHost {
        host: host.to_string(),
        reason,
    };

    if host.is_empty() {
        return Err(invalid("empty host name"));
    }
    if host.len() > MAX_HOST_LEN {
        return Err(invalid("host name is longer than 255 bytes"));
    }

    let (first, rest) = match host.split_once('.') {
        Some((first, rest)) => (first, Some(rest)),
        None => (host, None),
    };

    if !is_wildcard_label(first) {
        return Err(invalid("invalid first label"));
    }
    if let Some(rest) = rest {
        if !rest.split('.').all(is_dns1123_label) {
            return Err(invalid("invalid label"));
        }
    }

    Ok(())
}

fn is_wildcard_label(label: &str) -> bool {
    if label.len() > MAX_LABEL_LEN {
        return false;
    }

    match label.strip_prefix('*') {
        Some("") => true,
        Some(rest) => is_dns1123_label(rest),
        None => is_dns1123_label(label),
    }
}

fn is_dns1123_label(label: &str) -> bool {
    let bytes = label.as_bytes();
    let (Some(first), Some(last)) = (bytes.first(), bytes.last()) else {
        return false;
    };

    bytes.len() <= MAX_LABEL_LEN
        && first.is_ascii_alphanumeric()
        && last.is_ascii_alphanumeric()
        && bytes.iter().all(|b| b.is_ascii_alphanumeric() || *b == b'-')
}
