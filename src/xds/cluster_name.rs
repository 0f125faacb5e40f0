//! Cluster names handed out by the control plane encode where traffic goes:
//!
//! ```text
//! <direction>|<port>|<subset>|<fqdn>
//! outbound|9080|v2|reviews.default.svc.cluster.local
//! ```
//!
//! The subset segment may be empty. Anything that doesn't look like this is a
//! cluster owned by somebody else (`BlackHoleCluster`, admin clusters, ...) and
//! parses to `None`. Callers are expected to skip those silently.

use std::{fmt, str::FromStr};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Direction {
    Inbound,
    Outbound,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Inbound => "inbound",
            Direction::Outbound => "outbound",
        }
    }
}

impl FromStr for Direction {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "inbound" => Ok(Direction::Inbound),
            "outbound" => Ok(Direction::Outbound),
            _ => Err(()),
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A parsed, managed cluster name.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ResourceName {
    pub direction: Direction,
    pub port: String,
    pub subset: String,
    /// The first label of the fqdn.
    pub service: String,
    /// The second label of the fqdn.
    pub namespace: String,
    pub fqdn: String,
}

impl ResourceName {
    /// Parse a cluster name. Returns `None` for anything that isn't a cluster
    /// this proxy manages. Matching is byte-exact.
    ///
    /// Both the canonical four segment form and the three segment
    /// `direction|port|fqdn` form (no subset) are accepted.
    pub fn parse(name: &str) -> Option<Self> {
        let parts: Vec<&str> = name.split('|').collect();

        let (direction, port, subset, fqdn) = match parts[..] {
            [direction, port, subset, fqdn] => (direction, port, subset, fqdn),
            [direction, port, fqdn] => (direction, port, "", fqdn),
            _ => return None,
        };

        let direction = direction.parse().ok()?;
        if port.is_empty() {
            return None;
        }

        let mut labels = fqdn.split('.');
        let service = labels.next().filter(|s| !s.is_empty())?;
        let namespace = labels.next().filter(|s| !s.is_empty())?;

        Some(Self {
            direction,
            port: port.to_string(),
            subset: subset.to_string(),
            service: service.to_string(),
            namespace: namespace.to_string(),
            fqdn: fqdn.to_string(),
        })
    }

    /// `true` if this cluster is a tagged partition of a service.
    pub fn has_subset(&self) -> bool {
        !self.subset.is_empty()
    }
}

impl fmt::Display for ResourceName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}|{}|{}|{}",
            self.direction, self.port, self.subset, self.fqdn
        )
    }
}
