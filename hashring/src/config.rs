use regex::Regex;
use serde::Deserialize;
use std::collections::{HashMap, HashSet};
use std::path::Path;
use thiserror::Error;
use url::Url;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("could not read ring config: {0}")]
    Io(#[from] std::io::Error),

    #[error("could not parse ring config: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("no rings configured")]
    NoRings,

    #[error("ring {0}: replication factor must be at least 1")]
    ZeroReplication(String),

    #[error("ring {0}: quorum {1} outside 1..=replication_factor ({2})")]
    InvalidQuorum(String, usize, usize),

    #[error("ring {0}: no endpoints")]
    EmptyEndpoints(String),

    #[error("ring {ring}: destination must set exactly one of address / subring")]
    AmbiguousDestination { ring: String },

    #[error("ring {0}: duplicate destination {1}")]
    DuplicateDestination(String, String),

    #[error("ring {0}: tenants and tenant_pattern are mutually exclusive")]
    AmbiguousTenantMatch(String),

    #[error("ring {0}: invalid tenant pattern: {1}")]
    BadPattern(String, regex::Error),

    #[error("unknown subring reference: {0}")]
    UnknownSubring(String),

    #[error("cyclic subring reference involving {0}")]
    CyclicSubring(String),
}

/// One destination in a ring: a terminal endpoint address or a reference
/// into the named `subrings` table.
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct DestinationConfig {
    pub address: Option<Url>,
    pub subring: Option<String>,
    /// Stable identity used for hashing; defaults to the address or
    /// subring name. Renaming an endpoint reshuffles its series.
    pub name: Option<String>,
}

impl DestinationConfig {
    /// Identity string a ring hashes this destination by.
    pub fn identity(&self) -> Option<String> {
        if let Some(name) = &self.name {
            return Some(name.clone());
        }
        match (&self.address, &self.subring) {
            (Some(url), None) => Some(url.to_string()),
            (None, Some(subring)) => Some(format!("subring:{subring}")),
            _ => None,
        }
    }
}

/// Destination list shared by tenant-matched rings and named sub-rings.
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct SubringConfig {
    pub replication_factor: usize,
    pub quorum: Option<usize>,
    pub endpoints: Vec<DestinationConfig>,
}

/// A tenant-matched ring definition, evaluated in declared order.
///
/// The matcher is derived from the optional fields: `tenants` gives an
/// exact-match list, `tenant_pattern` an anchored regex, neither makes
/// this ring the catch-all.
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct RingConfig {
    #[serde(default)]
    pub tenants: Vec<String>,
    pub tenant_pattern: Option<String>,
    pub replication_factor: usize,
    pub quorum: Option<usize>,
    pub endpoints: Vec<DestinationConfig>,
}

/// Top-level ring configuration file.
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct RingFile {
    pub rings: Vec<RingConfig>,
    #[serde(default)]
    pub subrings: HashMap<String, SubringConfig>,
}

impl RingFile {
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        let file: RingFile = serde_yaml::from_str(yaml)?;
        file.validate()?;
        Ok(file)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.rings.is_empty() {
            return Err(ConfigError::NoRings);
        }

        for (index, ring) in self.rings.iter().enumerate() {
            let label = format!("#{index}");
            if !ring.tenants.is_empty() && ring.tenant_pattern.is_some() {
                return Err(ConfigError::AmbiguousTenantMatch(label));
            }
            if let Some(pattern) = &ring.tenant_pattern {
                Regex::new(&anchored(pattern))
                    .map_err(|e| ConfigError::BadPattern(label.clone(), e))?;
            }
            validate_ring(
                &label,
                ring.replication_factor,
                ring.quorum,
                &ring.endpoints,
                &self.subrings,
            )?;
        }

        for (name, subring) in &self.subrings {
            validate_ring(
                name,
                subring.replication_factor,
                subring.quorum,
                &subring.endpoints,
                &self.subrings,
            )?;
        }

        self.check_cycles()
    }

    /// Rejects cyclic subring references with a depth-first walk over the
    /// named subring table.
    fn check_cycles(&self) -> Result<(), ConfigError> {
        fn visit(
            name: &str,
            subrings: &HashMap<String, SubringConfig>,
            in_progress: &mut Vec<String>,
            done: &mut HashSet<String>,
        ) -> Result<(), ConfigError> {
            if done.contains(name) {
                return Ok(());
            }
            if in_progress.iter().any(|n| n == name) {
                return Err(ConfigError::CyclicSubring(name.to_string()));
            }
            let Some(subring) = subrings.get(name) else {
                return Err(ConfigError::UnknownSubring(name.to_string()));
            };
            in_progress.push(name.to_string());
            for destination in &subring.endpoints {
                if let Some(child) = &destination.subring {
                    visit(child, subrings, in_progress, done)?;
                }
            }
            in_progress.pop();
            done.insert(name.to_string());
            Ok(())
        }

        let mut done = HashSet::new();
        for name in self.subrings.keys() {
            visit(name, &self.subrings, &mut Vec::new(), &mut done)?;
        }
        Ok(())
    }
}

fn validate_ring(
    label: &str,
    replication_factor: usize,
    quorum: Option<usize>,
    endpoints: &[DestinationConfig],
    subrings: &HashMap<String, SubringConfig>,
) -> Result<(), ConfigError> {
    if replication_factor == 0 {
        return Err(ConfigError::ZeroReplication(label.to_string()));
    }
    if let Some(q) = quorum
        && (q == 0 || q > replication_factor)
    {
        return Err(ConfigError::InvalidQuorum(
            label.to_string(),
            q,
            replication_factor,
        ));
    }
    if endpoints.is_empty() {
        return Err(ConfigError::EmptyEndpoints(label.to_string()));
    }

    let mut seen = HashSet::new();
    for destination in endpoints {
        if destination.address.is_some() == destination.subring.is_some() {
            return Err(ConfigError::AmbiguousDestination {
                ring: label.to_string(),
            });
        }
        let identity = destination
            .identity()
            .ok_or_else(|| ConfigError::AmbiguousDestination {
                ring: label.to_string(),
            })?;
        if !seen.insert(identity.clone()) {
            return Err(ConfigError::DuplicateDestination(
                label.to_string(),
                identity,
            ));
        }
        if let Some(subring) = &destination.subring
            && !subrings.contains_key(subring)
        {
            return Err(ConfigError::UnknownSubring(subring.clone()));
        }
    }
    Ok(())
}

/// Anchors a tenant pattern so partial matches do not route.
pub(crate) fn anchored(pattern: &str) -> String {
    format!("^(?:{pattern})$")
}
