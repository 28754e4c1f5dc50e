//! Immutable hashring snapshot and candidate resolution.
//!
//! Resolution is a two-step lookup: the tenant picks a ring section
//! (ordered matchers, first match wins), then the routing key picks the
//! section's destinations by highest-random-weight hashing. HRW gives a
//! stable, reproducible ordering for a fixed destination list and moves
//! only the affected keys when the list changes.

use crate::config::{ConfigError, DestinationConfig, RingFile, anchored};
use regex::Regex;
use shared::wire::Label;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use thiserror::Error;
use twox_hash::XxHash64;
use url::Url;

/// Upper bound on sub-ring nesting during resolution. Cycles are rejected
/// at load; this guards misconfigured depth on top of that.
pub const MAX_RING_DEPTH: usize = 8;

#[derive(Error, Debug, PartialEq)]
pub enum ResolveError {
    #[error("no ring matches tenant {0} and no default ring exists")]
    NoMatchingRing(String),

    #[error("ring nesting exceeds {MAX_RING_DEPTH} levels")]
    DepthExceeded,
}

/// A terminal destination address.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Endpoint {
    /// Hashing identity; renaming reshuffles the series placed here.
    pub name: String,
    pub url: Url,
}

enum Destination {
    Endpoint(Endpoint),
    SubRing { name: String, ring: Arc<Ring> },
}

impl Destination {
    fn identity(&self) -> &str {
        match self {
            Destination::Endpoint(endpoint) => &endpoint.name,
            Destination::SubRing { name, .. } => name,
        }
    }
}

/// A destination list with its replication factor and quorum.
pub struct Ring {
    replication_factor: usize,
    quorum: usize,
    destinations: Vec<Destination>,
}

/// Closed set of tenant predicates, evaluated in declared order.
pub enum TenantMatcher {
    Exact(Vec<String>),
    Pattern(Regex),
    Default,
}

impl TenantMatcher {
    fn matches(&self, tenant: &str) -> bool {
        match self {
            TenantMatcher::Exact(tenants) => tenants.iter().any(|t| t == tenant),
            TenantMatcher::Pattern(regex) => regex.is_match(tenant),
            TenantMatcher::Default => true,
        }
    }
}

struct RingSection {
    matcher: TenantMatcher,
    ring: Ring,
}

/// Immutable snapshot mapping (tenant, routing key) to candidates.
pub struct Hashring {
    sections: Vec<RingSection>,
}

/// One resolved destination: a leaf endpoint, or an expanded sub-ring
/// that acks toward its parent only when its own quorum is met.
#[derive(Clone, Debug, PartialEq)]
pub enum Candidate {
    Endpoint(Endpoint),
    Group {
        name: String,
        quorum: usize,
        members: Vec<Candidate>,
    },
}

impl Candidate {
    pub fn identity(&self) -> &str {
        match self {
            Candidate::Endpoint(endpoint) => &endpoint.name,
            Candidate::Group { name, .. } => name,
        }
    }

    fn collect_leaves<'a>(&'a self, leaves: &mut Vec<&'a Endpoint>) {
        match self {
            Candidate::Endpoint(endpoint) => leaves.push(endpoint),
            Candidate::Group { members, .. } => {
                for member in members {
                    member.collect_leaves(leaves);
                }
            }
        }
    }
}

/// Ordered candidates for one routing key, with the ring parameters the
/// coordinator needs for its quorum decision.
#[derive(Clone, Debug, PartialEq)]
pub struct CandidateSet {
    pub candidates: Vec<Candidate>,
    pub replication_factor: usize,
    pub quorum: usize,
}

impl CandidateSet {
    /// Fewer distinct destinations were available than the configured
    /// replication factor asked for.
    pub fn is_degraded(&self) -> bool {
        self.candidates.len() < self.replication_factor
    }

    /// All terminal endpoints reachable through this set, in order.
    pub fn leaf_endpoints(&self) -> Vec<&Endpoint> {
        let mut leaves = Vec::new();
        for candidate in &self.candidates {
            candidate.collect_leaves(&mut leaves);
        }
        leaves
    }

    /// Stable grouping key: series resolving to the same ordered
    /// candidate list share one replication attempt.
    pub fn signature(&self) -> String {
        self.candidates
            .iter()
            .map(Candidate::identity)
            .collect::<Vec<_>>()
            .join(",")
    }
}

/// Deterministic routing key for a (tenant, label set) pair.
///
/// Labels are hashed in sorted order so submission order never changes
/// placement.
pub fn routing_key(tenant: &str, labels: &[Label]) -> u64 {
    let mut sorted: Vec<&Label> = labels.iter().collect();
    sorted.sort();

    let mut hasher = XxHash64::with_seed(0);
    tenant.hash(&mut hasher);
    for label in sorted {
        label.name.hash(&mut hasher);
        label.value.hash(&mut hasher);
    }
    hasher.finish()
}

/// Highest-random-weight score of one destination for one key.
fn hrw_weight(key: u64, identity: &str) -> u64 {
    let mut hasher = XxHash64::with_seed(key);
    identity.hash(&mut hasher);
    hasher.finish()
}

fn default_quorum(replication_factor: usize) -> usize {
    // strict majority: ceil((rf + 1) / 2)
    replication_factor / 2 + 1
}

impl Ring {
    /// Picks up to `replication_factor` distinct destinations for `key`,
    /// ordered by descending HRW weight. Destination identities are
    /// unique by construction, so distinctness falls out of the take.
    fn select(&self, key: u64) -> Vec<&Destination> {
        let mut weighted: Vec<(u64, usize)> = self
            .destinations
            .iter()
            .enumerate()
            .map(|(index, destination)| (hrw_weight(key, destination.identity()), index))
            .collect();
        // index tiebreak keeps the order total even on weight collisions
        weighted.sort_by(|a, b| b.0.cmp(&a.0).then(a.1.cmp(&b.1)));

        weighted
            .into_iter()
            .take(self.replication_factor)
            .map(|(_, index)| &self.destinations[index])
            .collect()
    }

    fn expand(&self, key: u64, depth: usize) -> Result<Vec<Candidate>, ResolveError> {
        if depth > MAX_RING_DEPTH {
            return Err(ResolveError::DepthExceeded);
        }

        let mut candidates = Vec::new();
        for destination in self.select(key) {
            match destination {
                Destination::Endpoint(endpoint) => {
                    candidates.push(Candidate::Endpoint(endpoint.clone()));
                }
                Destination::SubRing { name, ring } => {
                    candidates.push(Candidate::Group {
                        name: name.clone(),
                        quorum: ring.quorum,
                        members: ring.expand(key, depth + 1)?,
                    });
                }
            }
        }
        Ok(candidates)
    }

    fn collect_endpoints<'a>(&'a self, endpoints: &mut Vec<&'a Endpoint>) {
        for destination in &self.destinations {
            match destination {
                Destination::Endpoint(endpoint) => endpoints.push(endpoint),
                Destination::SubRing { ring, .. } => ring.collect_endpoints(endpoints),
            }
        }
    }
}

impl Hashring {
    /// Builds a snapshot from a validated [`RingFile`].
    pub fn from_config(file: &RingFile) -> Result<Self, ConfigError> {
        let mut built: HashMap<String, Arc<Ring>> = HashMap::new();

        let mut sections = Vec::with_capacity(file.rings.len());
        for (index, ring_config) in file.rings.iter().enumerate() {
            let matcher = if !ring_config.tenants.is_empty() {
                TenantMatcher::Exact(ring_config.tenants.clone())
            } else if let Some(pattern) = &ring_config.tenant_pattern {
                let regex = Regex::new(&anchored(pattern))
                    .map_err(|e| ConfigError::BadPattern(format!("#{index}"), e))?;
                TenantMatcher::Pattern(regex)
            } else {
                TenantMatcher::Default
            };

            let ring = build_ring(
                &format!("#{index}"),
                ring_config.replication_factor,
                ring_config.quorum,
                &ring_config.endpoints,
                file,
                &mut built,
            )?;
            sections.push(RingSection { matcher, ring });
        }

        Ok(Hashring { sections })
    }

    /// Resolves a (tenant, label set) pair to its ordered candidates.
    pub fn resolve(&self, tenant: &str, labels: &[Label]) -> Result<CandidateSet, ResolveError> {
        let section = self
            .sections
            .iter()
            .find(|section| section.matcher.matches(tenant))
            .ok_or_else(|| ResolveError::NoMatchingRing(tenant.to_string()))?;

        let key = routing_key(tenant, labels);
        let candidates = section.ring.expand(key, 0)?;
        Ok(CandidateSet {
            candidates,
            replication_factor: section.ring.replication_factor,
            quorum: section.ring.quorum,
        })
    }

    /// Every terminal endpoint in the snapshot, deduplicated by name.
    /// Used to seed downstream health tracking on install.
    pub fn all_endpoints(&self) -> Vec<Endpoint> {
        let mut raw = Vec::new();
        for section in &self.sections {
            section.ring.collect_endpoints(&mut raw);
        }
        let mut seen = std::collections::HashSet::new();
        raw.into_iter()
            .filter(|endpoint| seen.insert(endpoint.name.clone()))
            .cloned()
            .collect()
    }
}

fn build_ring(
    label: &str,
    replication_factor: usize,
    quorum: Option<usize>,
    endpoints: &[DestinationConfig],
    file: &RingFile,
    built: &mut HashMap<String, Arc<Ring>>,
) -> Result<Ring, ConfigError> {
    let mut destinations = Vec::with_capacity(endpoints.len());
    for destination in endpoints {
        let ambiguous = || ConfigError::AmbiguousDestination {
            ring: label.to_string(),
        };
        let identity = destination.identity().ok_or_else(ambiguous)?;
        match (&destination.address, &destination.subring) {
            (Some(url), None) => destinations.push(Destination::Endpoint(Endpoint {
                name: identity,
                url: url.clone(),
            })),
            (None, Some(subring_name)) => {
                let subring = build_subring(subring_name, file, built)?;
                destinations.push(Destination::SubRing {
                    name: identity,
                    ring: subring,
                });
            }
            _ => return Err(ambiguous()),
        }
    }

    Ok(Ring {
        replication_factor,
        quorum: quorum.unwrap_or_else(|| default_quorum(replication_factor)),
        destinations,
    })
}

fn build_subring(
    name: &str,
    file: &RingFile,
    built: &mut HashMap<String, Arc<Ring>>,
) -> Result<Arc<Ring>, ConfigError> {
    if let Some(ring) = built.get(name) {
        return Ok(ring.clone());
    }
    let config = file
        .subrings
        .get(name)
        .ok_or_else(|| ConfigError::UnknownSubring(name.to_string()))?;
    let ring = build_ring(
        name,
        config.replication_factor,
        config.quorum,
        &config.endpoints,
        file,
        built,
    )?;
    let ring = Arc::new(ring);
    built.insert(name.to_string(), ring.clone());
    Ok(ring)
}
