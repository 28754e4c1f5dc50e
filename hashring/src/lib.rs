//! Hashring: deterministic routing of series to replication destinations.
//!
//! A [`ring::Hashring`] is an immutable snapshot built from configuration.
//! Tenant matchers select a ring section in declared order, then
//! highest-random-weight hashing picks the replication-factor-many
//! destinations for a routing key. Destinations may be leaf endpoints or
//! named sub-rings, which expand recursively into candidate groups.
//!
//! The [`provider::RingProvider`] holds the current snapshot behind an
//! atomic pointer; the [`watcher::RingWatcher`] polls the config file and
//! installs new snapshots without interrupting in-flight requests.

pub mod config;
pub mod provider;
pub mod ring;
pub mod watcher;

pub use config::{ConfigError, RingFile};
pub use provider::RingProvider;
pub use ring::{Candidate, CandidateSet, Endpoint, Hashring, ResolveError, routing_key};
pub use watcher::RingWatcher;
