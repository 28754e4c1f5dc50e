//! Terminal write destination: relabels accepted series, tags the
//! replica identifier, and hands them to the storage collaborator.

pub mod ingestor;
pub mod relabel;
pub mod service;
pub mod store;

pub use ingestor::{IngestError, Ingestor, REPLICA_LABEL};
pub use relabel::{RelabelError, RelabelRuleConfig, Relabeler};
pub use service::IngestService;
pub use store::{LabelMatcher, MemStore, SeriesStore, StoreError};
