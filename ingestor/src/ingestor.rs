use crate::relabel::Relabeler;
use crate::store::{SeriesStore, StoreError};
use shared::wire::{Label, WriteRequest};
use std::sync::Arc;
use thiserror::Error;

/// Label carrying the replica index assigned at fan-out. Written at
/// persist time so reads can deduplicate across replicas.
pub const REPLICA_LABEL: &str = "__replica__";

#[derive(Error, Debug)]
pub enum IngestError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Terminal write handler: relabels each accepted series, tags it with
/// the replica index from the request, and appends it to storage.
pub struct Ingestor {
    store: Arc<dyn SeriesStore>,
    relabeler: Relabeler,
}

impl Ingestor {
    pub fn new(store: Arc<dyn SeriesStore>, relabeler: Relabeler) -> Self {
        Self { store, relabeler }
    }

    pub fn store(&self) -> Arc<dyn SeriesStore> {
        self.store.clone()
    }

    /// Persists one write request. Returns the number of series stored,
    /// which can be lower than the batch size when relabel rules drop
    /// series.
    pub async fn write(
        &self,
        tenant: &str,
        replica: u32,
        request: WriteRequest,
    ) -> Result<usize, IngestError> {
        let batch = request.series.len();
        let mut stored = 0;
        for series in request.series {
            // relabeling runs before the replica tag so rules never see it
            let Some(mut series) = self.relabeler.apply(series) else {
                continue;
            };
            series.labels.retain(|label| label.name != REPLICA_LABEL);
            series
                .labels
                .push(Label::new(REPLICA_LABEL, replica.to_string()));
            self.store.append(tenant, series).await?;
            stored += 1;
        }

        metrics::counter!("conflux_ingested_series_total").increment(stored as u64);
        if stored < batch {
            metrics::counter!("conflux_relabel_dropped_series_total")
                .increment((batch - stored) as u64);
        }
        tracing::debug!(tenant, replica, batch, stored, "persisted write request");
        Ok(stored)
    }
}
