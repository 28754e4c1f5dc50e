use crate::coordinator::ReplicationCoordinator;
use crate::errors::RouterError;
use hashring::{CandidateSet, RingProvider, ResolveError};
use indexmap::IndexMap;
use shared::wire::{Series, WireCodec, WriteRequest};
use std::sync::Arc;
use tokio::task::JoinSet;

/// Request entry point of the write path.
///
/// Splits an incoming batch by resolved candidate set, runs one
/// replication attempt per distinct set, and aggregates the outcomes
/// into a single result: the whole batch fails if any series group
/// misses quorum. Some groups may already have persisted by then; that
/// partial persistence is an accepted trade-off and the caller owns the
/// retry.
pub struct Router {
    provider: Arc<RingProvider>,
    coordinator: ReplicationCoordinator,
    codec: WireCodec,
    max_forward_hops: u32,
}

impl Router {
    pub fn new(
        provider: Arc<RingProvider>,
        coordinator: ReplicationCoordinator,
        max_forward_hops: u32,
    ) -> Self {
        Self {
            provider,
            coordinator,
            codec: WireCodec::default(),
            max_forward_hops,
        }
    }

    /// Forwards one write batch for one tenant. `hops` is the count of
    /// routers this request has already passed through.
    pub async fn forward(
        &self,
        tenant: &str,
        request: WriteRequest,
        hops: u32,
    ) -> Result<(), RouterError> {
        if hops >= self.max_forward_hops {
            metrics::counter!("conflux_hop_limit_rejections_total").increment(1);
            return Err(RouterError::HopLimitExceeded(hops));
        }
        if request.series.is_empty() {
            return Ok(());
        }

        // capture one snapshot for the whole request
        let ring = self.provider.current();

        let mut groups: IndexMap<String, (CandidateSet, Vec<Series>)> = IndexMap::new();
        for series in request.series {
            let set = ring
                .resolve(tenant, &series.labels)
                .map_err(|error| match error {
                    ResolveError::NoMatchingRing(tenant) => RouterError::TenantRouting(tenant),
                    ResolveError::DepthExceeded => RouterError::Internal(error.to_string()),
                })?;
            if set.is_degraded() {
                metrics::counter!("conflux_degraded_resolutions_total").increment(1);
                tracing::warn!(
                    tenant,
                    available = set.candidates.len(),
                    replication_factor = set.replication_factor,
                    "fewer distinct destinations than replication factor"
                );
            }
            groups
                .entry(set.signature())
                .or_insert_with(|| (set, Vec::new()))
                .1
                .push(series);
        }

        tracing::debug!(tenant, groups = groups.len(), hops, "dispatching write");
        metrics::counter!("conflux_forwarded_batches_total").increment(1);

        let mut join_set = JoinSet::new();
        for (_, (set, series)) in groups {
            let body = self.codec.encode(&WriteRequest { series })?;
            let coordinator = self.coordinator.clone();
            let tenant = tenant.to_string();
            let next_hops = hops + 1;
            join_set
                .spawn(async move { coordinator.replicate(&tenant, set, body, next_hops).await });
        }

        // atomic-per-request: the first failed group fails the batch
        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok(Ok(())) => {}
                Ok(Err(error)) => return Err(error),
                Err(join_error) => {
                    return Err(RouterError::Internal(format!(
                        "replication task panicked: {join_error}"
                    )));
                }
            }
        }
        Ok(())
    }

    /// Current ring snapshot.
    pub fn ring(&self) -> Arc<hashring::Hashring> {
        self.provider.current()
    }
}
