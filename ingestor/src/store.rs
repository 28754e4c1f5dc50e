use async_trait::async_trait;
use shared::wire::{Sample, Series};
use std::collections::HashMap;
use std::sync::RwLock;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("storage rejected write: {0}")]
    Rejected(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Exact-match label selector for the read contract.
#[derive(Clone, Debug)]
pub struct LabelMatcher {
    pub name: String,
    pub value: String,
}

impl LabelMatcher {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// Storage collaborator seam. The real time-series engine lives behind
/// this trait; the read side is the narrow series-read contract
/// downstream consumers use (tenant + time range + matchers).
#[async_trait]
pub trait SeriesStore: Send + Sync {
    /// Persists one relabeled series under the tenant partition,
    /// merging samples into any existing series with the same labels.
    async fn append(&self, tenant: &str, series: Series) -> Result<(), StoreError>;

    /// Series for one tenant whose labels satisfy every matcher, with
    /// samples restricted to `[min_timestamp_ms, max_timestamp_ms]`.
    async fn query(
        &self,
        tenant: &str,
        matchers: &[LabelMatcher],
        min_timestamp_ms: i64,
        max_timestamp_ms: i64,
    ) -> Result<Vec<Series>, StoreError>;
}

/// In-memory store: per-tenant map keyed by the sorted label set.
/// Samples with an existing timestamp are overwritten, which is what
/// makes caller-side retries of quorum-failed writes safe.
#[derive(Default)]
pub struct MemStore {
    inner: RwLock<HashMap<String, HashMap<String, Series>>>,
}

impl MemStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn series_key(series: &Series) -> String {
        let mut labels: Vec<_> = series
            .labels
            .iter()
            .map(|l| format!("{}={}", l.name, l.value))
            .collect();
        labels.sort();
        labels.join(",")
    }

    /// Number of distinct series stored for a tenant.
    pub fn series_count(&self, tenant: &str) -> usize {
        self.inner
            .read()
            .expect("store lock poisoned")
            .get(tenant)
            .map(|series| series.len())
            .unwrap_or(0)
    }
}

#[async_trait]
impl SeriesStore for MemStore {
    async fn append(&self, tenant: &str, series: Series) -> Result<(), StoreError> {
        let key = Self::series_key(&series);
        let mut inner = self.inner.write().expect("store lock poisoned");
        let tenant_series = inner.entry(tenant.to_string()).or_default();

        match tenant_series.get_mut(&key) {
            Some(existing) => {
                for sample in series.samples {
                    match existing
                        .samples
                        .iter_mut()
                        .find(|s| s.timestamp_ms == sample.timestamp_ms)
                    {
                        Some(slot) => *slot = sample,
                        None => existing.samples.push(sample),
                    }
                }
                existing
                    .samples
                    .sort_by_key(|sample: &Sample| sample.timestamp_ms);
            }
            None => {
                tenant_series.insert(key, series);
            }
        }
        Ok(())
    }

    async fn query(
        &self,
        tenant: &str,
        matchers: &[LabelMatcher],
        min_timestamp_ms: i64,
        max_timestamp_ms: i64,
    ) -> Result<Vec<Series>, StoreError> {
        let inner = self.inner.read().expect("store lock poisoned");
        let Some(tenant_series) = inner.get(tenant) else {
            return Ok(Vec::new());
        };

        let mut result = Vec::new();
        for series in tenant_series.values() {
            let matches = matchers
                .iter()
                .all(|matcher| series.label(&matcher.name) == Some(matcher.value.as_str()));
            if !matches {
                continue;
            }

            let samples: Vec<Sample> = series
                .samples
                .iter()
                .copied()
                .filter(|s| s.timestamp_ms >= min_timestamp_ms && s.timestamp_ms <= max_timestamp_ms)
                .collect();
            if !samples.is_empty() {
                result.push(Series {
                    labels: series.labels.clone(),
                    samples,
                });
            }
        }
        Ok(result)
    }
}
