use hashring::Endpoint;
use std::collections::HashMap;
use std::sync::RwLock;

/// Tracks per-endpoint health from observed forward outcomes.
///
/// Endpoints start healthy when seeded from a ring snapshot and flip on
/// every forward result. The healthy count feeds the admin `/ready`
/// endpoint and a gauge, giving operators a convergence signal after
/// topology changes.
#[derive(Default)]
pub struct DownstreamHealth {
    inner: RwLock<HashMap<String, bool>>,
}

impl DownstreamHealth {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the endpoints of a freshly installed snapshot,
    /// dropping entries that no longer exist. Known endpoints keep
    /// their last observed state.
    pub fn seed(&self, endpoints: &[Endpoint]) {
        let mut inner = self.inner.write().expect("health lock poisoned");
        let mut next = HashMap::with_capacity(endpoints.len());
        for endpoint in endpoints {
            let state = inner.get(&endpoint.name).copied().unwrap_or(true);
            next.insert(endpoint.name.clone(), state);
        }
        *inner = next;
        drop(inner);
        self.publish_gauge();
    }

    pub fn record(&self, endpoint: &str, healthy: bool) {
        let mut inner = self.inner.write().expect("health lock poisoned");
        inner.insert(endpoint.to_string(), healthy);
        drop(inner);
        self.publish_gauge();
    }

    /// Count of downstreams whose last forward succeeded.
    pub fn healthy_count(&self) -> usize {
        self.inner
            .read()
            .expect("health lock poisoned")
            .values()
            .filter(|healthy| **healthy)
            .count()
    }

    pub fn tracked_count(&self) -> usize {
        self.inner.read().expect("health lock poisoned").len()
    }

    fn publish_gauge(&self) {
        metrics::gauge!("conflux_healthy_downstreams").set(self.healthy_count() as f64);
    }
}
