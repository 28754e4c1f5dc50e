use crate::ring::Hashring;
use arc_swap::ArcSwap;
use std::sync::Arc;

/// Holds the current [`Hashring`] snapshot behind an atomic pointer.
///
/// Readers load the pointer without locking and keep their `Arc` for the
/// lifetime of the request, so an install never changes the topology a
/// request already resolved against. Injected as an explicit dependency
/// of the router rather than accessed as a global.
pub struct RingProvider {
    current: ArcSwap<Hashring>,
}

impl RingProvider {
    pub fn new(initial: Hashring) -> Self {
        Self {
            current: ArcSwap::from_pointee(initial),
        }
    }

    /// Non-blocking read of the latest installed snapshot.
    pub fn current(&self) -> Arc<Hashring> {
        self.current.load_full()
    }

    /// Atomically replaces the snapshot. In-flight requests keep the
    /// reference they captured at start.
    pub fn install(&self, ring: Hashring) {
        self.current.store(Arc::new(ring));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RingFile;
    use shared::wire::Label;

    fn ring(address: &str) -> Hashring {
        let yaml = format!(
            "rings:\n    - replication_factor: 1\n      endpoints:\n          - address: \"{address}\"\n"
        );
        Hashring::from_config(&RingFile::from_yaml(&yaml).unwrap()).unwrap()
    }

    #[test]
    fn install_swaps_while_held_snapshots_stay_valid() {
        let provider = RingProvider::new(ring("http://old:1"));
        let held = provider.current();

        provider.install(ring("http://new:1"));

        let labels = vec![Label::new("a", "1")];
        let old_set = held.resolve("t", &labels).unwrap();
        assert_eq!(old_set.candidates[0].identity(), "http://old:1/");

        let new_set = provider.current().resolve("t", &labels).unwrap();
        assert_eq!(new_set.candidates[0].identity(), "http://new:1/");
    }
}
