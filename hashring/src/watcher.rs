use crate::config::{ConfigError, RingFile};
use crate::provider::RingProvider;
use crate::ring::Hashring;
use std::hash::Hasher;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use twox_hash::XxHash64;

/// Polls the ring config file and installs valid changes.
///
/// An invalid change is logged and counted; the previously installed
/// snapshot stays active, so a bad edit never takes the write path down.
pub struct RingWatcher {
    path: PathBuf,
    interval: Duration,
    provider: Arc<RingProvider>,
    last_fingerprint: Option<u64>,
    on_install: Option<Box<dyn Fn(&Hashring) + Send + Sync>>,
}

impl RingWatcher {
    pub fn new(path: PathBuf, interval: Duration, provider: Arc<RingProvider>) -> Self {
        Self {
            path,
            interval,
            provider,
            last_fingerprint: None,
            on_install: None,
        }
    }

    /// Registers a hook run on every successful install, with the new
    /// snapshot. The router uses this to re-seed downstream health so
    /// endpoints dropped from the ring stop counting toward readiness.
    pub fn on_install(mut self, hook: impl Fn(&Hashring) + Send + Sync + 'static) -> Self {
        self.on_install = Some(Box::new(hook));
        self
    }

    /// Runs the poll loop until the task is dropped.
    pub async fn run(mut self) {
        let mut ticker = tokio::time::interval(self.interval);
        // the process loaded the config at boot; skip the immediate tick
        ticker.tick().await;

        loop {
            ticker.tick().await;
            match self.poll() {
                Ok(true) => {}
                Ok(false) => {}
                Err(error) => {
                    metrics::counter!("conflux_ring_reload_failures_total").increment(1);
                    tracing::error!(
                        path = %self.path.display(),
                        %error,
                        "ring config reload failed, keeping previous snapshot"
                    );
                }
            }
        }
    }

    /// Reads the file once; installs a new snapshot if the contents
    /// changed and are valid. Returns whether an install happened.
    pub fn poll(&mut self) -> Result<bool, ConfigError> {
        let contents = std::fs::read_to_string(&self.path)?;

        let mut hasher = XxHash64::with_seed(0);
        hasher.write(contents.as_bytes());
        let fingerprint = hasher.finish();
        if self.last_fingerprint == Some(fingerprint) {
            return Ok(false);
        }

        let file = RingFile::from_yaml(&contents)?;
        let ring = Hashring::from_config(&file)?;
        if let Some(hook) = &self.on_install {
            hook(&ring);
        }
        self.provider.install(ring);
        self.last_fingerprint = Some(fingerprint);

        metrics::counter!("conflux_ring_reloads_total").increment(1);
        tracing::info!(path = %self.path.display(), "installed new hashring snapshot");
        Ok(true)
    }
}
