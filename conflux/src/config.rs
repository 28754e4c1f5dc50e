use ingestor::RelabelRuleConfig;
use serde::Deserialize;
use std::fs::File;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("could not load config from file: {0}")]
    Load(#[from] std::io::Error),

    #[error("could not parse config: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("port cannot be 0")]
    InvalidPort,

    #[error("config has no `{0}` section")]
    MissingSection(&'static str),
}

/// Network listener configuration.
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct Listener {
    pub host: String,
    pub port: u16,
}

impl Listener {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.port == 0 {
            return Err(ConfigError::InvalidPort);
        }
        Ok(())
    }
}

fn default_reload_interval_secs() -> u64 {
    5
}

fn default_forward_timeout_ms() -> u64 {
    5_000
}

fn default_max_forward_hops() -> u32 {
    3
}

/// Configuration for the router role.
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct RouterConfig {
    pub listener: Listener,
    pub admin_listener: Listener,
    /// Ring topology file, watched for changes while running.
    pub ring_file: PathBuf,
    #[serde(default = "default_reload_interval_secs")]
    pub reload_interval_secs: u64,
    /// Deadline for one forwarded replica write.
    #[serde(default = "default_forward_timeout_ms")]
    pub forward_timeout_ms: u64,
    /// Requests that have passed through this many routers are rejected.
    #[serde(default = "default_max_forward_hops")]
    pub max_forward_hops: u32,
    /// Tenant assumed when the tenant header is absent.
    #[serde(default)]
    pub default_tenant: Option<String>,
}

/// Configuration for the ingestor role.
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct IngestorConfig {
    pub listener: Listener,
    pub admin_listener: Listener,
    #[serde(default)]
    pub default_tenant: Option<String>,
    /// Relabel rules applied before persistence, in order.
    #[serde(default)]
    pub relabel: Vec<RelabelRuleConfig>,
}

/// Top-level config file. One file can carry both role sections so a
/// deployment ships a single config; the subcommand picks the section.
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct Config {
    pub router: Option<RouterConfig>,
    pub ingestor: Option<IngestorConfig>,
}

impl Config {
    pub fn from_file(path: &std::path::Path) -> Result<Self, ConfigError> {
        let file = File::open(path)?;
        let config: Config = serde_yaml::from_reader(file)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if let Some(router) = &self.router {
            router.listener.validate()?;
            router.admin_listener.validate()?;
        }
        if let Some(ingestor) = &self.ingestor {
            ingestor.listener.validate()?;
            ingestor.admin_listener.validate()?;
        }
        Ok(())
    }

    pub fn router(self) -> Result<RouterConfig, ConfigError> {
        self.router.ok_or(ConfigError::MissingSection("router"))
    }

    pub fn ingestor(self) -> Result<IngestorConfig, ConfigError> {
        self.ingestor.ok_or(ConfigError::MissingSection("ingestor"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_tmp_file(s: &str) -> tempfile::NamedTempFile {
        let mut tmp = tempfile::NamedTempFile::new().expect("create temp file");
        write!(tmp, "{}", s).expect("write yaml");

        tmp
    }

    #[test]
    fn router_config() {
        let yaml = r#"
router:
    listener:
        host: 0.0.0.0
        port: 19291
    admin_listener:
        host: 127.0.0.1
        port: 19292
    ring_file: /etc/conflux/rings.yaml
    forward_timeout_ms: 2000
"#;
        let tmp = write_tmp_file(yaml);
        let config = Config::from_file(tmp.path()).expect("load config");
        let router = config.router().expect("router section");
        assert_eq!(router.listener.port, 19291);
        assert_eq!(router.forward_timeout_ms, 2000);
        // defaults
        assert_eq!(router.reload_interval_secs, 5);
        assert_eq!(router.max_forward_hops, 3);
        assert_eq!(router.default_tenant, None);
    }

    #[test]
    fn ingestor_config_with_relabel_rules() {
        let yaml = r#"
ingestor:
    listener:
        host: 0.0.0.0
        port: 19291
    admin_listener:
        host: 127.0.0.1
        port: 19292
    default_tenant: anonymous
    relabel:
        - action: label_drop
          pattern: "tmp_.*"
"#;
        let tmp = write_tmp_file(yaml);
        let config = Config::from_file(tmp.path()).expect("load config");
        let ingestor = config.ingestor().expect("ingestor section");
        assert_eq!(ingestor.default_tenant.as_deref(), Some("anonymous"));
        assert_eq!(ingestor.relabel.len(), 1);
    }

    #[test]
    fn rejects_zero_port() {
        let yaml = r#"
ingestor:
    listener:
        host: 0.0.0.0
        port: 0
    admin_listener:
        host: 127.0.0.1
        port: 19292
"#;
        let tmp = write_tmp_file(yaml);
        assert!(matches!(
            Config::from_file(tmp.path()),
            Err(ConfigError::InvalidPort)
        ));
    }

    #[test]
    fn missing_section_is_an_error() {
        let yaml = r#"
router:
    listener:
        host: 0.0.0.0
        port: 19291
    admin_listener:
        host: 127.0.0.1
        port: 19292
    ring_file: /etc/conflux/rings.yaml
"#;
        let tmp = write_tmp_file(yaml);
        let config = Config::from_file(tmp.path()).expect("load config");
        assert!(matches!(
            config.ingestor(),
            Err(ConfigError::MissingSection("ingestor"))
        ));
    }
}
