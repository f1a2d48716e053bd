use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{DekError, DekResult};
use crate::PERSONA_MAX;

/// Top-level configuration (loaded from config.toml)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DekConfig {
    pub daemon: DaemonConfig,
    pub keystore: KeystoreConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    /// Unix socket path for the control protocol (default: /run/dekd/dekd.sock)
    pub socket: PathBuf,
    /// Prometheus metrics endpoint (default: 127.0.0.1:9110)
    pub metrics_addr: Option<String>,
    /// Log level (default: info)
    pub log_level: String,
    /// Log format: "json" or "text"
    pub log_format: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KeystoreConfig {
    /// Maximum number of concurrently known personas (at most 10)
    pub max_personas: usize,
    /// Highest accepted persona id
    pub max_persona_id: u32,
    /// Persona registry (public KEKs only) restored at boot
    pub registry_path: Option<PathBuf>,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            socket: PathBuf::from("/run/dekd/dekd.sock"),
            metrics_addr: Some("127.0.0.1:9110".into()),
            log_level: "info".into(),
            log_format: "json".into(),
        }
    }
}

impl Default for KeystoreConfig {
    fn default() -> Self {
        Self {
            max_personas: PERSONA_MAX,
            max_persona_id: 199,
            registry_path: None,
        }
    }
}

impl KeystoreConfig {
    /// Persona table capacity, clamped to `1..=PERSONA_MAX`.
    pub fn capacity(&self) -> usize {
        if self.max_personas > PERSONA_MAX {
            tracing::warn!(
                configured = self.max_personas,
                max = PERSONA_MAX,
                "max_personas above hard limit, clamping"
            );
        }
        self.max_personas.clamp(1, PERSONA_MAX)
    }
}

impl DekConfig {
    /// Parse a config file. A missing file yields the defaults.
    pub fn load(path: &Path) -> DekResult<Self> {
        if !path.exists() {
            tracing::warn!("config file not found: {}  (using defaults)", path.display());
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content)
            .map_err(|e| DekError::Config(format!("parsing {}: {e}", path.display())))
    }
}
