use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Thresholds governing the section-draft state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DraftPolicy {
    /// A diverging save blocks the draft once this many conflicts are open.
    pub blocked_after_open_conflicts: usize,
}

impl Default for DraftPolicy {
    fn default() -> Self {
        Self {
            blocked_after_open_conflicts: 3,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub data_dir: PathBuf,
    /// Maximum number of compiled template validators kept in memory.
    pub validator_cache_capacity: u64,
    pub drafts: DraftPolicy,
}

impl ServerConfig {
    /// Reads a TOML config file. Missing keys take their defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        let config: ServerConfig = toml::from_str(&content)
            .map_err(|e| Error::Config(format!("{}: {e}", path.display())))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.drafts.blocked_after_open_conflicts == 0 {
            return Err(Error::Config(
                "drafts.blocked_after_open_conflicts must be at least 1".to_string(),
            ));
        }
        if self.validator_cache_capacity == 0 {
            return Err(Error::Config(
                "validator_cache_capacity must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    pub fn socket_addr(&self) -> std::result::Result<SocketAddr, std::net::AddrParseError> {
        format!("{}:{}", self.host, self.port).parse()
    }

    #[must_use]
    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join("folio.db")
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
            data_dir: PathBuf::from("./data"),
            validator_cache_capacity: 256,
            drafts: DraftPolicy::default(),
        }
    }
}
