use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

use cfam_common::access::DEFAULT_SYSFS_ROOT;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("unable to read config file '{path}': {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config file '{path}': {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Daemon settings. Every field is optional in the file.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DaemonConfig {
    pub sysfs_root: PathBuf,
    pub local_link: usize,
    /// `null` turns off the sibling reader.
    pub sibling_link: Option<usize>,
    pub poll_interval_ms: u64,
    pub heartbeat_interval_ms: u64,
    pub cfam_wait_timeout_secs: u64,
    pub cfam_wait_poll_ms: u64,
    pub os_release: PathBuf,
    /// Taken from the u-boot environment when not set.
    pub bmc_position: Option<u32>,
    pub state_file: PathBuf,
    pub sibling_view_file: PathBuf,
    /// Retry failed sibling register reads once, like the local writer does.
    pub sibling_read_retry: bool,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            sysfs_root: PathBuf::from(DEFAULT_SYSFS_ROOT),
            local_link: 0,
            sibling_link: Some(1),
            poll_interval_ms: 2000,
            heartbeat_interval_ms: 1000,
            cfam_wait_timeout_secs: 300,
            cfam_wait_poll_ms: 1000,
            os_release: PathBuf::from("/etc/os-release"),
            bmc_position: None,
            state_file: PathBuf::from("/run/rbmc/state.json"),
            sibling_view_file: PathBuf::from("/run/rbmc/sibling.json"),
            sibling_read_retry: false,
        }
    }
}

impl DaemonConfig {
    /// Loads and validates the config, or the defaults when there is no file.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.validate()?;
        Ok(config)
    }

    fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.poll_interval_ms == 0 || self.heartbeat_interval_ms == 0 || self.cfam_wait_poll_ms == 0 {
            return Err(ConfigError::Invalid("intervals must be non-zero".into()));
        }

        if self.sibling_link == Some(self.local_link) {
            return Err(ConfigError::Invalid(format!(
                "local and sibling CFAMs can't both be on link {}",
                self.local_link
            )));
        }

        // The sibling only sees us alive if the heartbeat moves between two
        // of its polls.
        if self.heartbeat_interval_ms >= self.poll_interval_ms {
            return Err(ConfigError::Invalid(format!(
                "heartbeat interval {}ms must be shorter than the poll interval {}ms",
                self.heartbeat_interval_ms, self.poll_interval_ms
            )));
        }

        Ok(())
    }
}
