//! Where the host keeps its config file and logs.

use crate::error::HostlinkError;

use common::ErrorLocation;

use std::panic::Location;
use std::path::{Path, PathBuf};

const APP_DIR_NAME: &str = "hostlink";
const LOG_DIR_NAME: &str = "logs";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostPaths {
    pub config_dir: PathBuf,
    pub log_dir: PathBuf,
}

impl HostPaths {
    /// Uses `base` for both config and logs (`base/logs`) when given, the
    /// platform directories otherwise.
    ///
    /// # Errors
    ///
    /// Returns [`HostlinkError::Hostlink`] if no base is given and the platform
    /// has no config or data directory.
    pub fn resolve(base: Option<&Path>) -> Result<Self, HostlinkError> {
        if let Some(base) = base {
            return Ok(Self::under(base));
        }

        let config_dir = dirs::config_dir().ok_or_else(|| missing_dir("config"))?;
        let data_dir = dirs::data_local_dir().ok_or_else(|| missing_dir("local data"))?;

        Ok(Self {
            config_dir: config_dir.join(APP_DIR_NAME),
            log_dir: data_dir.join(APP_DIR_NAME).join(LOG_DIR_NAME),
        })
    }

    pub fn under(base: &Path) -> Self {
        Self {
            config_dir: base.to_path_buf(),
            log_dir: base.join(LOG_DIR_NAME),
        }
    }
}

#[track_caller]
fn missing_dir(kind: &str) -> HostlinkError {
    HostlinkError::Hostlink {
        message: format!("No {kind} directory on this platform; pass a base directory"),
        location: ErrorLocation::from(Location::caller()),
    }
}
