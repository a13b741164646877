use agent_core::error::CoreError;
use agent_core::error::config::ConfigError;

use common::ErrorLocation;

use std::panic::Location;

use thiserror::Error;

/// Errors that stop the host before or while it starts.
///
/// Library errors are flattened to their message here; the location is where
/// the host received them.
#[derive(Debug, Error)]
pub enum HostlinkError {
    /// Error from this App
    #[error("Hostlink Error: {message} {location}")]
    Hostlink {
        message: String,
        location: ErrorLocation,
    },

    /// Error from agent-core while starting the exchange
    #[error("Core Error: {message} {location}")]
    Core {
        message: String,
        location: ErrorLocation,
    },

    /// Config could not be loaded or overridden
    #[error("Config Error: {message} {location}")]
    Config {
        message: String,
        location: ErrorLocation,
    },
}

impl From<CoreError> for HostlinkError {
    #[track_caller]
    fn from(error: CoreError) -> Self {
        HostlinkError::Core {
            message: error.to_string(),
            location: ErrorLocation::from(Location::caller()),
        }
    }
}

impl From<ConfigError> for HostlinkError {
    #[track_caller]
    fn from(error: ConfigError) -> Self {
        HostlinkError::Config {
            message: error.to_string(),
            location: ErrorLocation::from(Location::caller()),
        }
    }
}
