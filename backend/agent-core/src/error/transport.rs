use common::ErrorLocation;

use std::io::{Error as IoError, ErrorKind};
use std::panic::Location;

use thiserror::Error as ThisError;

#[derive(Debug, ThisError)]
pub enum TransportError {
    #[error("Bind Error: {message} {location}")]
    Bind {
        message: String,
        location: ErrorLocation,
    },

    #[error("Socket Error: {message} {location}")]
    Socket {
        message: String,
        location: ErrorLocation,
    },

    #[error("Already Running Error: {message} {location}")]
    AlreadyRunning {
        message: String,
        location: ErrorLocation,
    },

    #[error("Spawn Error: {message} {location}")]
    Spawn {
        message: String,
        location: ErrorLocation,
    },

    #[error("Send Error: {message} {location}")]
    Send {
        message: String,
        location: ErrorLocation,
    },

    #[error("Protobuf Decode Error: {message} {location}")]
    Decode {
        message: String,
        location: ErrorLocation,
    },

    #[error("Protobuf Encode Error: {message} {location}")]
    Encode {
        message: String,
        location: ErrorLocation,
    },

    #[error("Frame Too Large Error: declared {declared} bytes, limit {limit} {location}")]
    FrameTooLarge {
        declared: u64,
        limit: u64,
        location: ErrorLocation,
    },
}

impl TransportError {
    /// Classifies a failed `bind()` into [`TransportError::Bind`] when the port
    /// is unavailable and [`TransportError::Socket`] for anything else.
    #[track_caller]
    pub fn from_bind(address: &str, error: IoError) -> Self {
        let location = ErrorLocation::from(Location::caller());
        match error.kind() {
            ErrorKind::AddrInUse | ErrorKind::AddrNotAvailable | ErrorKind::PermissionDenied => {
                TransportError::Bind {
                    message: format!("Cannot bind {address}: {error}"),
                    location,
                }
            }
            _ => TransportError::Socket {
                message: format!("Failed to open listener on {address}: {error}"),
                location,
            },
        }
    }
}

impl From<IoError> for TransportError {
    #[track_caller]
    fn from(error: IoError) -> Self {
        TransportError::Socket {
            message: error.to_string(),
            location: ErrorLocation::from(Location::caller()),
        }
    }
}

impl From<prost::DecodeError> for TransportError {
    #[track_caller]
    fn from(error: prost::DecodeError) -> Self {
        TransportError::Decode {
            message: error.to_string(),
            location: ErrorLocation::from(Location::caller()),
        }
    }
}

impl From<prost::EncodeError> for TransportError {
    #[track_caller]
    fn from(error: prost::EncodeError) -> Self {
        TransportError::Encode {
            message: error.to_string(),
            location: ErrorLocation::from(Location::caller()),
        }
    }
}
