//! Error types
//!
//! All failures are reported through `Result`. Capacity pressure is never an
//! error: frames are dropped according to the eviction policy and only show
//! up in statistics and logs.

use crate::dispatch::ReceiverId;
use crate::media::MediaType;
use crate::registry::RegistryError;

/// Result alias used throughout the crate
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error type
#[derive(Debug, Clone)]
pub enum Error {
    /// Buffer dispatch failure
    Dispatch(DispatchError),
    /// Channel registry failure
    Registry(RegistryError),
    /// Invalid configuration
    Config(String),
    /// Worker thread could not be spawned
    Spawn(String),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::Dispatch(e) => write!(f, "Dispatch error: {}", e),
            Error::Registry(e) => write!(f, "Registry error: {}", e),
            Error::Config(msg) => write!(f, "Invalid configuration: {}", msg),
            Error::Spawn(msg) => write!(f, "Failed to spawn worker: {}", msg),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Dispatch(e) => Some(e),
            Error::Registry(e) => Some(e),
            _ => None,
        }
    }
}

impl From<DispatchError> for Error {
    fn from(e: DispatchError) -> Self {
        Error::Dispatch(e)
    }
}

impl From<RegistryError> for Error {
    fn from(e: RegistryError) -> Self {
        Error::Registry(e)
    }
}

/// Errors raised by the buffer dispatcher and its receivers
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchError {
    /// Argument rejected (empty payload, zero-sized request, ...)
    InvalidArgument(&'static str),
    /// Receiver is already bound to a dispatcher
    AlreadyAttached(ReceiverId),
    /// Receiver id is not registered with this dispatcher
    ReceiverNotFound(ReceiverId),
    /// Receiver handle has not been attached yet
    NotAttached,
    /// Media type is excluded by the dispatcher data mode
    MediaTypeExcluded(MediaType),
    /// Dispatcher has been stopped
    Stopped,
    /// Reads were cancelled through `notify_read_stop`
    ReadStopped,
}

impl std::fmt::Display for DispatchError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DispatchError::InvalidArgument(what) => write!(f, "Invalid argument: {}", what),
            DispatchError::AlreadyAttached(id) => {
                write!(f, "Receiver already attached with id {}", id)
            }
            DispatchError::ReceiverNotFound(id) => write!(f, "Receiver not found: {}", id),
            DispatchError::NotAttached => write!(f, "Receiver is not attached"),
            DispatchError::MediaTypeExcluded(ty) => {
                write!(f, "Media type {:?} excluded by data mode", ty)
            }
            DispatchError::Stopped => write!(f, "Dispatcher stopped"),
            DispatchError::ReadStopped => write!(f, "Read stopped"),
        }
    }
}

impl std::error::Error for DispatchError {}
