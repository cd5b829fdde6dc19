//! Registry error types
//!
//! Error types for channel registry operations.

use super::key::ChannelKey;

/// Error type for registry operations
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    /// Channel not found
    ChannelNotFound(ChannelKey),
    /// Channel already exists
    ChannelExists(ChannelKey),
    /// No constructor registered under this name
    UnknownProsumer(String),
    /// Prosumer failed to start on a channel
    ProsumerStart {
        name: String,
        reason: String,
    },
}

impl std::fmt::Display for RegistryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RegistryError::ChannelNotFound(key) => write!(f, "Channel not found: {}", key),
            RegistryError::ChannelExists(key) => write!(f, "Channel already exists: {}", key),
            RegistryError::UnknownProsumer(name) => write!(f, "Unknown prosumer: {}", name),
            RegistryError::ProsumerStart { name, reason } => {
                write!(f, "Prosumer {} failed to start: {}", name, reason)
            }
        }
    }
}

impl std::error::Error for RegistryError {}
