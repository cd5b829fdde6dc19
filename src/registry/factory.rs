//! Prosumer construction by name
//!
//! Producers and consumers (capture sources, encoders, packetizers, ...) are
//! registered once by the application under a name, then instantiated per
//! channel from configuration.

use std::collections::HashMap;
use std::sync::Arc;

use crate::dispatch::BufferDispatcher;
use crate::error::Result;

use super::error::RegistryError;
use super::key::ChannelKey;

/// A producer or consumer endpoint running on a channel
///
/// A producer writes into the dispatcher; a consumer attaches a
/// [`BufferReceiver`](crate::BufferReceiver) and reads from it.
pub trait Prosumer: Send + Sync {
    /// Name used in logs
    fn name(&self) -> &str;

    /// Start working on a channel
    fn start(&mut self, key: &ChannelKey, dispatcher: Arc<BufferDispatcher>) -> Result<()>;

    /// Stop and release the channel
    fn stop(&mut self);
}

/// Constructor stored in the factory
pub type ProsumerCtor = fn() -> Box<dyn Prosumer>;

/// Name to constructor map
#[derive(Debug, Clone, Default)]
pub struct ProsumerFactory {
    ctors: HashMap<String, ProsumerCtor>,
}

impl ProsumerFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a constructor, returning the one it replaces
    pub fn register(&mut self, name: impl Into<String>, ctor: ProsumerCtor) -> Option<ProsumerCtor> {
        self.ctors.insert(name.into(), ctor)
    }

    /// Builder form of [`register`](Self::register)
    pub fn with(mut self, name: impl Into<String>, ctor: ProsumerCtor) -> Self {
        self.register(name, ctor);
        self
    }

    /// Instantiate the prosumer registered under `name`
    pub fn create(&self, name: &str) -> std::result::Result<Box<dyn Prosumer>, RegistryError> {
        self.ctors
            .get(name)
            .map(|ctor| ctor())
            .ok_or_else(|| RegistryError::UnknownProsumer(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.ctors.contains_key(name)
    }

    /// Registered names, sorted
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.ctors.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.ctors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ctors.is_empty()
    }
}
