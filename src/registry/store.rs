//! Channel registry implementation
//!
//! The central registry that owns one dispatcher per media channel and the
//! prosumers running on it.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::{mpsc, RwLock};

use crate::dispatch::{BufferDispatcher, DispatcherConfig, DispatcherEvent};
use crate::error::Result;

use super::config::RegistryConfig;
use super::entry::{ChannelEntry, ChannelStats};
use super::error::RegistryError;
use super::factory::ProsumerFactory;
use super::key::ChannelKey;

/// Central registry for all media channels
///
/// Thread-safe via `RwLock`. Lookups of a channel's dispatcher only take the
/// read side.
pub struct ChannelRegistry {
    /// Map of channel key to channel entry
    channels: RwLock<HashMap<ChannelKey, Arc<RwLock<ChannelEntry>>>>,

    /// Prosumer constructors
    factory: ProsumerFactory,

    /// Configuration
    config: RegistryConfig,
}

impl ChannelRegistry {
    /// Create a new channel registry with default configuration
    pub fn new(factory: ProsumerFactory) -> Self {
        Self::with_config(RegistryConfig::default(), factory)
    }

    /// Create a new channel registry with custom configuration
    pub fn with_config(config: RegistryConfig, factory: ProsumerFactory) -> Self {
        Self {
            channels: RwLock::new(HashMap::new()),
            factory,
            config,
        }
    }

    /// Get the registry configuration
    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    pub fn factory(&self) -> &ProsumerFactory {
        &self.factory
    }

    /// Create a channel with the registry's dispatcher configuration
    ///
    /// Returns the dispatcher and its event receiver.
    pub async fn create_channel(
        &self,
        key: &ChannelKey,
    ) -> Result<(Arc<BufferDispatcher>, mpsc::Receiver<DispatcherEvent>)> {
        self.create_channel_with(key, self.config.dispatcher.clone())
            .await
    }

    /// Create a channel with its own dispatcher configuration
    pub async fn create_channel_with(
        &self,
        key: &ChannelKey,
        config: DispatcherConfig,
    ) -> Result<(Arc<BufferDispatcher>, mpsc::Receiver<DispatcherEvent>)> {
        let mut channels = self.channels.write().await;
        if channels.contains_key(key) {
            return Err(RegistryError::ChannelExists(key.clone()).into());
        }

        let (dispatcher, events) = BufferDispatcher::new(config)?;
        let dispatcher = Arc::new(dispatcher);
        channels.insert(
            key.clone(),
            Arc::new(RwLock::new(ChannelEntry::new(Arc::clone(&dispatcher)))),
        );

        tracing::info!(channel = %key, channels = channels.len(), "Channel created");
        Ok((dispatcher, events))
    }

    /// Get a channel's dispatcher
    pub async fn channel(&self, key: &ChannelKey) -> Option<Arc<BufferDispatcher>> {
        let channels = self.channels.read().await;
        let entry_arc = channels.get(key)?;
        let entry = entry_arc.read().await;
        Some(Arc::clone(&entry.dispatcher))
    }

    /// Check if a channel exists
    pub async fn channel_exists(&self, key: &ChannelKey) -> bool {
        self.channels.read().await.contains_key(key)
    }

    /// Remove a channel, stopping its prosumers and dispatcher
    pub async fn destroy_channel(&self, key: &ChannelKey) -> Result<()> {
        let entry_arc = self
            .channels
            .write()
            .await
            .remove(key)
            .ok_or_else(|| RegistryError::ChannelNotFound(key.clone()))?;

        let prosumers = shutdown_entry(entry_arc).await;

        tracing::info!(channel = %key, prosumers = prosumers, "Channel destroyed");
        Ok(())
    }

    /// Build the prosumer registered as `name` and start it on a channel
    pub async fn spawn_prosumer(&self, key: &ChannelKey, name: &str) -> Result<()> {
        let mut prosumer = self.factory.create(name)?;

        let channels = self.channels.read().await;
        let entry_arc = channels
            .get(key)
            .ok_or_else(|| RegistryError::ChannelNotFound(key.clone()))?;
        let mut entry = entry_arc.write().await;

        prosumer
            .start(key, Arc::clone(&entry.dispatcher))
            .map_err(|e| RegistryError::ProsumerStart {
                name: name.to_string(),
                reason: e.to_string(),
            })?;
        entry.prosumers.push(prosumer);

        tracing::info!(
            channel = %key,
            prosumer = name,
            prosumers = entry.prosumers.len(),
            "Prosumer started"
        );
        Ok(())
    }

    /// Get channel statistics
    pub async fn channel_stats(&self, key: &ChannelKey) -> Option<ChannelStats> {
        let channels = self.channels.read().await;
        let entry = channels.get(key)?.read().await;

        Some(ChannelStats {
            state: entry.state(),
            prosumers: entry.prosumer_names(),
            age: entry.created_at.elapsed(),
            dispatcher: entry.dispatcher.stats(),
        })
    }

    /// Get total number of channels
    pub async fn channel_count(&self) -> usize {
        self.channels.read().await.len()
    }

    /// Run cleanup task once
    ///
    /// Removes channels that have had no receivers and no prosumers for
    /// longer than `idle_channel_timeout`.
    pub async fn cleanup(&self) {
        let removed: Vec<(ChannelKey, Arc<RwLock<ChannelEntry>>)> = {
            let mut channels = self.channels.write().await;
            let now = Instant::now();

            let keys_to_remove: Vec<ChannelKey> = channels
                .iter()
                .filter_map(|(key, entry_arc)| {
                    // Skip entries that are busy right now
                    let mut entry = entry_arc.try_write().ok()?;
                    let idle_for = entry.refresh_idle(now)?;
                    (idle_for > self.config.idle_channel_timeout).then(|| key.clone())
                })
                .collect();

            keys_to_remove
                .into_iter()
                .filter_map(|key| channels.remove(&key).map(|entry| (key, entry)))
                .collect()
        };

        for (key, entry_arc) in removed {
            shutdown_entry(entry_arc).await;
            tracing::info!(channel = %key, "Channel removed by cleanup");
        }
    }

    /// Spawn background cleanup task
    ///
    /// Returns a handle that can be used to abort the task.
    pub fn spawn_cleanup_task(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let registry = Arc::clone(self);
        let interval = registry.config.cleanup_interval;

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                registry.cleanup().await;
            }
        })
    }
}

/// Stop a removed channel on the blocking pool
///
/// Prosumer stops and the dispatcher's worker join may block, so they never
/// run on a runtime thread. Returns the number of prosumers stopped.
async fn shutdown_entry(entry_arc: Arc<RwLock<ChannelEntry>>) -> usize {
    let stopped = tokio::task::spawn_blocking(move || {
        let mut entry = entry_arc.blocking_write();
        let prosumers = entry.prosumers.len();
        entry.shutdown();
        prosumers
    })
    .await;

    match stopped {
        Ok(prosumers) => prosumers,
        Err(e) => {
            tracing::error!(error = %e, "Channel shutdown task failed");
            0
        }
    }
}

impl Default for ChannelRegistry {
    fn default() -> Self {
        Self::new(ProsumerFactory::default())
    }
}
