//! Channel entry and state types
//!
//! This module defines the per-channel state stored in the registry.

use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::dispatch::BufferDispatcher;
use crate::stats::DispatcherStats;

use super::factory::Prosumer;

/// State of a channel entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    /// Receivers or prosumers are attached
    Active,
    /// Nothing attached, waiting for cleanup
    Idle,
}

/// Entry for a single channel in the registry
pub struct ChannelEntry {
    /// The channel's dispatcher
    pub dispatcher: Arc<BufferDispatcher>,

    /// Prosumers started on this channel
    pub(super) prosumers: Vec<Box<dyn Prosumer>>,

    /// When the channel was last seen without receivers or prosumers
    pub idle_since: Option<Instant>,

    /// When the channel was created
    pub created_at: Instant,
}

impl ChannelEntry {
    pub(super) fn new(dispatcher: Arc<BufferDispatcher>) -> Self {
        Self {
            dispatcher,
            prosumers: Vec::new(),
            idle_since: None,
            created_at: Instant::now(),
        }
    }

    /// Current state, derived from what is attached
    pub fn state(&self) -> ChannelState {
        if self.prosumers.is_empty() && self.dispatcher.receiver_count() == 0 {
            ChannelState::Idle
        } else {
            ChannelState::Active
        }
    }

    /// Names of the prosumers running on this channel
    pub fn prosumer_names(&self) -> Vec<String> {
        self.prosumers.iter().map(|p| p.name().to_string()).collect()
    }

    /// Update idle tracking; returns how long the channel has been idle
    pub(super) fn refresh_idle(&mut self, now: Instant) -> Option<Duration> {
        match self.state() {
            ChannelState::Active => {
                self.idle_since = None;
                None
            }
            ChannelState::Idle => {
                let since = *self.idle_since.get_or_insert(now);
                Some(now.duration_since(since))
            }
        }
    }

    /// Stop every prosumer, then the dispatcher
    pub(super) fn shutdown(&mut self) {
        for prosumer in self.prosumers.iter_mut() {
            prosumer.stop();
        }
        self.prosumers.clear();
        self.dispatcher.stop_dispatch();
    }
}

/// Statistics for a channel
#[derive(Debug, Clone)]
pub struct ChannelStats {
    /// Current channel state
    pub state: ChannelState,
    /// Prosumers running on the channel
    pub prosumers: Vec<String>,
    /// Time since the channel was created
    pub age: Duration,
    /// Dispatcher snapshot
    pub dispatcher: DispatcherStats,
}
