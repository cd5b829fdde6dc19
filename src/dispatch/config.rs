//! Dispatcher configuration

use std::time::Duration;

use crate::error::{Error, Result};
use crate::media::MediaType;

/// Default ring capacity
pub const DEFAULT_BASE_CAPACITY: usize = 100;

/// Default upper bound of the ring capacity
pub const DEFAULT_MAX_CAPACITY: usize = 500;

/// Default growth step
pub const DEFAULT_CAPACITY_INCREMENT: usize = 20;

/// Which media types the dispatcher carries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DataMode {
    /// Audio and video
    #[default]
    Av,
    /// Video frames only
    VideoOnly,
    /// Audio frames only
    AudioOnly,
}

impl DataMode {
    /// Whether frames of `media_type` may be written
    pub fn admits(&self, media_type: MediaType) -> bool {
        match self {
            DataMode::Av => true,
            DataMode::VideoOnly => media_type == MediaType::Video,
            DataMode::AudioOnly => media_type == MediaType::Audio,
        }
    }

    /// Whether the stream has to start on a video keyframe
    pub fn carries_video(&self) -> bool {
        !matches!(self, DataMode::AudioOnly)
    }
}

/// Dispatcher configuration options
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Capacity the ring starts with and shrinks back to
    pub base_capacity: usize,

    /// Upper bound on the ring length
    pub max_capacity: usize,

    /// Growth/shrink step
    pub capacity_increment: usize,

    /// Media types carried by this dispatcher
    pub data_mode: DataMode,

    /// Drop video until the first keyframe arrives
    pub wait_for_keyframe: bool,

    /// How long the producer may keep overwriting owed data before
    /// `DispatcherEvent::WriteTimeout` is raised
    pub write_timeout: Duration,

    /// Housekeeping worker period
    pub housekeeping_interval: Duration,

    /// Idle buffers kept per pool after housekeeping
    pub pool_limit: usize,

    /// Capacity of the dispatcher event channel
    pub event_capacity: usize,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            base_capacity: DEFAULT_BASE_CAPACITY,
            max_capacity: DEFAULT_MAX_CAPACITY,
            capacity_increment: DEFAULT_CAPACITY_INCREMENT,
            data_mode: DataMode::Av,
            wait_for_keyframe: true,
            write_timeout: Duration::from_secs(3),
            housekeeping_interval: Duration::from_millis(100),
            pool_limit: 16,
            event_capacity: 64,
        }
    }
}

impl DispatcherConfig {
    /// Set the starting (and minimum) capacity
    pub fn base_capacity(mut self, capacity: usize) -> Self {
        self.base_capacity = capacity;
        self
    }

    /// Set the maximum capacity
    pub fn max_capacity(mut self, capacity: usize) -> Self {
        self.max_capacity = capacity;
        self
    }

    /// Set the capacity growth step
    pub fn capacity_increment(mut self, increment: usize) -> Self {
        self.capacity_increment = increment;
        self
    }

    /// Set the data mode
    pub fn data_mode(mut self, mode: DataMode) -> Self {
        self.data_mode = mode;
        self
    }

    /// Admit video before the first keyframe
    pub fn disable_keyframe_wait(mut self) -> Self {
        self.wait_for_keyframe = false;
        self
    }

    /// Set the write stall timeout
    pub fn write_timeout(mut self, timeout: Duration) -> Self {
        self.write_timeout = timeout;
        self
    }

    /// Set the housekeeping period
    pub fn housekeeping_interval(mut self, interval: Duration) -> Self {
        self.housekeeping_interval = interval;
        self
    }

    /// Set the idle pool limit
    pub fn pool_limit(mut self, limit: usize) -> Self {
        self.pool_limit = limit;
        self
    }

    /// Check the capacity bounds
    pub fn validate(&self) -> Result<()> {
        if self.base_capacity == 0 {
            return Err(Error::Config("base capacity must be positive".into()));
        }
        if self.max_capacity < self.base_capacity {
            return Err(Error::Config(format!(
                "max capacity {} below base capacity {}",
                self.max_capacity, self.base_capacity
            )));
        }
        if self.housekeeping_interval.is_zero() {
            return Err(Error::Config("housekeeping interval must be positive".into()));
        }
        if self.event_capacity == 0 {
            return Err(Error::Config("event capacity must be positive".into()));
        }
        Ok(())
    }
}

/// Per-receiver options
#[derive(Debug, Clone)]
pub struct ReceiverOptions {
    /// Media types the receiver consumes
    pub media_type: MediaType,

    /// Read audio and video through one interleaved cursor
    pub mixed: bool,

    /// Start in key mode
    pub key_mode: bool,

    /// Capacity of the receiver event channel
    pub event_capacity: usize,
}

impl Default for ReceiverOptions {
    fn default() -> Self {
        Self {
            media_type: MediaType::Av,
            mixed: true,
            key_mode: false,
            event_capacity: 16,
        }
    }
}

impl ReceiverOptions {
    /// Receiver of a single media type
    pub fn only(media_type: MediaType) -> Self {
        Self {
            media_type,
            mixed: media_type == MediaType::Av,
            ..Default::default()
        }
    }

    /// Read audio and video through separate cursors
    pub fn separate_tracks(mut self) -> Self {
        self.mixed = false;
        self
    }

    /// Start in key mode
    pub fn key_mode(mut self, on: bool) -> Self {
        self.key_mode = on;
        self
    }
}
