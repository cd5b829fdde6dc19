//! Statistics snapshots for dispatchers and receivers

use crate::dispatch::ReceiverId;

/// Running counters kept by a dispatcher
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchCounters {
    /// Frames written to the ring
    pub frames_written: u64,
    /// Frames refused by the data mode
    pub frames_rejected: u64,
    /// Video frames dropped while waiting for the first keyframe
    pub frames_dropped_waiting_key: u64,
    /// Unowed slots reclaimed from the head
    pub slots_reclaimed: u64,
    /// Whole GOPs erased under pressure
    pub gops_erased: u64,
    /// Single slots force-deleted inside one GOP
    pub slots_force_deleted: u64,
    /// Evicted slots some receiver had not read yet
    pub owed_slots_dropped: u64,
    /// Capacity increases
    pub capacity_grown: u64,
    /// Capacity decreases
    pub capacity_shrunk: u64,
    /// Write timeout events raised
    pub write_timeouts: u64,
}

/// Dispatcher-wide snapshot
#[derive(Debug, Clone, Default)]
pub struct DispatcherStats {
    /// Slots currently buffered
    pub buffered: usize,
    /// Current capacity bound
    pub capacity: usize,
    pub base_capacity: usize,
    pub max_capacity: usize,
    /// Index of the oldest buffered slot
    pub head_index: u64,
    /// Index the next write receives
    pub next_index: u64,
    /// Keyframes in the ring
    pub keyframes_buffered: usize,
    /// Attached receivers
    pub receivers: usize,
    /// Still dropping video until the first keyframe
    pub waiting_key: bool,
    /// Payload buffers handed out from the pools
    pub buffers_reused: u64,
    /// Payload buffers freshly allocated
    pub buffers_allocated: u64,
    pub counters: DispatchCounters,
}

impl DispatcherStats {
    /// Fill level of the ring (0.0 - 1.0)
    pub fn utilization(&self) -> f64 {
        if self.capacity == 0 {
            return 0.0;
        }
        self.buffered as f64 / self.capacity as f64
    }

    /// Whether the ring has grown beyond its base capacity
    pub fn is_expanded(&self) -> bool {
        self.capacity > self.base_capacity
    }

    /// Share of written frames that were dropped before any receiver read
    /// them
    pub fn loss_ratio(&self) -> f64 {
        if self.counters.frames_written == 0 {
            return 0.0;
        }
        self.counters.owed_slots_dropped as f64 / self.counters.frames_written as f64
    }
}

/// Per-receiver snapshot
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceiverStats {
    pub id: ReceiverId,
    /// Next index the receiver examines for video
    pub cursor: u64,
    /// Buffered slots it has not consumed yet
    pub owed: usize,
    /// Frames delivered
    pub delivered: u64,
    /// Owed frames skipped or evicted before delivery
    pub released: u64,
    pub key_mode: bool,
    pub key_redirect: bool,
    pub need_acceleration: bool,
    /// A read is blocked waiting for data
    pub blocked: bool,
}
