//! Per-receiver cursor and wake state
//!
//! A [`DataNotifier`] lives inside the dispatcher state, one per attached
//! receiver, and is only touched with the dispatcher lock held. The condition
//! variable it shares with the bound [`BufferReceiver`](super::BufferReceiver)
//! carries nothing but the wake signal; readers always re-check the ring after
//! waking.
//!
//! Readiness per lane:
//!
//! ```text
//!  NoData ──(qualifying write)──► DataAvailable ──(read returns)──► Consumed
//!    ▲                                                                │
//!    └───────────────────(ring has nothing new)───────────────────────┘
//! ```

use std::sync::Arc;

use parking_lot::Condvar;
use tokio::sync::mpsc;

use crate::media::{MediaData, MediaType};

use super::config::ReceiverOptions;
use super::event::{emit, ReceiverEvent};
use super::ReceiverId;

/// Readiness of one lane
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReadState {
    /// Nothing unread for this lane
    #[default]
    NoData,
    /// A qualifying frame was written since the last read
    DataAvailable,
    /// The last blocking read on this lane returned a frame
    Consumed,
}

/// Read cursor lane
///
/// Mixed receivers read everything through the `Av` lane. Others keep
/// separate audio and video cursors so an audio reader never waits behind a
/// slow video reader.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Lane {
    Av = 0,
    Video = 1,
    Audio = 2,
}

impl Lane {
    pub const ALL: [Lane; 3] = [Lane::Av, Lane::Video, Lane::Audio];

    /// Whether this lane carries frames of `frame`
    pub fn accepts(&self, frame: MediaType) -> bool {
        match self {
            Lane::Av => true,
            Lane::Video => frame == MediaType::Video,
            Lane::Audio => frame == MediaType::Audio,
        }
    }

    /// Whether this lane carries video
    pub fn carries_video(&self) -> bool {
        matches!(self, Lane::Av | Lane::Video)
    }

    fn slot(&self) -> usize {
        *self as usize
    }
}

/// Cursor, readiness and flags of one attached receiver
#[derive(Debug)]
pub struct DataNotifier {
    id: ReceiverId,
    /// Media types the receiver consumes
    filter: MediaType,
    mixed: bool,
    key_mode: bool,
    key_redirect: bool,
    need_acceleration: bool,
    read_stopped: bool,
    /// Next index to examine, per lane
    cursors: [u64; 3],
    /// Readers currently blocked, per lane
    blocked: [u32; 3],
    states: [ReadState; 3],
    wake: Arc<Condvar>,
    events: mpsc::Sender<ReceiverEvent>,
    delivered: u64,
    released: u64,
}

impl DataNotifier {
    pub(crate) fn new(
        id: ReceiverId,
        options: &ReceiverOptions,
        start: u64,
        wake: Arc<Condvar>,
        events: mpsc::Sender<ReceiverEvent>,
    ) -> Self {
        Self {
            id,
            filter: options.media_type,
            mixed: options.mixed,
            key_mode: options.key_mode,
            key_redirect: false,
            need_acceleration: false,
            read_stopped: false,
            cursors: [start; 3],
            blocked: [0; 3],
            states: [ReadState::NoData; 3],
            wake,
            events,
            delivered: 0,
            released: 0,
        }
    }

    pub fn id(&self) -> ReceiverId {
        self.id
    }

    pub fn filter(&self) -> MediaType {
        self.filter
    }

    /// Lane used for a read of `requested`
    pub fn lane_for(&self, requested: MediaType) -> Lane {
        if self.mixed {
            return Lane::Av;
        }
        match requested {
            MediaType::Av => Lane::Av,
            MediaType::Video => Lane::Video,
            MediaType::Audio => Lane::Audio,
        }
    }

    /// Key-mode part of the filter: only keyframes among video
    pub fn passes_key_filter(&self, media: &MediaData) -> bool {
        !self.key_mode || !media.media_type.is_video() || media.key_frame
    }

    /// Whether a frame is owed to this receiver when written
    pub fn admits(&self, media: &MediaData) -> bool {
        self.filter.accepts(media.media_type) && self.passes_key_filter(media)
    }

    pub fn cursor(&self, lane: Lane) -> u64 {
        self.cursors[lane.slot()]
    }

    /// Move a lane cursor forward; cursors never move back
    pub(crate) fn advance(&mut self, lane: Lane, index: u64) {
        let cursor = &mut self.cursors[lane.slot()];
        if index > *cursor {
            *cursor = index;
        }
    }

    /// Pull every cursor up to the ring head after eviction
    pub(crate) fn clamp_to_head(&mut self, head: u64) -> bool {
        let mut moved = false;
        for cursor in self.cursors.iter_mut() {
            if *cursor < head {
                *cursor = head;
                moved = true;
            }
        }
        moved
    }

    pub(crate) fn set_block(&mut self, lane: Lane, block: bool) {
        let count = &mut self.blocked[lane.slot()];
        if block {
            *count += 1;
        } else {
            *count = count.saturating_sub(1);
        }
    }

    pub fn is_blocked(&self) -> bool {
        self.blocked.iter().any(|c| *c > 0)
    }

    pub fn state(&self, lane: Lane) -> ReadState {
        self.states[lane.slot()]
    }

    pub(crate) fn set_state(&mut self, lane: Lane, state: ReadState) {
        self.states[lane.slot()] = state;
    }

    /// Mark every lane carrying `frame` as having data
    pub(crate) fn set_need_update(&mut self, frame: MediaType) {
        for lane in Lane::ALL {
            if lane.accepts(frame) {
                self.states[lane.slot()] = ReadState::DataAvailable;
            }
        }
    }

    /// Wake the bound receiver if a read that wants `media` is blocked
    ///
    /// Returns true if a wake was issued.
    pub(crate) fn notify_data_receiver(&self, media: &MediaData) -> bool {
        if self.read_stopped || !self.admits(media) {
            return false;
        }
        let waiting = Lane::ALL
            .iter()
            .any(|lane| self.blocked[lane.slot()] > 0 && lane.accepts(media.media_type));
        if waiting {
            self.wake.notify_all();
        }
        waiting
    }

    /// Wake every blocked read regardless of data (stop/detach)
    pub(crate) fn wake_all(&self) {
        self.wake.notify_all();
    }

    pub(crate) fn wake_handle(&self) -> Arc<Condvar> {
        Arc::clone(&self.wake)
    }

    pub fn is_key_mode(&self) -> bool {
        self.key_mode
    }

    pub(crate) fn set_key_mode(&mut self, on: bool) {
        self.key_mode = on;
    }

    pub fn is_key_redirect(&self) -> bool {
        self.key_redirect
    }

    pub(crate) fn set_key_redirect(&mut self, on: bool) {
        self.key_redirect = on;
    }

    pub fn need_acceleration(&self) -> bool {
        self.need_acceleration
    }

    pub(crate) fn set_need_acceleration(&mut self, on: bool) {
        self.need_acceleration = on;
    }

    pub fn is_read_stopped(&self) -> bool {
        self.read_stopped
    }

    pub(crate) fn set_read_stopped(&mut self, stopped: bool) {
        self.read_stopped = stopped;
    }

    pub(crate) fn emit(&self, event: ReceiverEvent) {
        emit(&self.events, event);
    }

    pub(crate) fn on_delivered(&mut self) {
        self.delivered += 1;
    }

    pub(crate) fn on_released(&mut self, count: u64) {
        self.released += count;
    }

    pub fn delivered(&self) -> u64 {
        self.delivered
    }

    pub fn released(&self) -> u64 {
        self.released
    }
}
