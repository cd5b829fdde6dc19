//! Buffer dispatcher
//!
//! Owns the ring of [`DataSpec`] slots and the notifier of every attached
//! receiver. All of it sits behind one mutex; per-receiver condition
//! variables only carry wake signals.
//!
//! Write path (`input_data`):
//! 1. pre-process: data mode filter, wait for the first keyframe, cache
//!    parameter sets
//! 2. recalculate capacity from receiver lag
//! 3. evict from the head while the ring is full: unowed slots first; if
//!    owed data is in the way, grow toward maximum capacity; at maximum,
//!    the oldest whole GOP, then single slots
//! 4. append the slot, owed to every receiver whose filters admit it
//! 5. wake receivers blocked on a lane that carries the frame
//!
//! The write path never waits for a receiver. A receiver that falls too far
//! behind loses frames; if the producer keeps overwriting owed frames at
//! maximum capacity for longer than the write timeout, the owner is told
//! through [`DispatcherEvent::WriteTimeout`].

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use bytes::BytesMut;
use parking_lot::{Condvar, Mutex};
use tokio::sync::mpsc;

use crate::error::{DispatchError, Error, Result};
use crate::media::{BufferPool, CodecId, MediaData, MediaType, ParameterSets};
use crate::stats::{DispatchCounters, DispatcherStats, ReceiverStats};

use super::config::{DispatcherConfig, ReceiverOptions};
use super::event::{emit, DispatcherEvent, ReceiverEvent};
use super::gop::KeyIndex;
use super::notifier::{DataNotifier, Lane, ReadState};
use super::receiver::{Binding, BufferReceiver};
use super::slot::DataSpec;
use super::ReceiverId;

/// Share of capacity a receiver must owe to count as lagging (percent)
const LAG_HIGH_WATER_PERCENT: usize = 80;

/// Share of capacity every receiver must stay under before shrinking (percent)
const LAG_LOW_WATER_PERCENT: usize = 25;

/// Pool used for a media type: video payloads are much larger than audio
fn pool_slot(media_type: MediaType) -> usize {
    match media_type {
        MediaType::Audio => 1,
        _ => 0,
    }
}

/// Offset of `index` in a ring whose head is `head`, clamped to `len`
fn offset(head: u64, index: u64, len: usize) -> usize {
    (index.saturating_sub(head) as usize).min(len)
}

/// Smallest unread index at or after the lane cursor that the receiver accepts
fn find_next_index(ring: &VecDeque<DataSpec>, notifier: &DataNotifier, lane: Lane) -> Option<u64> {
    let head = ring.front()?.index;
    let start = offset(head, notifier.cursor(lane), ring.len());
    let id = notifier.id();

    ring.range(start..)
        .find(|slot| {
            let media_type = slot.media_type();
            lane.accepts(media_type)
                && notifier.filter().accepts(media_type)
                && notifier.passes_key_filter(&slot.media)
                && !slot.is_read_by(id)
        })
        .map(|slot| slot.index)
}

/// Outcome of making room for one write
#[derive(Debug, Default, Clone, Copy)]
pub(crate) struct Eviction {
    pub evicted: usize,
    pub owed_dropped: usize,
}

/// Everything guarded by the dispatcher lock
#[derive(Debug)]
pub(crate) struct DispatcherState {
    running: bool,
    ring: VecDeque<DataSpec>,
    /// Index the next write receives
    next_index: u64,
    current_capacity: usize,
    notifiers: HashMap<ReceiverId, DataNotifier>,
    next_receiver_id: ReceiverId,
    keys: KeyIndex,
    sps: Option<MediaData>,
    pps: Option<MediaData>,
    waiting_key: bool,
    stall_since: Option<Instant>,
    stall_reported: bool,
    /// Video and audio payload pools
    pools: [BufferPool; 2],
    counters: DispatchCounters,
}

impl DispatcherState {
    pub(crate) fn new(config: &DispatcherConfig) -> Self {
        Self {
            running: true,
            ring: VecDeque::with_capacity(config.base_capacity),
            next_index: 0,
            current_capacity: config.base_capacity,
            notifiers: HashMap::new(),
            next_receiver_id: 1,
            keys: KeyIndex::new(),
            sps: None,
            pps: None,
            waiting_key: config.wait_for_keyframe && config.data_mode.carries_video(),
            stall_since: None,
            stall_reported: false,
            pools: [
                BufferPool::new(config.pool_limit),
                BufferPool::new(config.pool_limit),
            ],
            counters: DispatchCounters::default(),
        }
    }

    /// Index of the oldest slot still in the ring
    fn head(&self) -> u64 {
        self.ring.front().map_or(self.next_index, |slot| slot.index)
    }

    fn notifier(&self, id: ReceiverId) -> std::result::Result<&DataNotifier, DispatchError> {
        self.notifiers.get(&id).ok_or(DispatchError::ReceiverNotFound(id))
    }

    fn notifier_mut(&mut self, id: ReceiverId) -> std::result::Result<&mut DataNotifier, DispatchError> {
        self.notifiers.get_mut(&id).ok_or(DispatchError::ReceiverNotFound(id))
    }

    /// Register a receiver and position its cursors
    ///
    /// An empty ring starts the receiver at the tail. Otherwise it starts on
    /// the most recent keyframe so a decoder never begins mid-GOP, or at the
    /// tail when no keyframe is buffered.
    pub(crate) fn attach(
        &mut self,
        options: &ReceiverOptions,
        events: mpsc::Sender<ReceiverEvent>,
    ) -> ReceiverId {
        let id = self.next_receiver_id;
        self.next_receiver_id += 1;

        let head = self.head();
        let start = if self.ring.is_empty() {
            self.next_index
        } else {
            self.keys
                .latest()
                .filter(|k| *k >= head)
                .unwrap_or(self.next_index)
        };

        let mut notifier = DataNotifier::new(id, options, start, Arc::new(Condvar::new()), events);
        let from = offset(head, start, self.ring.len());
        for slot in self.ring.range_mut(from..) {
            if notifier.admits(&slot.media) {
                slot.data_ref.insert(id);
                notifier.set_need_update(slot.media_type());
            }
        }
        self.notifiers.insert(id, notifier);
        id
    }

    /// Remove a receiver, forget it in every slot and wake its readers
    pub(crate) fn detach(&mut self, id: ReceiverId) -> Option<DataNotifier> {
        let notifier = self.notifiers.remove(&id)?;
        for slot in self.ring.iter_mut() {
            slot.forget(id);
        }
        notifier.wake_all();
        Some(notifier)
    }

    /// Decide whether a frame may enter the ring
    ///
    /// Returns `Ok(false)` for frames dropped while waiting for the first
    /// keyframe.
    pub(crate) fn pre_process(
        &mut self,
        media: &MediaData,
        config: &DispatcherConfig,
    ) -> std::result::Result<bool, DispatchError> {
        if !config.data_mode.admits(media.media_type) {
            self.counters.frames_rejected += 1;
            return Err(DispatchError::MediaTypeExcluded(media.media_type));
        }

        if self.waiting_key && media.media_type.is_video() {
            if !media.key_frame {
                self.counters.frames_dropped_waiting_key += 1;
                tracing::debug!(pts = media.pts, "Waiting for first keyframe, video frame dropped");
                return Ok(false);
            }
            self.waiting_key = false;
            tracing::info!(pts = media.pts, "First keyframe received");
        }

        if media.is_video_key() && media.codec_id == CodecId::H264 && !media.is_raw {
            self.cache_parameter_sets(media);
        }

        Ok(true)
    }

    /// Keep the latest SPS/PPS seen in keyframe access units
    fn cache_parameter_sets(&mut self, media: &MediaData) {
        let sets = ParameterSets::extract(&media.data);
        let config_frame = |data| MediaData {
            media_type: MediaType::Video,
            codec_id: media.codec_id,
            pts: media.pts,
            key_frame: false,
            is_raw: false,
            data,
        };
        if let Some(sps) = sets.sps {
            self.sps = Some(config_frame(sps));
        }
        if let Some(pps) = sets.pps {
            self.pps = Some(config_frame(pps));
        }
    }

    /// Grow under sustained lag, shrink back once everyone has caught up
    pub(crate) fn recalculate_capacity(&mut self, config: &DispatcherConfig) {
        let capacity = self.current_capacity;
        let mut owed: HashMap<ReceiverId, usize> =
            self.notifiers.keys().map(|id| (*id, 0)).collect();
        for slot in &self.ring {
            for id in &slot.data_ref {
                if let Some(count) = owed.get_mut(id) {
                    *count += 1;
                }
            }
        }

        let high = (capacity * LAG_HIGH_WATER_PERCENT / 100).max(1);
        let low = capacity * LAG_LOW_WATER_PERCENT / 100;
        let lagging = owed.values().filter(|n| **n >= high).count();

        if !owed.is_empty() && lagging * 2 > owed.len() && capacity < config.max_capacity {
            let grown = (capacity + config.capacity_increment).min(config.max_capacity);
            if grown != capacity {
                self.current_capacity = grown;
                self.counters.capacity_grown += 1;
                tracing::info!(
                    from = capacity,
                    to = grown,
                    lagging = lagging,
                    receivers = owed.len(),
                    "Growing dispatcher capacity"
                );
            }
        } else if capacity > config.base_capacity && owed.values().all(|n| *n <= low) {
            let shrunk = capacity
                .saturating_sub(config.capacity_increment)
                .max(config.base_capacity);
            if shrunk != capacity && self.ring.len() <= shrunk {
                self.current_capacity = shrunk;
                self.counters.capacity_shrunk += 1;
                tracing::debug!(from = capacity, to = shrunk, "Shrinking dispatcher capacity");
            }
        }
    }

    /// Remove the head slot, keeping indices and cursors consistent
    ///
    /// Returns whether the slot was still owed to someone.
    fn pop_head(&mut self) -> Option<bool> {
        let slot = self.ring.pop_front()?;
        let owed = slot.is_owed();
        let head = self.head();

        self.keys.prune_before(head);
        for id in &slot.data_ref {
            if let Some(notifier) = self.notifiers.get_mut(id) {
                notifier.on_released(1);
            }
        }
        for notifier in self.notifiers.values_mut() {
            notifier.clamp_to_head(head);
        }
        self.pools[pool_slot(slot.media.media_type)].reclaim(slot.media.data);

        Some(owed)
    }

    /// Reclaim the head if nobody owes it and it precedes the latest GOP
    fn reclaim_head(&mut self) -> bool {
        let reclaimable = match self.ring.front() {
            Some(front) => {
                !front.is_owed() && self.keys.latest().map_or(true, |k| front.index < k)
            }
            None => false,
        };
        if reclaimable {
            self.pop_head();
            self.counters.slots_reclaimed += 1;
        }
        reclaimable
    }

    /// Erase old GOPs from the head
    ///
    /// Forced: drop everything before the first keyframe newer than the
    /// head, owed or not, so no GOP is cut in half. Otherwise: drop slots
    /// before the latest keyframe that nobody owes any more.
    ///
    /// Returns (slots removed, owed slots among them).
    pub(crate) fn erase_old_gop_datas(&mut self, force: bool) -> (usize, usize) {
        let boundary = if force {
            self.keys.gop_boundary_after(self.head())
        } else {
            self.keys.latest()
        };
        let Some(boundary) = boundary else {
            return (0, 0);
        };

        let mut removed = 0;
        let mut owed_dropped = 0;
        while let Some(front) = self.ring.front() {
            if front.index >= boundary || (!force && front.is_owed()) {
                break;
            }
            if self.pop_head() == Some(true) {
                owed_dropped += 1;
            }
            removed += 1;
        }

        if removed > 0 {
            if force {
                self.counters.gops_erased += 1;
                self.counters.owed_slots_dropped += owed_dropped as u64;
            } else {
                self.counters.slots_reclaimed += removed as u64;
            }
            tracing::debug!(
                removed = removed,
                owed_dropped = owed_dropped,
                forced = force,
                head = self.head(),
                "Erased old GOP data"
            );
        }
        (removed, owed_dropped)
    }

    /// Whether forcing room now would drop data someone still owes
    fn forced_eviction_owes(&self) -> bool {
        match self.keys.gop_boundary_after(self.head()) {
            Some(boundary) => self
                .ring
                .iter()
                .take_while(|slot| slot.index < boundary)
                .any(|slot| slot.is_owed()),
            None => self.ring.front().is_some_and(|slot| slot.is_owed()),
        }
    }

    /// Grow one step instead of dropping owed data, up to the maximum
    fn grow_for_backlog(&mut self, config: &DispatcherConfig) -> bool {
        let capacity = self.current_capacity;
        if capacity >= config.max_capacity || !self.forced_eviction_owes() {
            return false;
        }
        let grown = (capacity + config.capacity_increment).min(config.max_capacity);
        if grown == capacity {
            return false;
        }
        self.current_capacity = grown;
        self.counters.capacity_grown += 1;
        tracing::info!(from = capacity, to = grown, "Growing dispatcher capacity to keep owed data");
        true
    }

    /// Make room for one more slot
    ///
    /// Owed data is only dropped once the ring is at maximum capacity.
    pub(crate) fn delete_head_datas(&mut self, config: &DispatcherConfig) -> Eviction {
        let mut eviction = Eviction::default();

        while !self.ring.is_empty() && self.ring.len() >= self.current_capacity {
            if self.reclaim_head() {
                eviction.evicted += 1;
                continue;
            }
            if self.grow_for_backlog(config) {
                continue;
            }

            let (removed, owed) = self.erase_old_gop_datas(true);
            if removed > 0 {
                eviction.evicted += removed;
                eviction.owed_dropped += owed;
                continue;
            }

            // One GOP fills the ring; drop single slots
            if let Some(owed) = self.pop_head() {
                eviction.evicted += 1;
                self.counters.slots_force_deleted += 1;
                if owed {
                    eviction.owed_dropped += 1;
                    self.counters.owed_slots_dropped += 1;
                }
                tracing::debug!(head = self.head(), owed = owed, "Force-deleted head slot");
            }
        }

        eviction
    }

    /// Append an admitted frame; returns its index
    pub(crate) fn write(&mut self, media: MediaData) -> u64 {
        let index = self.next_index;
        self.next_index += 1;

        let owners: HashSet<ReceiverId> = self
            .notifiers
            .values()
            .filter(|n| n.admits(&media))
            .map(|n| n.id())
            .collect();

        if media.is_video_key() {
            self.keys.push(index);
        }
        self.ring.push_back(DataSpec::new(index, media, owners));
        self.counters.frames_written += 1;
        index
    }

    /// Apply armed redirects and wake receivers owed the newest slot
    pub(crate) fn notify(&mut self, index: u64) {
        let is_key = self.ring.back().is_some_and(|slot| slot.index == index && slot.is_video_key());

        if is_key {
            let armed: Vec<ReceiverId> = self
                .notifiers
                .values()
                .filter(|n| n.is_key_redirect())
                .map(|n| n.id())
                .collect();
            for id in armed {
                self.jump_to(id, &Lane::ALL, index);
                if let Some(notifier) = self.notifiers.get_mut(&id) {
                    notifier.set_key_redirect(false);
                }
                tracing::info!(receiver_id = id, index = index, "Key redirect applied on new keyframe");
            }
        }

        let Some(slot) = self.ring.back() else {
            return;
        };
        for id in &slot.data_ref {
            if let Some(notifier) = self.notifiers.get_mut(id) {
                notifier.set_need_update(slot.media.media_type);
                notifier.notify_data_receiver(&slot.media);
            }
        }
    }

    /// Track producer stalls; returns the stall length when a timeout fires
    ///
    /// An episode starts when a write drops owed data at maximum capacity
    /// and lasts while the ring stays at maximum with its head still owed.
    pub(crate) fn track_stall(
        &mut self,
        eviction: Eviction,
        config: &DispatcherConfig,
    ) -> Option<Duration> {
        let backlog = self.current_capacity >= config.max_capacity
            && self.ring.front().is_some_and(|slot| slot.is_owed());
        if !backlog {
            if self.stall_since.take().is_some() {
                tracing::debug!("Write stall cleared");
            }
            self.stall_reported = false;
            return None;
        }

        if eviction.owed_dropped > 0 && self.stall_since.is_none() {
            self.stall_since = Some(Instant::now());
        }
        let stalled_for = self.stall_since?.elapsed();
        if !self.stall_reported && stalled_for >= config.write_timeout {
            self.stall_reported = true;
            self.counters.write_timeouts += 1;
            return Some(stalled_for);
        }
        None
    }

    /// Move lane cursors of `id` forward to `target`, releasing what they skip
    fn jump_to(&mut self, id: ReceiverId, lanes: &[Lane], target: u64) {
        let head = self.head();
        let len = self.ring.len();
        let Some(notifier) = self.notifiers.get_mut(&id) else {
            return;
        };

        let mut released = 0;
        for lane in lanes {
            let from = notifier.cursor(*lane);
            if target <= from {
                continue;
            }
            let (start, end) = (offset(head, from, len), offset(head, target, len));
            for slot in self.ring.range_mut(start..end) {
                if lane.accepts(slot.media_type()) && slot.is_owed_by(id) {
                    slot.release(id);
                    released += 1;
                }
            }
            notifier.advance(*lane, target);
        }
        notifier.on_released(released);
    }

    /// Deliver the next frame for `id` on the lane serving `media_type`
    pub(crate) fn read_next(
        &mut self,
        id: ReceiverId,
        media_type: MediaType,
    ) -> std::result::Result<Option<MediaData>, DispatchError> {
        if !self.running {
            return Err(DispatchError::Stopped);
        }
        let head = self.head();
        let len = self.ring.len();
        let notifier = self
            .notifiers
            .get_mut(&id)
            .ok_or(DispatchError::ReceiverNotFound(id))?;
        let lane = notifier.lane_for(media_type);

        let Some(found) = find_next_index(&self.ring, notifier, lane) else {
            notifier.set_state(lane, ReadState::NoData);
            return Ok(None);
        };

        // Key-filtered slots skipped on the way are no longer owed
        let (start, end) = (offset(head, notifier.cursor(lane), len), offset(head, found, len));
        let mut released = 0;
        for slot in self.ring.range_mut(start..end) {
            if lane.accepts(slot.media_type())
                && slot.is_owed_by(id)
                && !notifier.passes_key_filter(&slot.media)
            {
                slot.release(id);
                released += 1;
            }
        }

        let slot = &mut self.ring[offset(head, found, len)];
        slot.mark_read(id);
        let media = slot.media.clone();

        notifier.advance(lane, found + 1);
        notifier.on_delivered();
        notifier.on_released(released);
        notifier.set_state(lane, ReadState::Consumed);
        Ok(Some(media))
    }

    pub(crate) fn enable_key_mode(
        &mut self,
        id: ReceiverId,
        on: bool,
    ) -> std::result::Result<(), DispatchError> {
        let head = self.head();
        let len = self.ring.len();
        let notifier = self
            .notifiers
            .get_mut(&id)
            .ok_or(DispatchError::ReceiverNotFound(id))?;
        if notifier.is_key_mode() == on {
            return Ok(());
        }
        notifier.set_key_mode(on);

        let lane = notifier.lane_for(MediaType::Video);
        let cursor = notifier.cursor(lane);
        let start = offset(head, cursor, len);

        if !on {
            // Frames ahead of the cursor are owed again
            let mut reowed = 0;
            for slot in self.ring.range_mut(start..) {
                if notifier.admits(&slot.media) && !slot.is_read_by(id) && slot.data_ref.insert(id) {
                    notifier.set_need_update(slot.media.media_type);
                    notifier.notify_data_receiver(&slot.media);
                    reowed += 1;
                }
            }
            notifier.emit(ReceiverEvent::KeyModeNotify(false));
            tracing::info!(receiver_id = id, reowed = reowed, "Key mode disabled");
            return Ok(());
        }

        let mut released = 0;
        for slot in self.ring.range_mut(start..) {
            if slot.is_owed_by(id) && !notifier.passes_key_filter(&slot.media) {
                slot.release(id);
                released += 1;
            }
        }
        notifier.on_released(released);

        match self.keys.first_at_or_after(cursor) {
            Some(key) => {
                self.jump_to(id, &[lane], key);
                tracing::info!(receiver_id = id, key_index = key, "Key mode enabled");
            }
            None => {
                notifier_emit(&self.notifiers, id, ReceiverEvent::KeyModeNotify(true));
                tracing::info!(receiver_id = id, "Key mode enabled, requesting keyframe");
            }
        }
        Ok(())
    }

    pub(crate) fn enable_key_redirect(
        &mut self,
        id: ReceiverId,
        on: bool,
    ) -> std::result::Result<(), DispatchError> {
        self.notifier_mut(id)?.set_key_redirect(on);
        if on {
            self.on_key_redirect(id)?;
        }
        Ok(())
    }

    /// Jump to the latest buffered keyframe ahead of the cursor
    ///
    /// Without one the redirect stays armed until the next keyframe is
    /// written, and the receiver is flagged as needing acceleration.
    pub(crate) fn on_key_redirect(&mut self, id: ReceiverId) -> std::result::Result<bool, DispatchError> {
        let notifier = self.notifier(id)?;
        let cursor = notifier.cursor(notifier.lane_for(MediaType::Video));

        match self.keys.latest_at_or_after(cursor) {
            Some(key) => {
                self.jump_to(id, &Lane::ALL, key);
                self.notifier_mut(id)?.set_key_redirect(false);
                tracing::info!(receiver_id = id, from = cursor, to = key, "Key redirect applied");
                Ok(true)
            }
            None => {
                self.notifier_mut(id)?.set_need_acceleration(true);
                tracing::debug!(receiver_id = id, "No keyframe buffered, key redirect armed");
                Ok(false)
            }
        }
    }

    /// Periodic maintenance run by the worker thread
    pub(crate) fn housekeeping(&mut self, config: &DispatcherConfig) {
        let released: usize = self.pools.iter_mut().map(|pool| pool.release_idle()).sum();
        if released > 0 {
            tracing::trace!(released = released, "Released idle buffers");
        }
        self.recalculate_capacity(config);
        self.erase_old_gop_datas(false);
    }

    fn owed_by(&self, id: ReceiverId) -> usize {
        self.ring.iter().filter(|slot| slot.is_owed_by(id)).count()
    }

    fn receiver_stats(&self, notifier: &DataNotifier) -> ReceiverStats {
        let id = notifier.id();
        ReceiverStats {
            id,
            cursor: notifier.cursor(notifier.lane_for(MediaType::Video)),
            owed: self.owed_by(id),
            delivered: notifier.delivered(),
            released: notifier.released(),
            key_mode: notifier.is_key_mode(),
            key_redirect: notifier.is_key_redirect(),
            need_acceleration: notifier.need_acceleration(),
            blocked: notifier.is_blocked(),
        }
    }

    fn stats(&self, config: &DispatcherConfig) -> DispatcherStats {
        DispatcherStats {
            buffered: self.ring.len(),
            capacity: self.current_capacity,
            base_capacity: config.base_capacity,
            max_capacity: config.max_capacity,
            head_index: self.head(),
            next_index: self.next_index,
            keyframes_buffered: self.keys.len(),
            receivers: self.notifiers.len(),
            waiting_key: self.waiting_key,
            buffers_reused: self.pools.iter().map(|p| p.reused()).sum(),
            buffers_allocated: self.pools.iter().map(|p| p.allocated()).sum(),
            counters: self.counters.clone(),
        }
    }
}

fn notifier_emit(notifiers: &HashMap<ReceiverId, DataNotifier>, id: ReceiverId, event: ReceiverEvent) {
    if let Some(notifier) = notifiers.get(&id) {
        notifier.emit(event);
    }
}

/// State shared by the dispatcher handle, its worker and bound receivers
#[derive(Debug)]
pub(crate) struct Shared {
    pub(crate) state: Mutex<DispatcherState>,
    /// Wakes the housekeeping worker
    data_cv: Condvar,
    config: DispatcherConfig,
    events: mpsc::Sender<DispatcherEvent>,
}

impl Shared {
    pub(crate) fn detach(&self, id: ReceiverId) -> std::result::Result<(), DispatchError> {
        let mut state = self.state.lock();
        state
            .detach(id)
            .ok_or(DispatchError::ReceiverNotFound(id))?;
        tracing::info!(receiver_id = id, receivers = state.notifiers.len(), "Receiver detached");
        Ok(())
    }

    /// Block until a frame is delivered or the read is cancelled
    pub(crate) fn request_read<F>(&self, id: ReceiverId, media_type: MediaType, callback: F) -> Result<()>
    where
        F: FnOnce(&MediaData),
    {
        let mut state = self.state.lock();
        let media = loop {
            let notifier = state.notifier(id)?;
            if notifier.is_read_stopped() {
                return Err(DispatchError::ReadStopped.into());
            }
            if let Some(media) = state.read_next(id, media_type)? {
                break media;
            }

            let notifier = state.notifier_mut(id)?;
            let lane = notifier.lane_for(media_type);
            let wake = notifier.wake_handle();
            notifier.set_block(lane, true);
            wake.wait(&mut state);
            if let Some(notifier) = state.notifiers.get_mut(&id) {
                notifier.set_block(lane, false);
            }
        };
        drop(state);

        callback(&media);
        Ok(())
    }

    pub(crate) fn read_buffer_data<F>(&self, id: ReceiverId, media_type: MediaType, callback: F) -> Result<bool>
    where
        F: FnOnce(&MediaData),
    {
        let media = self.state.lock().read_next(id, media_type)?;
        match media {
            Some(media) => {
                callback(&media);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    pub(crate) fn set_read_stopped(&self, id: ReceiverId, stopped: bool) -> Result<()> {
        let mut state = self.state.lock();
        let notifier = state.notifier_mut(id)?;
        notifier.set_read_stopped(stopped);
        if stopped {
            notifier.wake_all();
        }
        Ok(())
    }

    pub(crate) fn enable_key_mode(&self, id: ReceiverId, on: bool) -> Result<()> {
        Ok(self.state.lock().enable_key_mode(id, on)?)
    }

    pub(crate) fn enable_key_redirect(&self, id: ReceiverId, on: bool) -> Result<()> {
        Ok(self.state.lock().enable_key_redirect(id, on)?)
    }

    pub(crate) fn need_acceleration(&self, id: ReceiverId) -> Result<bool> {
        Ok(self.state.lock().notifier(id)?.need_acceleration())
    }

    pub(crate) fn disable_acceleration(&self, id: ReceiverId) -> Result<()> {
        let mut state = self.state.lock();
        let notifier = state.notifier_mut(id)?;
        notifier.set_need_acceleration(false);
        notifier.set_key_redirect(false);
        Ok(())
    }

    pub(crate) fn send_acceleration_done(&self, id: ReceiverId) -> Result<()> {
        let mut state = self.state.lock();
        let notifier = state.notifier_mut(id)?;
        notifier.set_need_acceleration(false);
        notifier.set_key_redirect(false);
        notifier.emit(ReceiverEvent::AccelerationDone);
        tracing::debug!(receiver_id = id, "Acceleration done");
        Ok(())
    }

    pub(crate) fn sps(&self) -> Option<MediaData> {
        self.state.lock().sps.clone()
    }

    pub(crate) fn pps(&self) -> Option<MediaData> {
        self.state.lock().pps.clone()
    }
}

/// Single-producer, multi-consumer media ring
///
/// Dropping the dispatcher stops it: the worker exits and every blocked read
/// returns an error.
#[derive(Debug)]
pub struct BufferDispatcher {
    shared: Arc<Shared>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl BufferDispatcher {
    /// Create a dispatcher and start its housekeeping worker
    ///
    /// Returns the dispatcher and a receiver for its events.
    pub fn new(config: DispatcherConfig) -> Result<(Self, mpsc::Receiver<DispatcherEvent>)> {
        config.validate()?;
        let (tx, rx) = mpsc::channel(config.event_capacity);

        let shared = Arc::new(Shared {
            state: Mutex::new(DispatcherState::new(&config)),
            data_cv: Condvar::new(),
            config,
            events: tx,
        });

        let worker_shared = Arc::clone(&shared);
        let worker = std::thread::Builder::new()
            .name("buffer-dispatch".into())
            .spawn(move || run_worker(worker_shared))
            .map_err(|e| Error::Spawn(e.to_string()))?;

        tracing::info!(
            base_capacity = shared.config.base_capacity,
            max_capacity = shared.config.max_capacity,
            data_mode = ?shared.config.data_mode,
            "Buffer dispatcher started"
        );

        Ok((
            Self {
                shared,
                worker: Mutex::new(Some(worker)),
            },
            rx,
        ))
    }

    /// Get the dispatcher configuration
    pub fn config(&self) -> &DispatcherConfig {
        &self.shared.config
    }

    /// Attach a receiver
    ///
    /// The receiver starts on the most recent buffered keyframe, or at the
    /// tail if there is none.
    pub fn attach_receiver(&self, receiver: &BufferReceiver) -> Result<ReceiverId> {
        let mut binding = receiver.binding_slot().lock();
        if let Some(existing) = binding.as_ref() {
            return Err(DispatchError::AlreadyAttached(existing.id).into());
        }

        let mut state = self.shared.state.lock();
        if !state.running {
            return Err(DispatchError::Stopped.into());
        }
        let id = state.attach(receiver.options(), receiver.event_sender());
        let start = state.notifier(id).map(|n| n.cursor(Lane::Av)).unwrap_or_default();
        tracing::info!(
            receiver_id = id,
            start_index = start,
            buffered = state.ring.len(),
            receivers = state.notifiers.len(),
            "Receiver attached"
        );
        drop(state);

        *binding = Some(Binding::new(id, Arc::clone(&self.shared)));
        Ok(id)
    }

    /// Detach a receiver, waking any read it is blocked in
    pub fn detach_receiver(&self, receiver: &BufferReceiver) -> Result<()> {
        let mut binding = receiver.binding_slot().lock();
        let id = match binding.as_ref() {
            Some(b) if Arc::ptr_eq(&b.shared, &self.shared) => b.id,
            Some(b) => return Err(DispatchError::ReceiverNotFound(b.id).into()),
            None => return Err(DispatchError::NotAttached.into()),
        };
        self.shared.detach(id)?;
        *binding = None;
        Ok(())
    }

    /// Write a frame
    ///
    /// Frames of a type excluded by the data mode are rejected. Video before
    /// the first keyframe is dropped silently. A full ring never blocks the
    /// producer: old data is evicted instead.
    pub fn input_data(&self, media: MediaData) -> Result<()> {
        if media.is_empty() {
            return Err(DispatchError::InvalidArgument("empty media payload").into());
        }
        let config = &self.shared.config;
        let mut state = self.shared.state.lock();
        if !state.running {
            return Err(DispatchError::Stopped.into());
        }

        if !state.pre_process(&media, config)? {
            return Ok(());
        }

        state.recalculate_capacity(config);
        let eviction = state.delete_head_datas(config);
        if eviction.evicted > 0 {
            tracing::trace!(
                evicted = eviction.evicted,
                owed_dropped = eviction.owed_dropped,
                capacity = state.current_capacity,
                "Evicted head slots"
            );
        }
        let index = state.write(media);
        state.notify(index);

        if let Some(stalled_for) = state.track_stall(eviction, config) {
            tracing::warn!(
                stalled_ms = stalled_for.as_millis() as u64,
                capacity = state.current_capacity,
                "Receivers not draining, write timeout"
            );
            emit(&self.shared.events, DispatcherEvent::WriteTimeout { stalled_for });
        }
        drop(state);

        self.shared.data_cv.notify_one();
        Ok(())
    }

    /// Get a payload buffer of at least `size` bytes
    ///
    /// Returns `None` for a zero-sized request. Buffers come from the idle
    /// pool when one is large enough.
    pub fn request_data_buffer(&self, media_type: MediaType, size: usize) -> Option<BytesMut> {
        if size == 0 {
            return None;
        }
        self.shared.state.lock().pools[pool_slot(media_type)].request(size)
    }

    /// Deliver the next unread frame for a receiver without blocking
    ///
    /// Returns `Ok(false)` when nothing new qualifies.
    pub fn read_buffer_data<F>(&self, id: ReceiverId, media_type: MediaType, callback: F) -> Result<bool>
    where
        F: FnOnce(&MediaData),
    {
        self.shared.read_buffer_data(id, media_type, callback)
    }

    /// Restrict a receiver to keyframes (plus audio)
    pub fn enable_key_mode(&self, id: ReceiverId, on: bool) -> Result<()> {
        self.shared.enable_key_mode(id, on)
    }

    /// Arm or disarm a one-shot jump to the latest keyframe
    pub fn enable_key_redirect(&self, id: ReceiverId, on: bool) -> Result<()> {
        self.shared.enable_key_redirect(id, on)
    }

    pub fn need_acceleration(&self, id: ReceiverId) -> Result<bool> {
        self.shared.need_acceleration(id)
    }

    pub fn disable_acceleration(&self, id: ReceiverId) -> Result<()> {
        self.shared.disable_acceleration(id)
    }

    pub fn send_acceleration_done(&self, id: ReceiverId) -> Result<()> {
        self.shared.send_acceleration_done(id)
    }

    /// Allow reads again after `notify_read_stop`
    pub fn notify_read_start(&self, id: ReceiverId) -> Result<()> {
        self.shared.set_read_stopped(id, false)
    }

    /// Cancel blocked and future reads of a receiver
    pub fn notify_read_stop(&self, id: ReceiverId) -> Result<()> {
        self.shared.set_read_stopped(id, true)
    }

    /// Cache the sequence parameter set
    pub fn set_sps_nalu(&self, sps: MediaData) {
        self.shared.state.lock().sps = Some(sps);
    }

    /// Cache the picture parameter set
    pub fn set_pps_nalu(&self, pps: MediaData) {
        self.shared.state.lock().pps = Some(pps);
    }

    pub fn sps(&self) -> Option<MediaData> {
        self.shared.sps()
    }

    pub fn pps(&self) -> Option<MediaData> {
        self.shared.pps()
    }

    /// Stop dispatching: wake every waiter and join the worker
    pub fn stop_dispatch(&self) {
        {
            let mut state = self.shared.state.lock();
            if state.running {
                state.running = false;
                for notifier in state.notifiers.values() {
                    notifier.wake_all();
                }
                tracing::info!(
                    written = state.counters.frames_written,
                    receivers = state.notifiers.len(),
                    "Buffer dispatcher stopped"
                );
            }
        }
        self.shared.data_cv.notify_all();

        if let Some(worker) = self.worker.lock().take() {
            if worker.join().is_err() {
                tracing::error!("Housekeeping worker panicked");
            }
        }
    }

    pub fn is_running(&self) -> bool {
        self.shared.state.lock().running
    }

    /// Number of buffered slots
    pub fn len(&self) -> usize {
        self.shared.state.lock().ring.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Current capacity bound
    pub fn capacity(&self) -> usize {
        self.shared.state.lock().current_capacity
    }

    pub fn receiver_count(&self) -> usize {
        self.shared.state.lock().notifiers.len()
    }

    /// Index of the oldest buffered slot (the next write index when empty)
    pub fn head_index(&self) -> u64 {
        self.shared.state.lock().head()
    }

    /// Indices of buffered slots, oldest first
    pub fn buffered_indices(&self) -> Vec<u64> {
        self.shared.state.lock().ring.iter().map(|slot| slot.index).collect()
    }

    pub fn stats(&self) -> DispatcherStats {
        self.shared.state.lock().stats(&self.shared.config)
    }

    pub fn receiver_stats(&self, id: ReceiverId) -> Option<ReceiverStats> {
        let state = self.shared.state.lock();
        let notifier = state.notifiers.get(&id)?;
        Some(state.receiver_stats(notifier))
    }
}

impl Drop for BufferDispatcher {
    fn drop(&mut self) {
        self.stop_dispatch();
    }
}

fn run_worker(shared: Arc<Shared>) {
    let interval = shared.config.housekeeping_interval;
    let mut state = shared.state.lock();
    while state.running {
        shared.data_cv.wait_for(&mut state, interval);
        if !state.running {
            break;
        }
        state.housekeeping(&shared.config);
    }
    tracing::debug!("Housekeeping worker exiting");
}
