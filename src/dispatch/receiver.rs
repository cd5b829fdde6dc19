//! Consumer handle
//!
//! A [`BufferReceiver`] is created unattached, bound to one dispatcher with
//! [`BufferDispatcher::attach_receiver`](super::BufferDispatcher::attach_receiver)
//! and read from on the consumer's own thread. Clones share the binding.
//! Dropping the last clone detaches it.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::error::{DispatchError, Result};
use crate::media::{MediaData, MediaType};

use super::config::ReceiverOptions;
use super::dispatcher::Shared;
use super::event::ReceiverEvent;
use super::ReceiverId;

/// Link from a receiver to the dispatcher it is attached to
#[derive(Clone)]
pub(crate) struct Binding {
    pub(crate) id: ReceiverId,
    pub(crate) shared: Arc<Shared>,
}

impl Binding {
    pub(crate) fn new(id: ReceiverId, shared: Arc<Shared>) -> Self {
        Self { id, shared }
    }
}

struct ReceiverInner {
    options: ReceiverOptions,
    events: mpsc::Sender<ReceiverEvent>,
    binding: Mutex<Option<Binding>>,
}

impl Drop for ReceiverInner {
    fn drop(&mut self) {
        if let Some(binding) = self.binding.get_mut().take() {
            // Already gone if the dispatcher detached it
            let _ = binding.shared.detach(binding.id);
        }
    }
}

/// Reading end of a dispatcher
#[derive(Clone)]
pub struct BufferReceiver {
    inner: Arc<ReceiverInner>,
}

impl BufferReceiver {
    /// Create an unattached receiver
    ///
    /// Returns the receiver and the channel its events arrive on.
    pub fn new(options: ReceiverOptions) -> (Self, mpsc::Receiver<ReceiverEvent>) {
        let (tx, rx) = mpsc::channel(options.event_capacity.max(1));
        let receiver = Self {
            inner: Arc::new(ReceiverInner {
                options,
                events: tx,
                binding: Mutex::new(None),
            }),
        };
        (receiver, rx)
    }

    pub fn options(&self) -> &ReceiverOptions {
        &self.inner.options
    }

    /// Id assigned by the dispatcher, if attached
    pub fn id(&self) -> Option<ReceiverId> {
        self.inner.binding.lock().as_ref().map(|b| b.id)
    }

    pub fn is_attached(&self) -> bool {
        self.inner.binding.lock().is_some()
    }

    pub(crate) fn binding_slot(&self) -> &Mutex<Option<Binding>> {
        &self.inner.binding
    }

    pub(crate) fn event_sender(&self) -> mpsc::Sender<ReceiverEvent> {
        self.inner.events.clone()
    }

    fn binding(&self) -> Result<Binding> {
        self.inner
            .binding
            .lock()
            .clone()
            .ok_or_else(|| DispatchError::NotAttached.into())
    }

    /// Block until the next unread frame of `media_type` is available and
    /// hand it to `callback`
    ///
    /// Returns an error once the receiver is detached, its reads are stopped
    /// with [`notify_read_stop`](Self::notify_read_stop), or the dispatcher
    /// stops. The callback runs without any dispatcher lock held.
    pub fn request_read<F>(&self, media_type: MediaType, callback: F) -> Result<()>
    where
        F: FnOnce(&MediaData),
    {
        let binding = self.binding()?;
        binding.shared.request_read(binding.id, media_type, callback)
    }

    /// Deliver the next unread frame if there is one, without blocking
    pub fn try_read<F>(&self, media_type: MediaType, callback: F) -> Result<bool>
    where
        F: FnOnce(&MediaData),
    {
        let binding = self.binding()?;
        binding.shared.read_buffer_data(binding.id, media_type, callback)
    }

    /// Allow reads again
    pub fn notify_read_start(&self) -> Result<()> {
        let binding = self.binding()?;
        binding.shared.set_read_stopped(binding.id, false)
    }

    /// Cancel the blocked read, if any, and refuse further reads
    pub fn notify_read_stop(&self) -> Result<()> {
        let binding = self.binding()?;
        binding.shared.set_read_stopped(binding.id, true)
    }

    /// Cached sequence parameter set of the attached dispatcher
    pub fn get_sps(&self) -> Option<MediaData> {
        self.binding().ok()?.shared.sps()
    }

    /// Cached picture parameter set of the attached dispatcher
    pub fn get_pps(&self) -> Option<MediaData> {
        self.binding().ok()?.shared.pps()
    }

    pub fn enable_key_mode(&self, on: bool) -> Result<()> {
        let binding = self.binding()?;
        binding.shared.enable_key_mode(binding.id, on)
    }

    pub fn enable_key_redirect(&self, on: bool) -> Result<()> {
        let binding = self.binding()?;
        binding.shared.enable_key_redirect(binding.id, on)
    }

    pub fn need_acceleration(&self) -> Result<bool> {
        let binding = self.binding()?;
        binding.shared.need_acceleration(binding.id)
    }

    pub fn disable_acceleration(&self) -> Result<()> {
        let binding = self.binding()?;
        binding.shared.disable_acceleration(binding.id)
    }

    pub fn send_acceleration_done(&self) -> Result<()> {
        let binding = self.binding()?;
        binding.shared.send_acceleration_done(binding.id)
    }
}

impl std::fmt::Debug for BufferReceiver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BufferReceiver")
            .field("id", &self.id())
            .field("options", &self.inner.options)
            .finish()
    }
}
