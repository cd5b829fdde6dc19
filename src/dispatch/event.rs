//! Listener events
//!
//! The dispatcher never holds its listeners. Each side gets a channel
//! endpoint when it is created and drains events at its own pace; sending
//! never blocks the producer or a reader.

use std::time::Duration;

use tokio::sync::mpsc;

/// Events for the owner of a dispatcher (the media channel)
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatcherEvent {
    /// The producer has been overwriting owed frames for longer than the
    /// configured write timeout; receivers are not draining.
    WriteTimeout {
        /// How long the stall has lasted
        stalled_for: Duration,
    },
}

/// Events for the owner of a receiver
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReceiverEvent {
    /// Key mode toggled. `true` with no keyframe buffered asks upstream for
    /// an IDR.
    KeyModeNotify(bool),
    /// The acceleration handshake finished
    AccelerationDone,
}

/// Send an event without blocking, dropping it if the listener is gone or
/// lagging.
pub(crate) fn emit<T: std::fmt::Debug>(tx: &mpsc::Sender<T>, event: T) {
    match tx.try_send(event) {
        Ok(()) => {}
        Err(mpsc::error::TrySendError::Full(event)) => {
            tracing::warn!(event = ?event, "Listener channel full, event dropped");
        }
        Err(mpsc::error::TrySendError::Closed(event)) => {
            tracing::debug!(event = ?event, "Listener gone, event dropped");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_emit_delivers() {
        let (tx, mut rx) = mpsc::channel(1);
        emit(&tx, ReceiverEvent::AccelerationDone);
        assert_eq!(rx.try_recv().unwrap(), ReceiverEvent::AccelerationDone);
    }

    #[test]
    fn test_emit_full_or_closed_does_not_block() {
        let (tx, mut rx) = mpsc::channel(1);
        emit(&tx, ReceiverEvent::KeyModeNotify(true));
        emit(&tx, ReceiverEvent::KeyModeNotify(false));

        assert_eq!(rx.try_recv().unwrap(), ReceiverEvent::KeyModeNotify(true));
        assert!(rx.try_recv().is_err());

        drop(rx);
        emit(&tx, ReceiverEvent::AccelerationDone);
    }
}
