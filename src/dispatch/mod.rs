//! Buffer dispatch
//!
//! One producer writes frames, many receivers read them at their own pace:
//!
//! ```text
//!                 input_data()
//!   producer ────────────────────► BufferDispatcher
//!                                  ┌───────────────────────────────┐
//!                                  │ head                     tail │
//!                                  │ [K][P][P][A][K][P][A][P][A]   │
//!                                  │       ▲           ▲           │
//!                                  └───────┼───────────┼───────────┘
//!                                   cursor │    cursor │
//!                                   BufferReceiver  BufferReceiver
//!                                   (decoder)       (packetizer)
//! ```
//!
//! - Every slot remembers which receivers still owe it and which have read
//!   it; a frame is delivered to a receiver at most once.
//! - The ring grows when most receivers lag and shrinks back once they have
//!   caught up, between a base and a maximum capacity.
//! - Eviction works on whole GOPs so a lagging decoder resumes on a
//!   keyframe.
//! - Receivers can switch to key mode (keyframes and audio only) or request
//!   a one-shot redirect to the latest keyframe.

mod config;
mod dispatcher;
mod event;
mod gop;
mod notifier;
mod receiver;
mod slot;

pub use config::{
    DataMode, DispatcherConfig, ReceiverOptions, DEFAULT_BASE_CAPACITY, DEFAULT_CAPACITY_INCREMENT,
    DEFAULT_MAX_CAPACITY,
};
pub use dispatcher::BufferDispatcher;
pub use event::{DispatcherEvent, ReceiverEvent};
pub use gop::KeyIndex;
pub use notifier::{DataNotifier, Lane, ReadState};
pub use receiver::BufferReceiver;
pub use slot::DataSpec;

/// Receiver id, unique per dispatcher
pub type ReceiverId = u32;
