//! Media buffer distribution for screen sharing pipelines
//!
//! A [`BufferDispatcher`] sits between one media producer (capture/encode)
//! and any number of consumers (RTP packetizers, decoders, muxers). The
//! producer writes frames into a capacity-adaptive ring; each consumer owns a
//! [`BufferReceiver`] with its own read cursor and blocks until a frame it has
//! not seen yet is available.
//!
//! ```no_run
//! use media_dispatch::{BufferDispatcher, BufferReceiver, DispatcherConfig, MediaData, MediaType};
//! use media_dispatch::dispatch::ReceiverOptions;
//! use bytes::Bytes;
//!
//! # fn example() -> media_dispatch::Result<()> {
//! let (dispatcher, _events) = BufferDispatcher::new(DispatcherConfig::default())?;
//! let (receiver, _receiver_events) = BufferReceiver::new(ReceiverOptions::default());
//! dispatcher.attach_receiver(&receiver)?;
//!
//! dispatcher.input_data(MediaData::video(0, Bytes::from_static(&[0x65, 0x88]), true))?;
//!
//! receiver.request_read(MediaType::Av, |frame| {
//!     println!("pts={} len={}", frame.pts, frame.data.len());
//! })?;
//! # Ok(())
//! # }
//! ```

pub mod dispatch;
pub mod error;
pub mod media;
pub mod registry;
pub mod stats;

pub use dispatch::{
    BufferDispatcher, BufferReceiver, DataMode, DispatcherConfig, DispatcherEvent, ReceiverEvent,
    ReceiverId,
};
pub use error::{DispatchError, Error, Result};
pub use media::{CodecId, MediaData, MediaType};
pub use registry::{ChannelKey, ChannelRegistry, ProsumerFactory};
