//! Channel registry
//!
//! The registry owns one [`BufferDispatcher`](crate::BufferDispatcher) per
//! media channel and the prosumers (capture sources, encoders, packetizers)
//! running on it. Prosumers are built by name from a [`ProsumerFactory`]
//! that the application fills at startup.
//!
//! # Architecture
//!
//! ```text
//!                         Arc<ChannelRegistry>
//!                     ┌──────────────────────────┐
//!                     │ channels: HashMap<Key,   │
//!                     │   ChannelEntry {         │
//!                     │     dispatcher,          │
//!                     │     prosumers,           │
//!                     │   }                      │
//!                     │ >                        │
//!                     │ factory: name -> ctor    │
//!                     └────────────┬─────────────┘
//!                                  │
//!         ┌────────────────────────┼────────────────────────┐
//!         │                        │                        │
//!         ▼                        ▼                        ▼
//!    [Producer]              [Consumer]               [Consumer]
//!    input_data()            request_read()           request_read()
//! ```

pub mod config;
pub mod entry;
pub mod error;
pub mod factory;
pub mod key;
pub mod store;

pub use config::RegistryConfig;
pub use entry::{ChannelEntry, ChannelState, ChannelStats};
pub use error::RegistryError;
pub use factory::{Prosumer, ProsumerCtor, ProsumerFactory};
pub use key::ChannelKey;
pub use store::ChannelRegistry;
