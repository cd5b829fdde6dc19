//! Media frames and payload handling
//!
//! This module provides:
//! - The frame type carried through the dispatcher
//! - H.264 Annex-B NALU parsing and parameter set extraction
//! - A payload buffer pool

pub mod frame;
pub mod h264;
pub mod pool;

pub use frame::{CodecId, MediaData, MediaType};
pub use h264::{AnnexBNalus, NaluType, ParameterSets};
pub use pool::BufferPool;
