//! # Frame Pipeline
//!
//! Buffer-slot scheduling for streams of frames.

pub mod frame_ring;

pub use frame_ring::{BufferSlot, FrameRing, SlotStatus, DEFAULT_SLOT_COUNT};
