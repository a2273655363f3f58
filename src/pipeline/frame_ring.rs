//! # Frame Buffer Ring
//!
//! A fixed-capacity ring of buffer slots that pipelines capture, compute and
//! output stages across a stream of frames. The slot status field is the only
//! synchronization mechanism: whoever moved a slot into `capturing` or
//! `processing` is its sole writer until it transitions to `ready` or
//! `error`, after which the slot is read-only until `mark_idle` returns it to
//! the pool.
//!
//! The ring never grows and never blocks: when every slot is busy, the slot
//! under the rotating cursor is reclaimed and its in-flight frame dropped
//! with a warning. A slow consumer costs frames, not liveness.

use crate::backend::{PipelineRun, WorkBuffers};
use crate::error::{RelumeError, RelumeResult};

/// Default number of slots: capture, compute and output can each own one.
pub const DEFAULT_SLOT_COUNT: usize = 3;

/// Lifecycle of one buffer slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotStatus {
    Idle,
    Capturing,
    Processing,
    Ready,
    Error,
}

impl SlotStatus {
    pub fn name(self) -> &'static str {
        match self {
            SlotStatus::Idle => "idle",
            SlotStatus::Capturing => "capturing",
            SlotStatus::Processing => "processing",
            SlotStatus::Ready => "ready",
            SlotStatus::Error => "error",
        }
    }
}

/// One slot: an input frame, the working buffers a pipeline call needs, and
/// the bookkeeping that schedules it.
#[derive(Debug)]
pub struct BufferSlot {
    index: usize,
    status: SlotStatus,
    /// Monotonic frame number, -1 while unused.
    frame_number: i64,
    error: Option<String>,
    /// Captured RGBA frame.
    pub input: Vec<u8>,
    /// Working buffers for the pipeline invocation on this slot.
    pub buffers: WorkBuffers,
    /// Result summary of the last completed pipeline call on this slot.
    pub last_run: Option<PipelineRun>,
}

impl BufferSlot {
    fn new(index: usize, width: u32, height: u32) -> Self {
        Self {
            index,
            status: SlotStatus::Idle,
            frame_number: -1,
            error: None,
            input: vec![0; width as usize * height as usize * 4],
            buffers: WorkBuffers::for_dimensions(width, height),
            last_run: None,
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn status(&self) -> SlotStatus {
        self.status
    }

    pub fn frame_number(&self) -> i64 {
        self.frame_number
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }
}

pub struct FrameRing {
    slots: Vec<BufferSlot>,
    /// Rotating claim cursor.
    cursor: usize,
    /// Next frame number to assign.
    next_frame: i64,
    width: u32,
    height: u32,
    dropped_frames: u64,
}

impl FrameRing {
    pub fn new(slot_count: usize, width: u32, height: u32) -> Self {
        let slot_count = slot_count.max(1);
        Self {
            slots: (0..slot_count)
                .map(|i| BufferSlot::new(i, width, height))
                .collect(),
            cursor: 0,
            next_frame: 0,
            width,
            height,
            dropped_frames: 0,
        }
    }

    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// Frames overwritten before they were consumed.
    pub fn dropped_frames(&self) -> u64 {
        self.dropped_frames
    }

    pub fn slot(&self, index: usize) -> &BufferSlot {
        &self.slots[index]
    }

    pub fn slot_mut(&mut self, index: usize) -> &mut BufferSlot {
        &mut self.slots[index]
    }

    /// Claim a slot for the next incoming frame and return its index.
    ///
    /// Scans from the cursor for an idle slot; if none exists, the slot under
    /// the cursor is reclaimed whatever its state; forward progress beats
    /// strict completeness, a stalled consumer cannot wedge ingestion.
    pub fn next_for_capture(&mut self) -> usize {
        let count = self.slots.len();
        let chosen = (0..count)
            .map(|i| (self.cursor + i) % count)
            .find(|&i| self.slots[i].status == SlotStatus::Idle)
            .unwrap_or_else(|| {
                let victim = self.cursor;
                self.dropped_frames += 1;
                log::warn!(
                    "buffer ring saturated; dropping frame {} in slot {} ({})",
                    self.slots[victim].frame_number,
                    victim,
                    self.slots[victim].status.name(),
                );
                victim
            });

        let slot = &mut self.slots[chosen];
        slot.status = SlotStatus::Capturing;
        slot.frame_number = self.next_frame;
        slot.error = None;
        slot.last_run = None;
        self.next_frame += 1;
        self.cursor = (chosen + 1) % count;
        chosen
    }

    fn transition(
        &mut self,
        index: usize,
        allowed: &[SlotStatus],
        to: SlotStatus,
    ) -> RelumeResult<()> {
        let slot = &mut self.slots[index];
        if !allowed.contains(&slot.status) {
            return Err(RelumeError::state(
                slot.status.name(),
                format!("slot {} -> {}", index, to.name()),
            ));
        }
        slot.status = to;
        Ok(())
    }

    /// Capture finished; the compute stage owns the slot now.
    pub fn mark_processing(&mut self, index: usize) -> RelumeResult<()> {
        self.transition(index, &[SlotStatus::Capturing], SlotStatus::Processing)
    }

    /// Compute finished; the slot is read-only until consumed.
    pub fn mark_ready(&mut self, index: usize) -> RelumeResult<()> {
        self.transition(index, &[SlotStatus::Processing], SlotStatus::Ready)
    }

    /// The stage owning the slot failed. The error stays on the slot until it
    /// is reclaimed or marked idle; later frames are unaffected.
    pub fn mark_error(&mut self, index: usize, message: impl Into<String>) -> RelumeResult<()> {
        self.transition(
            index,
            &[SlotStatus::Capturing, SlotStatus::Processing],
            SlotStatus::Error,
        )?;
        self.slots[index].error = Some(message.into());
        Ok(())
    }

    /// Release a consumed (or failed) slot back to the pool.
    pub fn mark_idle(&mut self, index: usize) -> RelumeResult<()> {
        self.transition(index, &[SlotStatus::Ready, SlotStatus::Error], SlotStatus::Idle)?;
        let slot = &mut self.slots[index];
        slot.frame_number = -1;
        slot.error = None;
        Ok(())
    }

    /// The ready slot with the smallest frame number, so output is consumed
    /// in frame order even when completion was not.
    pub fn get_ready(&self) -> Option<usize> {
        self.slots
            .iter()
            .filter(|s| s.status == SlotStatus::Ready)
            .min_by_key(|s| s.frame_number)
            .map(|s| s.index)
    }

    /// Every ready slot, ascending by frame number.
    pub fn get_all_ready(&self) -> Vec<usize> {
        let mut ready: Vec<&BufferSlot> = self
            .slots
            .iter()
            .filter(|s| s.status == SlotStatus::Ready)
            .collect();
        ready.sort_by_key(|s| s.frame_number);
        ready.iter().map(|s| s.index).collect()
    }

    /// Slots currently carrying an error.
    pub fn get_errors(&self) -> Vec<usize> {
        self.slots
            .iter()
            .filter(|s| s.status == SlotStatus::Error)
            .map(|s| s.index)
            .collect()
    }

    /// Reallocate every slot for new dimensions. In-flight state is not
    /// preserved; cursor and frame numbering restart from zero.
    pub fn resize(&mut self, width: u32, height: u32) {
        let count = self.slots.len();
        self.slots = (0..count)
            .map(|i| BufferSlot::new(i, width, height))
            .collect();
        self.cursor = 0;
        self.next_frame = 0;
        self.width = width;
        self.height = height;
    }

    /// Return every slot to idle without reallocating buffers.
    pub fn reset(&mut self) {
        for slot in &mut self.slots {
            slot.status = SlotStatus::Idle;
            slot.frame_number = -1;
            slot.error = None;
            slot.last_run = None;
        }
        self.cursor = 0;
        self.next_frame = 0;
    }
}
