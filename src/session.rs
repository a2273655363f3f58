//! # Contrast Session Management
//!
//! High-level orchestration of a stream of frames through the buffer ring and
//! the backend dispatcher. A session owns the ring and the dispatcher; the
//! caller plugs in a [`FrameSource`] producing frames and a [`FrameSink`]
//! consuming adjusted ones.
//!
//! Capture runs on its own thread and hands frames over a bounded channel, so
//! the source keeps filling while the pipeline computes. The ring's slot
//! states do the rest: a frame is claimed into a `capturing` slot, processed
//! under `processing`, parked `ready`, and drained to the sink strictly in
//! frame order. When the source outruns the pipeline, the bounded channel and
//! the ring's oldest-slot reuse shed load instead of stalling ingestion.

use anyhow::Result;

use relume_field::ContrastConfig;

use crate::backend::BackendDispatcher;
use crate::error::{RelumeError, RelumeResult};
use crate::pipeline::{BufferSlot, FrameRing, DEFAULT_SLOT_COUNT};

/// Frames buffered between the capture thread and the pipeline loop.
const CAPTURE_QUEUE_DEPTH: usize = 2;

/// One captured RGBA frame.
#[derive(Debug, Clone)]
pub struct Frame {
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

/// Abstract interface for frame producers.
pub trait FrameSource: Send {
    /// The next frame, or `None` when the stream ends.
    fn next_frame(&mut self) -> Result<Option<Frame>>;

    /// Native dimensions of the source.
    fn dimensions(&self) -> (u32, u32);
}

/// Abstract interface for consumers of adjusted frames.
///
/// `slot` is read-only while ready; the session returns it to the pool right
/// after this call.
pub trait FrameSink {
    fn consume(&mut self, slot: &BufferSlot) -> Result<()>;
}

/// Counters for one `run` call.
#[derive(Debug, Clone, Copy, Default)]
pub struct SessionReport {
    pub frames_in: u64,
    pub frames_out: u64,
    pub frame_errors: u64,
    pub dropped_frames: u64,
}

/// Orchestrates ring, dispatcher and configuration for a stream of frames.
pub struct ContrastSession {
    ring: FrameRing,
    dispatcher: BackendDispatcher,
    config: ContrastConfig,
}

impl ContrastSession {
    /// Build a session around an initialized dispatcher.
    pub fn new(
        dispatcher: BackendDispatcher,
        config: ContrastConfig,
        width: u32,
        height: u32,
    ) -> RelumeResult<Self> {
        Self::with_slots(dispatcher, config, DEFAULT_SLOT_COUNT, width, height)
    }

    pub fn with_slots(
        dispatcher: BackendDispatcher,
        config: ContrastConfig,
        slot_count: usize,
        width: u32,
        height: u32,
    ) -> RelumeResult<Self> {
        if !dispatcher.is_initialized() {
            return Err(RelumeError::state("uninitialized", "session construction"));
        }
        config.validate()?;
        Ok(Self {
            ring: FrameRing::new(slot_count, width, height),
            dispatcher,
            config,
        })
    }

    pub fn dispatcher(&self) -> &BackendDispatcher {
        &self.dispatcher
    }

    pub fn dispatcher_mut(&mut self) -> &mut BackendDispatcher {
        &mut self.dispatcher
    }

    pub fn ring(&self) -> &FrameRing {
        &self.ring
    }

    /// Tear the session down, handing the dispatcher back (with its metrics).
    pub fn into_dispatcher(self) -> BackendDispatcher {
        self.dispatcher
    }

    /// Drive the source to exhaustion, delivering adjusted frames to the sink
    /// in frame order.
    pub fn run(&mut self, source: Box<dyn FrameSource>, sink: &mut dyn FrameSink) -> Result<SessionReport> {
        let mut report = SessionReport::default();
        let (tx, rx) = crossbeam_channel::bounded::<Frame>(CAPTURE_QUEUE_DEPTH);

        std::thread::scope(|scope| -> Result<()> {
            let producer = scope.spawn(move || {
                let mut source = source;
                loop {
                    match source.next_frame() {
                        Ok(Some(frame)) => {
                            if tx.send(frame).is_err() {
                                break; // consumer went away
                            }
                        }
                        Ok(None) => break,
                        Err(e) => {
                            log::error!("capture source failed: {e}");
                            break;
                        }
                    }
                }
            });

            while let Ok(frame) = rx.recv() {
                report.frames_in += 1;
                self.ingest(frame, sink, &mut report)?;
            }

            producer
                .join()
                .map_err(|_| anyhow::anyhow!("capture thread panicked"))?;
            Ok(())
        })?;

        self.drain(sink, &mut report)?;
        report.dropped_frames = self.ring.dropped_frames();
        Ok(report)
    }

    /// Process one captured frame through a ring slot, then drain whatever
    /// became ready.
    fn ingest(
        &mut self,
        frame: Frame,
        sink: &mut dyn FrameSink,
        report: &mut SessionReport,
    ) -> Result<()> {
        if (frame.width, frame.height) != self.ring.dimensions() {
            log::info!(
                "frame size changed to {}x{}; reallocating ring slots",
                frame.width,
                frame.height
            );
            self.ring.resize(frame.width, frame.height);
        }

        let index = self.ring.next_for_capture();
        let expected = frame.width as usize * frame.height as usize * 4;
        if frame.data.len() != expected {
            self.ring.mark_error(
                index,
                format!(
                    "captured buffer length {} does not match {}x{}",
                    frame.data.len(),
                    frame.width,
                    frame.height
                ),
            )?;
            return self.drain(sink, report);
        }
        self.ring.slot_mut(index).input.copy_from_slice(&frame.data);
        self.ring.mark_processing(index)?;

        let config = self.config;
        let slot = self.ring.slot_mut(index);
        let outcome = self.dispatcher.run_full_pipeline(
            &slot.input,
            frame.width,
            frame.height,
            &config,
            &mut slot.buffers,
        );
        match outcome {
            Ok(run) => {
                slot.last_run = Some(run);
                self.ring.mark_ready(index)?;
            }
            Err(e) => {
                log::error!("frame {} failed: {e}", self.ring.slot(index).frame_number());
                self.ring.mark_error(index, e.to_string())?;
            }
        }

        self.drain(sink, report)
    }

    /// Deliver ready slots in frame order and clear failed ones.
    fn drain(&mut self, sink: &mut dyn FrameSink, report: &mut SessionReport) -> Result<()> {
        while let Some(ready) = self.ring.get_ready() {
            sink.consume(self.ring.slot(ready))?;
            report.frames_out += 1;
            self.ring.mark_idle(ready)?;
        }
        for index in self.ring.get_errors() {
            report.frame_errors += 1;
            self.ring.mark_idle(index)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::BackendPreference;

    /// Yields the same frame a fixed number of times.
    struct RepeatSource {
        frame: Frame,
        remaining: usize,
    }

    impl FrameSource for RepeatSource {
        fn next_frame(&mut self) -> Result<Option<Frame>> {
            if self.remaining == 0 {
                return Ok(None);
            }
            self.remaining -= 1;
            Ok(Some(self.frame.clone()))
        }

        fn dimensions(&self) -> (u32, u32) {
            (self.frame.width, self.frame.height)
        }
    }

    #[derive(Default)]
    struct CollectSink {
        frame_numbers: Vec<i64>,
        last_output: Vec<u8>,
        adjusted: u64,
    }

    impl FrameSink for CollectSink {
        fn consume(&mut self, slot: &BufferSlot) -> Result<()> {
            self.frame_numbers.push(slot.frame_number());
            self.last_output = slot.buffers.output.clone();
            if let Some(run) = slot.last_run {
                self.adjusted += run.adjusted_pixels;
            }
            Ok(())
        }
    }

    fn text_frame(w: u32, h: u32) -> Frame {
        let mut data = vec![255u8; (w * h * 4) as usize];
        for y in 3..(h - 3) {
            for x in [7u32, 8] {
                let p = ((y * w + x) * 4) as usize;
                data[p..p + 3].copy_from_slice(&[160, 160, 160]);
            }
        }
        Frame {
            data,
            width: w,
            height: h,
        }
    }

    fn session(w: u32, h: u32) -> ContrastSession {
        let mut dispatcher = BackendDispatcher::new();
        dispatcher.initialize(BackendPreference::Reference);
        ContrastSession::new(dispatcher, ContrastConfig::default(), w, h).unwrap()
    }

    #[test]
    fn delivers_all_frames_in_order() {
        let (w, h) = (24u32, 16u32);
        let mut session = session(w, h);
        let mut sink = CollectSink::default();
        let report = session
            .run(
                Box::new(RepeatSource {
                    frame: text_frame(w, h),
                    remaining: 5,
                }),
                &mut sink,
            )
            .unwrap();

        assert_eq!(report.frames_in, 5);
        assert_eq!(report.frames_out, 5);
        assert_eq!(report.frame_errors, 0);
        assert_eq!(sink.frame_numbers, vec![0, 1, 2, 3, 4]);
        assert!(sink.adjusted > 0);
        assert_eq!(session.dispatcher().metrics().len(), 5);
    }

    #[test]
    fn resizes_ring_when_frames_change_shape() {
        let mut session = session(8, 8);
        let mut sink = CollectSink::default();
        let report = session
            .run(
                Box::new(RepeatSource {
                    frame: text_frame(32, 20),
                    remaining: 2,
                }),
                &mut sink,
            )
            .unwrap();
        assert_eq!(report.frames_out, 2);
        assert_eq!(session.ring().dimensions(), (32, 20));
        assert_eq!(sink.last_output.len(), 32 * 20 * 4);
    }

    #[test]
    fn session_requires_initialized_dispatcher() {
        let dispatcher = BackendDispatcher::new();
        assert!(ContrastSession::new(dispatcher, ContrastConfig::default(), 8, 8).is_err());
    }

    #[test]
    fn bad_capture_buffer_is_isolated() {
        let mut session = session(8, 8);
        struct BadThenGood {
            sent: usize,
        }
        impl FrameSource for BadThenGood {
            fn next_frame(&mut self) -> Result<Option<Frame>> {
                self.sent += 1;
                match self.sent {
                    1 => Ok(Some(Frame {
                        data: vec![0; 13], // wrong length
                        width: 8,
                        height: 8,
                    })),
                    2 => Ok(Some(Frame {
                        data: vec![128; 8 * 8 * 4],
                        width: 8,
                        height: 8,
                    })),
                    _ => Ok(None),
                }
            }
            fn dimensions(&self) -> (u32, u32) {
                (8, 8)
            }
        }

        let mut sink = CollectSink::default();
        let report = session
            .run(Box::new(BadThenGood { sent: 0 }), &mut sink)
            .unwrap();
        assert_eq!(report.frames_in, 2);
        assert_eq!(report.frame_errors, 1);
        assert_eq!(report.frames_out, 1);
        // The failed frame did not poison the following one.
        assert_eq!(sink.frame_numbers, vec![1]);
    }
}
