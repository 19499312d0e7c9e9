//! Wires one producer and N consumers around one [`FrameRing`].

use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;

use arc_swap::ArcSwapOption;
use crossbeam::utils::CachePadded;
use metrics::counter;
use tracing::{info, warn};

use crate::frame::ImageDescriptor;
use crate::pipeline::consumer::RingConsumer;
use crate::pipeline::ring::FrameRing;
use crate::pipeline::stats::{FrequencyCounter, NoopProbe, PipelineProbe, PipelineStats};

/// Pipeline lifecycle. `Unbound` is terminal; a new pipeline is created for
/// the next session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PipelineState {
    Unallocated = 0,
    Allocated = 1,
    Bound = 2,
    Unbound = 3,
}

impl PipelineState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => PipelineState::Unallocated,
            1 => PipelineState::Allocated,
            2 => PipelineState::Bound,
            _ => PipelineState::Unbound,
        }
    }
}

/// The sole component connecting a producer to its consumers.
///
/// The producer's callback mechanism calls [`submit_frame`] on its own
/// thread; each consumer thread independently loops on
/// [`FrameRing::wait_for`] / [`FrameRing::get_slot`]. Diagnostics favor
/// freshness over precision and are safe to read from a monitor thread at any
/// time.
///
/// [`submit_frame`]: FramePipeline::submit_frame
pub struct FramePipeline {
    ring: ArcSwapOption<FrameRing>,
    consumers: Vec<Arc<dyn RingConsumer>>,

    state: AtomicU8,
    /// Serializes lifecycle transitions; never touched on the frame path.
    control: Mutex<()>,

    frame_length: AtomicUsize,
    stats: CachePadded<PipelineStats>,
    frequency: FrequencyCounter,
    probe: Box<dyn PipelineProbe>,
}

impl FramePipeline {
    /// Build a pipeline around a freshly allocated ring of `slot_count`
    /// frames of `descriptor.buffer_size` bytes.
    ///
    /// Allocation failure (bad capacity, geometry overflow) leaves the
    /// pipeline inert rather than raising: this runs on startup control paths
    /// where callers branch on [`allocated`](Self::allocated) instead of
    /// catching.
    pub fn new(
        consumers: Vec<Arc<dyn RingConsumer>>,
        slot_count: usize,
        descriptor: &ImageDescriptor,
        depth: u32,
    ) -> Self {
        Self::with_probe(consumers, slot_count, descriptor, depth, Box::new(NoopProbe))
    }

    /// Like [`new`](Self::new) but with benchmark hooks installed at
    /// construction time.
    pub fn with_probe(
        consumers: Vec<Arc<dyn RingConsumer>>,
        slot_count: usize,
        descriptor: &ImageDescriptor,
        depth: u32,
        probe: Box<dyn PipelineProbe>,
    ) -> Self {
        let (ring, state, frame_length) =
            match FrameRing::new(slot_count, descriptor.width, descriptor.height, depth) {
                Ok(ring) => {
                    let frame_length = descriptor.width as usize
                        * descriptor.height as usize
                        * depth as usize;
                    info!(
                        slots = slot_count,
                        frame_length,
                        width = descriptor.width,
                        height = descriptor.height,
                        "frame pipeline allocated"
                    );
                    (Some(Arc::new(ring)), PipelineState::Allocated, frame_length)
                }
                Err(err) => {
                    warn!(%err, "frame pipeline allocation failed, pipeline is inert");
                    (None, PipelineState::Unallocated, 0)
                }
            };

        Self {
            ring: ArcSwapOption::from(ring),
            consumers,
            state: AtomicU8::new(state as u8),
            control: Mutex::new(()),
            frame_length: AtomicUsize::new(frame_length),
            stats: CachePadded::new(PipelineStats::default()),
            frequency: FrequencyCounter::new(),
            probe,
        }
    }

    /// Connect the ring to its consumers and arm frame intake.
    ///
    /// Busy-waits (with yield) until every consumer reports started: no frame
    /// may be claimed before every consumer can report a position, otherwise
    /// an unstarted consumer would silently count as caught up and the
    /// writability check would be meaningless.
    pub fn bind(&self) {
        let _guard = self.control.lock().unwrap_or_else(PoisonError::into_inner);
        if self.state() != PipelineState::Allocated {
            return;
        }
        let Some(ring) = self.ring.load_full() else {
            return;
        };

        for consumer in &self.consumers {
            while !consumer.started() {
                thread::yield_now();
            }
        }
        for consumer in &self.consumers {
            consumer.attach(Arc::clone(&ring));
        }
        ring.register_consumers(self.consumers.clone());

        self.state.store(PipelineState::Bound as u8, Ordering::Release);
        info!(consumers = self.consumers.len(), "frame pipeline bound");
    }

    /// The producer's frame-notification entry point; producer thread only.
    ///
    /// Copies the payload into a claimed slot and publishes it, or counts a
    /// drop when every active consumer is still inside the wrap window. Never
    /// blocks: the producer is driven by camera/driver callbacks and stalling
    /// it risks corrupting a lower-level capture pipeline with no diagnostic
    /// recourse.
    pub fn submit_frame(&self, payload: &[u8]) {
        if self.state() != PipelineState::Bound {
            return;
        }
        let guard = self.ring.load();
        let Some(ring) = guard.as_ref() else {
            return;
        };

        self.frequency.tick();

        let claim = ring.try_claim();
        if !claim.writable {
            self.stats.frames_dropped.fetch_add(1, Ordering::Relaxed);
            counter!("framepipe_frames_dropped").increment(1);
            self.probe.frame_dropped(claim.position);
            return;
        }

        // SAFETY: submit_frame is producer-thread-only and the claim reported
        // the slot outside every active consumer's read window.
        let slot = unsafe { ring.slot_mut(claim.position) };
        if payload.len() <= slot.buffer().len() {
            slot.buffer_mut()[..payload.len()].copy_from_slice(payload);
            slot.set_populated(payload.len());
            ring.commit();
            self.stats.frames_committed.fetch_add(1, Ordering::Relaxed);
            counter!("framepipe_frames_committed").increment(1);
            self.probe.frame_committed(claim.position, payload.len());
        } else {
            // Geometry was negotiated through an ImageDescriptor up front; an
            // oversized payload is an anomaly, not a runtime error. Counted
            // separately from drops, never raised.
            self.stats.frames_oversized.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Disarm frame intake, clear consumer registration, and release the
    /// ring. Terminal for this pipeline instance; callers must have stopped
    /// every consumer thread first.
    pub fn teardown(&self) {
        let _guard = self.control.lock().unwrap_or_else(PoisonError::into_inner);
        if self.state() != PipelineState::Bound {
            return;
        }

        self.state.store(PipelineState::Unbound as u8, Ordering::Release);
        if let Some(ring) = self.ring.swap(None) {
            ring.clear_consumers();
        }
        for consumer in &self.consumers {
            consumer.detach();
        }
        self.frame_length.store(0, Ordering::Relaxed);
        info!("frame pipeline unbound");
    }

    /// Clear the drop counter from the monitor thread.
    pub fn reset_drops(&self) {
        self.stats.frames_dropped.store(0, Ordering::Relaxed);
    }

    pub fn state(&self) -> PipelineState {
        PipelineState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn allocated(&self) -> bool {
        self.state() != PipelineState::Unallocated
    }

    /// Size in bytes of one slot buffer; 0 once unbound.
    pub fn frame_length(&self) -> usize {
        self.frame_length.load(Ordering::Relaxed)
    }

    /// Frames discarded because every active consumer was behind. Stale reads
    /// are acceptable.
    pub fn drops(&self) -> u64 {
        self.stats.frames_dropped.load(Ordering::Relaxed)
    }

    /// Frames committed so far.
    pub fn committed(&self) -> u64 {
        self.stats.frames_committed.load(Ordering::Relaxed)
    }

    /// Payloads skipped because they exceeded the slot buffer.
    pub fn oversized(&self) -> u64 {
        self.stats.frames_oversized.load(Ordering::Relaxed)
    }

    /// Approximate producer rate in hertz.
    pub fn frequency(&self) -> f64 {
        self.frequency.hertz()
    }

    /// The shared ring, for consumer threads polling outside the handle
    /// trait. `None` before allocation and after teardown.
    pub fn ring(&self) -> Option<Arc<FrameRing>> {
        self.ring.load_full()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, AtomicI64};

    use super::*;
    use crate::frame::{ImageDescriptor, ImageFormat};

    struct TestConsumer {
        started: AtomicBool,
        active: AtomicBool,
        position: AtomicI64,
        ring: ArcSwapOption<FrameRing>,
    }

    impl TestConsumer {
        fn new(started: bool) -> Arc<Self> {
            Arc::new(Self {
                started: AtomicBool::new(started),
                active: AtomicBool::new(true),
                position: AtomicI64::new(-1),
                ring: ArcSwapOption::empty(),
            })
        }
    }

    impl RingConsumer for TestConsumer {
        fn started(&self) -> bool {
            self.started.load(Ordering::Acquire)
        }

        fn active(&self) -> bool {
            self.active.load(Ordering::Acquire)
        }

        fn position(&self) -> i64 {
            self.position.load(Ordering::Acquire)
        }

        fn attach(&self, ring: Arc<FrameRing>) {
            self.ring.store(Some(ring));
        }

        fn detach(&self) {
            self.ring.store(None);
        }
    }

    fn descriptor() -> ImageDescriptor {
        ImageDescriptor::new(ImageFormat::Rgb24, 4, 4, true)
    }

    #[test]
    fn bad_capacity_leaves_the_pipeline_inert() {
        let pipeline = FramePipeline::new(Vec::new(), 3, &descriptor(), 3);
        assert!(!pipeline.allocated());
        assert_eq!(pipeline.state(), PipelineState::Unallocated);
        assert_eq!(pipeline.frame_length(), 0);

        // Inert pipelines ignore the whole lifecycle instead of raising.
        pipeline.bind();
        assert_eq!(pipeline.state(), PipelineState::Unallocated);
        pipeline.submit_frame(&[1, 2, 3]);
        assert_eq!(pipeline.committed(), 0);
        assert_eq!(pipeline.drops(), 0);
    }

    #[test]
    fn lifecycle_runs_to_terminal_unbound() {
        let consumer = TestConsumer::new(true);
        let pipeline = FramePipeline::new(
            vec![consumer.clone() as Arc<dyn RingConsumer>],
            8,
            &descriptor(),
            3,
        );
        assert_eq!(pipeline.state(), PipelineState::Allocated);
        assert_eq!(pipeline.frame_length(), 48);

        pipeline.bind();
        assert_eq!(pipeline.state(), PipelineState::Bound);
        assert!(consumer.ring.load().is_some());

        pipeline.teardown();
        assert_eq!(pipeline.state(), PipelineState::Unbound);
        assert_eq!(pipeline.frame_length(), 0);
        assert!(consumer.ring.load().is_none());
        assert!(pipeline.ring().is_none());

        // Unbound is terminal.
        pipeline.bind();
        assert_eq!(pipeline.state(), PipelineState::Unbound);
    }

    #[test]
    fn submit_before_bind_is_ignored() {
        let pipeline = FramePipeline::new(Vec::new(), 8, &descriptor(), 3);
        pipeline.submit_frame(&[0u8; 16]);
        assert_eq!(pipeline.committed(), 0);
        assert_eq!(pipeline.ring().map(|r| r.producer_position()), Some(-1));
    }

    #[test]
    fn bind_waits_for_every_consumer_to_start() {
        let consumer = TestConsumer::new(false);
        let pipeline = Arc::new(FramePipeline::new(
            vec![consumer.clone() as Arc<dyn RingConsumer>],
            8,
            &descriptor(),
            3,
        ));

        let starter = {
            let consumer = consumer.clone();
            thread::spawn(move || {
                thread::sleep(std::time::Duration::from_millis(20));
                consumer.started.store(true, Ordering::Release);
            })
        };

        pipeline.bind(); // must not return before the consumer starts
        assert_eq!(pipeline.state(), PipelineState::Bound);
        assert!(consumer.started());
        starter.join().expect("starter thread panicked");
    }

    #[test]
    fn committed_payload_round_trips() {
        let pipeline = FramePipeline::new(Vec::new(), 8, &descriptor(), 3);
        pipeline.bind();

        let payload = [0xAB; 20];
        pipeline.submit_frame(&payload);
        assert_eq!(pipeline.committed(), 1);

        let ring = pipeline.ring().expect("ring released early");
        assert_eq!(ring.producer_position(), 0);
        let slot = ring.get_slot(0);
        assert_eq!(slot.payload(), &payload);
    }

    #[test]
    fn stalled_consumer_caps_commits_at_capacity() {
        let capacity = 8u64;
        let extra = 5u64;
        let consumer = TestConsumer::new(true); // pinned at -1 forever
        let pipeline = FramePipeline::new(
            vec![consumer as Arc<dyn RingConsumer>],
            capacity as usize,
            &descriptor(),
            3,
        );
        pipeline.bind();

        for i in 0..(capacity + extra) {
            pipeline.submit_frame(&[i as u8; 8]);
        }

        assert_eq!(pipeline.committed(), capacity);
        assert_eq!(pipeline.drops(), extra);
        let ring = pipeline.ring().expect("ring released early");
        assert_eq!(ring.producer_position(), capacity as i64 - 1);

        pipeline.reset_drops();
        assert_eq!(pipeline.drops(), 0);
    }

    #[test]
    fn oversized_payload_is_skipped_and_counted() {
        let pipeline = FramePipeline::new(Vec::new(), 8, &descriptor(), 3);
        pipeline.bind();

        pipeline.submit_frame(&[0u8; 49]); // slot holds 48 bytes
        assert_eq!(pipeline.oversized(), 1);
        assert_eq!(pipeline.committed(), 0);
        assert_eq!(pipeline.drops(), 0);
        assert_eq!(
            pipeline.ring().map(|r| r.producer_position()),
            Some(-1),
            "an oversized payload must not publish anything"
        );
    }

    #[test]
    fn probe_sees_commits_and_drops() {
        struct CountingProbe {
            committed: AtomicI64,
            dropped: AtomicI64,
        }
        impl PipelineProbe for CountingProbe {
            fn frame_committed(&self, _position: i64, _len: usize) {
                self.committed.fetch_add(1, Ordering::Relaxed);
            }
            fn frame_dropped(&self, _position: i64) {
                self.dropped.fetch_add(1, Ordering::Relaxed);
            }
        }

        let probe = Arc::new(CountingProbe {
            committed: AtomicI64::new(0),
            dropped: AtomicI64::new(0),
        });
        struct Forward(Arc<CountingProbe>);
        impl PipelineProbe for Forward {
            fn frame_committed(&self, position: i64, len: usize) {
                self.0.frame_committed(position, len);
            }
            fn frame_dropped(&self, position: i64) {
                self.0.frame_dropped(position);
            }
        }

        let consumer = TestConsumer::new(true);
        let pipeline = FramePipeline::with_probe(
            vec![consumer as Arc<dyn RingConsumer>],
            2,
            &descriptor(),
            3,
            Box::new(Forward(probe.clone())),
        );
        pipeline.bind();

        for _ in 0..5 {
            pipeline.submit_frame(&[1u8; 4]);
        }
        assert_eq!(probe.committed.load(Ordering::Relaxed), 2);
        assert_eq!(probe.dropped.load(Ordering::Relaxed), 3);
    }
}
