//! Framepipe demo: a synthetic producer feeding a fast and a slow consumer.

use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use arc_swap::ArcSwapOption;
use color_eyre::Result;
use framepipe::{FramePipeline, FrameRing, RingConsumer};
use tracing::info;

/// A consumer thread that drains every committed position it can see.
struct PollingConsumer {
    name: &'static str,
    /// Per-frame processing cost; the slow consumer uses this to fall behind.
    work: Duration,
    started: AtomicBool,
    active: AtomicBool,
    position: AtomicI64,
    ring: ArcSwapOption<FrameRing>,
    frames_seen: AtomicU64,
}

impl PollingConsumer {
    fn new(name: &'static str, work: Duration) -> Arc<Self> {
        Arc::new(Self {
            name,
            work,
            started: AtomicBool::new(false),
            active: AtomicBool::new(true),
            position: AtomicI64::new(-1),
            ring: ArcSwapOption::empty(),
            frames_seen: AtomicU64::new(0),
        })
    }

    fn run(&self, stop: &AtomicBool) {
        self.started.store(true, Ordering::Release);
        while !stop.load(Ordering::Acquire) {
            let guard = self.ring.load();
            let Some(ring) = guard.as_ref() else {
                thread::yield_now();
                continue;
            };

            let next = self.position.load(Ordering::Acquire) + 1;
            let available = ring.producer_position();
            if available < next {
                thread::yield_now();
                continue;
            }

            // Drain everything committed so far in one pass.
            for position in next..=available {
                let frame = ring.get_slot(position);
                let _len = frame.populated();
                self.frames_seen.fetch_add(1, Ordering::Relaxed);
                self.position.store(position, Ordering::Release);
                if !self.work.is_zero() {
                    thread::sleep(self.work);
                }
            }
        }
    }
}

impl RingConsumer for PollingConsumer {
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

fn main() -> Result<()> {
    // Initialize error handling and logging
    color_eyre::install()?;
    tracing_subscriber::fmt()
        .with_env_filter("framepipe=debug")
        .with_timer(tracing_subscriber::fmt::time::uptime())
        .init();

    info!("Framepipe demo launching...");

    let config = framepipe::CONFIG.load_full();
    let descriptor = config.frame.descriptor();
    let depth = config.frame.format.bytes_per_pixel();
    let frame_interval = Duration::from_millis(1000 / u64::from(config.pipeline.fps.max(1)));

    let display = PollingConsumer::new("display", Duration::ZERO);
    let analyzer = PollingConsumer::new("analyzer", 2 * frame_interval);
    let consumers = vec![display.clone(), analyzer.clone()];

    let pipeline = Arc::new(FramePipeline::new(
        consumers
            .iter()
            .map(|c| c.clone() as Arc<dyn RingConsumer>)
            .collect(),
        config.pipeline.slot_count,
        &descriptor,
        depth,
    ));
    if !pipeline.allocated() {
        info!("pipeline is inert, nothing to do");
        return Ok(());
    }

    let stop = Arc::new(AtomicBool::new(false));
    let handles: Vec<_> = consumers
        .iter()
        .map(|consumer| {
            let consumer = consumer.clone();
            let stop = stop.clone();
            thread::spawn(move || consumer.run(&stop))
        })
        .collect();

    // Binding waits for both consumer loops to come up before arming intake.
    pipeline.bind();

    // Synthetic producer: two seconds of frames at the configured rate.
    let mut payload = vec![0u8; descriptor.buffer_size];
    for sequence in 0..u64::from(config.pipeline.fps) * 2 {
        payload.fill(sequence as u8);
        pipeline.submit_frame(&payload);
        thread::sleep(frame_interval);
    }

    info!(
        committed = pipeline.committed(),
        drops = pipeline.drops(),
        frequency = format!("{:.1} Hz", pipeline.frequency()),
        "producer finished"
    );
    for consumer in &consumers {
        info!(
            consumer = consumer.name,
            frames = consumer.frames_seen.load(Ordering::Relaxed),
            position = consumer.position(),
            "consumer totals"
        );
    }

    stop.store(true, Ordering::Release);
    for handle in handles {
        let _ = handle.join();
    }
    pipeline.teardown();

    info!("Framepipe demo shutting down");
    Ok(())
}
