//! The external consumer contract.

use std::sync::Arc;

use crate::pipeline::ring::FrameRing;

/// Handle to one consumer thread, queried by the ring's writability check and
/// managed by [`FramePipeline`](crate::pipeline::FramePipeline) during
/// bind/unbind.
///
/// Positions are monotonic: `position()` is the last slot position this
/// consumer has finished processing, `-1` before it has processed any. A
/// consumer owns no slot memory; it only holds a read view keyed by position.
pub trait RingConsumer: Send + Sync {
    /// Latches true once the consumer's processing loop is running.
    fn started(&self) -> bool;

    /// Consumers reporting false are excluded from backpressure without being
    /// unregistered.
    fn active(&self) -> bool;

    /// Last position fully processed; never decreases.
    fn position(&self) -> i64;

    /// Hand over a shared view of the ring this consumer will read from.
    fn attach(&self, ring: Arc<FrameRing>);

    /// Release the ring reference at unbind.
    fn detach(&self);
}
