pub mod consumer;
pub mod pipeline;
pub mod ring;
pub mod stats;

pub use consumer::RingConsumer;
pub use pipeline::FramePipeline;
pub use pipeline::PipelineState;
pub use ring::{Claim, FrameRing};
pub use stats::{FrequencyCounter, PipelineProbe};
