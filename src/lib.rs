pub mod error;
pub mod frame;
pub mod pipeline;

use arc_swap::ArcSwap;
use serde::{Deserialize, Serialize};

pub use error::RingError;
pub use frame::{Frame, ImageDescriptor, ImageFormat};
pub use pipeline::{FramePipeline, FrameRing, PipelineState, RingConsumer};

/// Global configuration that can be atomically swapped at runtime
pub static CONFIG: once_cell::sync::Lazy<ArcSwap<Config>> =
    once_cell::sync::Lazy::new(|| ArcSwap::from_pointee(Config::default()));

/// System configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub frame: FrameConfig,
    pub pipeline: PipelineConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FrameConfig {
    pub width: u32,
    pub height: u32,
    pub format: ImageFormat,
    pub top_down: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Ring capacity; must be a power of two.
    pub slot_count: usize,
    pub fps: u32,
}

impl FrameConfig {
    pub fn descriptor(&self) -> ImageDescriptor {
        ImageDescriptor::new(self.format, self.width, self.height, self.top_down)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            frame: FrameConfig {
                width: 800,
                height: 600,
                format: ImageFormat::Rgb24,
                top_down: true,
            },
            pipeline: PipelineConfig {
                slot_count: 8,
                fps: 30,
            },
        }
    }
}
