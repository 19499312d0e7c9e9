//! Fixed-capacity frame storage and geometry negotiation types.

use serde::{Deserialize, Serialize};

/// Pixel formats we support
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ImageFormat {
    /// Sentinel for "no compatible format"; only valid inside
    /// [`ImageDescriptor::INVALID`].
    None,
    Rgb24,
    Bgr24,
    Yuyv4,
    Mjpeg,
}

/// Immutable description of the frame geometry a producer and its consumers
/// agreed on before the pipeline is built. Negotiation data only; the ring
/// never stores it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageDescriptor {
    pub format: ImageFormat,
    pub width: u32,
    pub height: u32,
    pub top_down: bool,
    pub buffer_size: usize,
}

impl ImageDescriptor {
    /// The "no compatible format" sentinel.
    pub const INVALID: ImageDescriptor = ImageDescriptor {
        format: ImageFormat::None,
        width: 0,
        height: 0,
        top_down: false,
        buffer_size: 0,
    };

    pub fn new(format: ImageFormat, width: u32, height: u32, top_down: bool) -> Self {
        let depth = format.bytes_per_pixel();
        Self {
            format,
            width,
            height,
            top_down,
            buffer_size: width as usize * height as usize * depth as usize,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.format != ImageFormat::None && self.buffer_size > 0
    }

    /// Two descriptors are compatible when a frame produced under one can be
    /// consumed under the other without reallocation.
    pub fn compatible_with(&self, other: &ImageDescriptor) -> bool {
        self.is_valid()
            && self.format == other.format
            && self.width == other.width
            && self.height == other.height
            && self.buffer_size == other.buffer_size
    }
}

impl ImageFormat {
    pub fn bytes_per_pixel(&self) -> u32 {
        match self {
            ImageFormat::None => 0,
            ImageFormat::Rgb24 | ImageFormat::Bgr24 => 3,
            ImageFormat::Yuyv4 => 2,
            // Compressed; budgeted at the worst case of one byte per pixel.
            ImageFormat::Mjpeg => 1,
        }
    }
}

/// Fixed-capacity storage for one frame: a buffer of `width * height * depth`
/// bytes allocated once, plus the payload length actually written into it.
/// Mutated only by the producer, read by consumers; callers must respect the
/// fixed capacity.
#[derive(Debug)]
pub struct Frame {
    width: u32,
    height: u32,
    depth: u32,
    data: Box<[u8]>,
    populated: usize,
}

impl Frame {
    pub fn new(width: u32, height: u32, depth: u32) -> Self {
        let len = width as usize * height as usize * depth as usize;
        Self {
            width,
            height,
            depth,
            data: vec![0u8; len].into_boxed_slice(),
            populated: 0,
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn depth(&self) -> u32 {
        self.depth
    }

    pub fn buffer(&self) -> &[u8] {
        &self.data
    }

    pub fn buffer_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    /// Bytes of the buffer holding real payload.
    pub fn populated(&self) -> usize {
        self.populated
    }

    pub fn set_populated(&mut self, len: usize) {
        debug_assert!(len <= self.data.len());
        self.populated = len;
    }

    /// The payload written by the last producer pass over this slot.
    pub fn payload(&self) -> &[u8] {
        &self.data[..self.populated]
    }
}
