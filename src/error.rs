use thiserror::Error;

/// Construction-time failures. Everything past construction is handled by
/// dropping frames, never by raising.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RingError {
    #[error("ring capacity must be a power of two, got {0}")]
    CapacityNotPowerOfTwo(usize),

    #[error("slot geometry {width}x{height}x{depth} overflows addressable size")]
    SlotSizeOverflow { width: u32, height: u32, depth: u32 },
}
