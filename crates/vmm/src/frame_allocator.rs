//! Physical frame allocation.
//!
//! Every address space on a machine draws its frames from one [`FrameAllocator`]. Frames are
//! claimed when an address space is created and released when it is destroyed; page
//! replacement reuses an address space's frames in place and never goes back to the
//! allocator.

use core::fmt;

use crate::{FrameNumber, bitmap::Bitmap};

/// Errors that can occur while claiming an index from one of the allocators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllocError {
    /// Every physical frame is in use.
    OutOfFrames,
    /// Every slot of a swap file is in use.
    OutOfSwapSlots,
    /// Every address space identifier is in use.
    OutOfSpaceIds,
}

impl fmt::Display for AllocError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AllocError::OutOfFrames => write!(f, "out of physical frames"),
            AllocError::OutOfSwapSlots => write!(f, "out of swap slots"),
            AllocError::OutOfSpaceIds => write!(f, "out of address space identifiers"),
        }
    }
}

impl core::error::Error for AllocError {}

/// Tracks which physical frames are claimed.
pub struct FrameAllocator {
    frames: Bitmap,
}

impl FrameAllocator {
    /// Creates an allocator managing `num_frames` frames, all free.
    pub fn new(num_frames: usize) -> Self {
        Self {
            frames: Bitmap::new(num_frames),
        }
    }

    /// Claims the lowest-numbered free frame.
    pub fn find(&mut self) -> Result<FrameNumber, AllocError> {
        self.frames
            .find()
            .map(FrameNumber::new)
            .ok_or(AllocError::OutOfFrames)
    }

    /// Releases a frame.
    ///
    /// # Panics
    /// Panics if the frame was not claimed.
    pub fn clear(&mut self, frame: FrameNumber) {
        self.frames.clear(frame.as_usize());
    }

    /// Returns true if the frame is currently claimed.
    pub fn is_claimed(&self, frame: FrameNumber) -> bool {
        self.frames.test(frame.as_usize())
    }

    /// Returns the total number of frames managed by this allocator.
    pub fn total_frames(&self) -> usize {
        self.frames.capacity()
    }

    /// Returns the number of free frames.
    pub fn free_frames(&self) -> usize {
        self.frames.num_clear()
    }

    /// Iterates over the claimed frames in ascending order.
    pub fn claimed(&self) -> impl Iterator<Item = FrameNumber> + '_ {
        self.frames.iter_claimed().map(FrameNumber::new)
    }
}
