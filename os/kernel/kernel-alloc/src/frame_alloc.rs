//! # Physical Frame Allocator
//!
//! One bit per 4 KiB frame: set means used. The bitmap storage is handed in
//! by the caller (a static array during boot, a `Vec` in tests), so the
//! allocator itself never allocates.
//!
//! Frames are handed out **first fit**, lowest id first. Fully used words
//! are skipped 64 frames at a time; that changes nothing about the order.
//!
//! ```rust
//! use kernel_alloc::frame_alloc::BitmapFrameAlloc;
//! use kernel_info::boot::MemoryRegion;
//!
//! let mut words = [0u64; 2];
//! let mut frames = BitmapFrameAlloc::new(&mut words);
//! frames.init(&[MemoryRegion::available(0, 128 * 4096)], 4 * 4096);
//!
//! assert_eq!(frames.total_count(), 128);
//! assert_eq!(frames.free_count(), 124);
//! let first = frames.alloc().unwrap();
//! assert_eq!(first.index(), 4);
//! frames.free(first).unwrap();
//! ```

use kernel_info::boot::MemoryRegion;
use kernel_info::memory::PAGE_SIZE;
use kernel_vmem::{Frame, FrameAlloc};
use log::{debug, info, warn};

/// Bits per bitmap word.
const BITS: usize = u64::BITS as usize;

/// Why a frame could not be returned.
#[derive(Debug, Copy, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FrameAllocError {
    /// The frame id lies beyond the managed physical memory.
    #[error("frame {0} is outside of managed memory")]
    OutOfRange(Frame),
    /// The frame is already free.
    #[error("frame {0} is not allocated")]
    NotAllocated(Frame),
}

/// Bitmap allocator over `total_count()` frames starting at physical 0.
pub struct BitmapFrameAlloc<'a> {
    bitmap: &'a mut [u64],
    total: usize,
    free: usize,
}

impl<'a> BitmapFrameAlloc<'a> {
    /// Wrap the bitmap storage. Nothing is allocatable until [`init`](Self::init).
    pub fn new(bitmap: &'a mut [u64]) -> Self {
        bitmap.fill(u64::MAX);
        Self {
            bitmap,
            total: 0,
            free: 0,
        }
    }

    /// Highest number of frames the bitmap can describe.
    #[inline]
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.bitmap.len() * BITS
    }

    /// Build the bitmap from the boot memory map.
    ///
    /// Every frame starts out used; whole frames inside `Available` regions
    /// are freed, then `[0, reserved_low_end)` is marked used again no matter
    /// what the map claims (kernel image, boot structures, this bitmap).
    /// Memory beyond [`capacity`](Self::capacity) is ignored.
    #[allow(clippy::cast_possible_truncation)]
    pub fn init(&mut self, regions: &[MemoryRegion], reserved_low_end: u64) {
        self.bitmap.fill(u64::MAX);
        self.free = 0;

        let highest = regions.iter().map(MemoryRegion::end).max().unwrap_or(0);
        self.total = usize::try_from(highest / PAGE_SIZE)
            .unwrap_or(usize::MAX)
            .min(self.capacity());

        for region in regions.iter().filter(|r| r.is_available()) {
            let first = region.start.div_ceil(PAGE_SIZE);
            let end = region.end() / PAGE_SIZE;
            let end = end.min(self.total as u64);
            for index in first..end {
                self.mark_free(index as usize);
            }
        }

        let reserved = reserved_low_end.div_ceil(PAGE_SIZE).min(self.total as u64);
        for index in 0..reserved {
            self.mark_used(index as usize);
        }

        info!(
            "frame allocator: {} of {} frames free ({} KiB)",
            self.free,
            self.total,
            self.free as u64 * PAGE_SIZE / 1024
        );
    }

    /// Allocate the lowest free frame, or `None` when memory is exhausted.
    pub fn alloc(&mut self) -> Option<Frame> {
        if self.free == 0 {
            return None;
        }
        for (w, word) in self.bitmap.iter().enumerate() {
            if *word == u64::MAX {
                continue;
            }
            let index = w * BITS + word.trailing_ones() as usize;
            if index >= self.total {
                break;
            }
            self.mark_used(index);
            let frame = Frame::from_index(index as u64);
            debug!("allocated frame {frame}");
            return Some(frame);
        }
        None
    }

    /// Return `frame` to the pool.
    ///
    /// # Errors
    /// [`FrameAllocError::OutOfRange`] for ids past [`total_count`](Self::total_count),
    /// [`FrameAllocError::NotAllocated`] for a double free. The bitmap is
    /// unchanged in both cases.
    pub fn free(&mut self, frame: Frame) -> Result<(), FrameAllocError> {
        let index = self.index_of(frame)?;
        if !self.bit(index) {
            return Err(FrameAllocError::NotAllocated(frame));
        }
        self.mark_free(index);
        debug!("freed frame {frame}");
        Ok(())
    }

    /// Whether `frame` is in use. Frames outside managed memory count as used.
    #[must_use]
    pub fn is_used(&self, frame: Frame) -> bool {
        self.index_of(frame).map_or(true, |i| self.bit(i))
    }

    /// Number of frames currently free.
    #[inline]
    #[must_use]
    pub const fn free_count(&self) -> usize {
        self.free
    }

    /// Number of frames under management.
    #[inline]
    #[must_use]
    pub const fn total_count(&self) -> usize {
        self.total
    }

    fn index_of(&self, frame: Frame) -> Result<usize, FrameAllocError> {
        usize::try_from(frame.index())
            .ok()
            .filter(|i| *i < self.total)
            .ok_or(FrameAllocError::OutOfRange(frame))
    }

    #[inline]
    fn bit(&self, index: usize) -> bool {
        self.bitmap[index / BITS] & (1 << (index % BITS)) != 0
    }

    fn mark_used(&mut self, index: usize) {
        if !self.bit(index) {
            self.bitmap[index / BITS] |= 1 << (index % BITS);
            self.free -= 1;
        }
    }

    fn mark_free(&mut self, index: usize) {
        if self.bit(index) {
            self.bitmap[index / BITS] &= !(1 << (index % BITS));
            self.free += 1;
        }
    }
}

impl FrameAlloc for BitmapFrameAlloc<'_> {
    fn alloc_frame(&mut self) -> Option<Frame> {
        self.alloc()
    }

    fn free_frame(&mut self, frame: Frame) -> bool {
        match self.free(frame) {
            Ok(()) => true,
            Err(e) => {
                warn!("rejected free: {e}");
                false
            }
        }
    }
}
