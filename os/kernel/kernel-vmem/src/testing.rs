//! In-memory stand-ins for physical memory, used by the tests of this crate
//! and of the crates built on top of it (feature `testing`).

use crate::{FrameAlloc, PhysMapper};
use alloc::vec::Vec;
use kernel_memory_addresses::{Frame, PhysicalAddress};

/// A **bump** allocator that also records frees so tests can check the
/// balance of an operation.
pub struct BumpAlloc {
    next: u64,
    end: u64,
    pub freed: Vec<Frame>,
}

impl BumpAlloc {
    /// Hands out frames `first_frame..end_frame`.
    #[must_use]
    pub const fn new(first_frame: u64, end_frame: u64) -> Self {
        Self {
            next: first_frame,
            end: end_frame,
            freed: Vec::new(),
        }
    }

    /// Id of the next frame to be handed out.
    #[must_use]
    pub const fn allocated(&self) -> u64 {
        self.next
    }
}

impl FrameAlloc for BumpAlloc {
    fn alloc_frame(&mut self) -> Option<Frame> {
        if self.next >= self.end {
            return None;
        }
        let f = Frame::from_index(self.next);
        self.next += 1;
        Some(f)
    }

    fn free_frame(&mut self, frame: Frame) -> bool {
        if self.freed.contains(&frame) {
            return false;
        }
        self.freed.push(frame);
        true
    }
}

/// A 4 KiB-aligned raw frame. We use this as our "physical RAM" backing store in tests.
#[repr(align(4096))]
pub struct Aligned4K([u8; 4096]);

/// A tiny in-memory "RAM": physical address `n * 4096` is `frames[n]`.
pub struct TestPhys {
    frames: Vec<Aligned4K>,
}

impl TestPhys {
    /// RAM of `n` zeroed frames.
    #[must_use]
    pub fn with_frames(n: usize) -> Self {
        let mut v = Vec::with_capacity(n);
        for _ in 0..n {
            v.push(Aligned4K([0u8; 4096]));
        }
        Self { frames: v }
    }

    /// Number of simulated frames.
    #[must_use]
    pub fn frame_count(&self) -> usize {
        self.frames.len()
    }

    /// Read the `u64` at `pa`.
    #[must_use]
    pub fn read_u64(&self, pa: PhysicalAddress) -> u64 {
        unsafe { *self.phys_to_mut::<u64>(pa) }
    }
}

impl PhysMapper for TestPhys {
    #[allow(clippy::cast_possible_truncation)]
    unsafe fn phys_to_mut<'a, T>(&self, pa: PhysicalAddress) -> &'a mut T {
        let idx = (pa.as_u64() >> 12) as usize;
        let off = (pa.as_u64() & 0xfff) as usize;
        assert!(idx < self.frames.len(), "{pa} is outside the simulated RAM");
        let base = (&raw const self.frames[idx]).cast::<u8>().cast_mut();
        // SAFETY: the caller promises `T` matches the bytes in the frame.
        unsafe { &mut *base.add(off).cast::<T>() }
    }
}
