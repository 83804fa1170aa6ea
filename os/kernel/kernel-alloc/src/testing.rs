//! Host-side stand-ins for the MMU (feature `testing`).

use crate::mmu::Mmu;
use alloc::vec::Vec;
use kernel_vmem::{Frame, VirtualAddress};

/// An [`Mmu`] that only records what it was asked to do.
pub struct RecordingMmu {
    root: Frame,
    /// Every root passed to [`Mmu::load_root`], in order.
    pub loads: Vec<Frame>,
    /// Every page passed to [`Mmu::invalidate_page`], in order.
    pub invalidated: Vec<VirtualAddress>,
}

impl RecordingMmu {
    /// Starts out with `root` loaded.
    #[must_use]
    pub const fn new(root: Frame) -> Self {
        Self {
            root,
            loads: Vec::new(),
            invalidated: Vec::new(),
        }
    }
}

impl Mmu for RecordingMmu {
    fn load_root(&mut self, root: Frame) {
        self.root = root;
        self.loads.push(root);
    }

    fn current_root(&self) -> Frame {
        self.root
    }

    fn invalidate_page(&mut self, va: VirtualAddress) {
        self.invalidated.push(va);
    }
}
