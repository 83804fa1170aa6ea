//! # Kernel Boot Information
//!
//! The loader reduces its firmware memory map to a flat list of
//! [`MemoryRegion`]s before handing control to the kernel.

/// What a physical memory range may be used for.
#[repr(u32)]
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum MemoryKind {
    /// Conventional RAM the frame allocator may hand out.
    Available = 0,
    /// Firmware, MMIO or otherwise unusable memory.
    Reserved = 1,
    /// ACPI tables; reclaimable once parsed, treated as reserved here.
    AcpiReclaimable = 2,
    /// The kernel image and loader-provided data.
    KernelAndModules = 3,
    /// Broken memory.
    Bad = 4,
}

/// A single physical memory range.
#[repr(C)]
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct MemoryRegion {
    /// Physical start address (inclusive).
    pub start: u64,
    /// Length in bytes.
    pub length: u64,
    /// Usage of the range.
    pub kind: MemoryKind,
}

impl MemoryRegion {
    /// Creates a region of `kind` spanning `length` bytes from `start`.
    #[must_use]
    pub const fn new(start: u64, length: u64, kind: MemoryKind) -> Self {
        Self {
            start,
            length,
            kind,
        }
    }

    /// Creates an [`Available`](MemoryKind::Available) region.
    #[must_use]
    pub const fn available(start: u64, length: u64) -> Self {
        Self::new(start, length, MemoryKind::Available)
    }

    /// End address (exclusive), saturating at the top of the address space.
    #[must_use]
    pub const fn end(&self) -> u64 {
        self.start.saturating_add(self.length)
    }

    /// Whether the frame allocator may use this range.
    #[must_use]
    pub const fn is_available(&self) -> bool {
        matches!(self.kind, MemoryKind::Available)
    }
}

/// Information the kernel needs right after the loader hands over control.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct KernelBootInfo {
    /// Pointer to the first [`MemoryRegion`] of the memory map.
    pub regions_ptr: u64,
    /// Number of regions in the memory map.
    pub regions_len: u64,
    /// Physical address of the boot page-table root (the kernel template).
    pub kernel_root: u64,
}
