//! # Memory Layout

/// Size of a physical frame and of the smallest page.
pub const PAGE_SIZE: u64 = 4096;

/// Number of entries in every paging structure.
pub const ENTRIES_PER_TABLE: usize = 512;

/// First top-level (PML4) index belonging to the kernel half.
pub const KERNEL_HALF_FIRST_INDEX: usize = 256;

/// First canonical address of the kernel half.
pub const KERNEL_HALF_START: u64 = 0xffff_8000_0000_0000;

/// End of userspace VA range after which Kernel space begins.
pub const LAST_USERSPACE_ADDRESS: u64 = 0x0000_7fff_ffff_ffff;

/// A simple Higher Half Direct Map (HHDM) base.
/// Anything you map at [`HHDM_BASE`] + `pa` lets the kernel
/// access physical memory via a fixed offset.
pub const HHDM_BASE: u64 = 0xffff_8880_0000_0000;

/// Where the kernel executes (VMA), matches the linker script.
pub const KERNEL_BASE: u64 = 0xffff_ffff_8000_0000;

/// Where the kernel image is placed in *physical* memory (LMA).
pub const PHYS_LOAD: u64 = 0x0010_0000; // 1 MiB

/// Low physical memory that stays reserved no matter what the memory map says:
/// legacy area, kernel image and the frame bitmap.
pub const RESERVED_LOW_MEMORY_END: u64 = 0x0040_0000; // 4 MiB

/// Base of the window holding one kernel stack per process slot.
///
/// The top-level entry covering this window is created once in the kernel
/// template, so stacks mapped here are visible in every address space.
pub const KERNEL_STACKS_BASE: u64 = 0xffff_ff00_0000_0000;

/// Unmapped gap below every kernel stack in the window.
pub const KERNEL_STACK_GUARD_SIZE: u64 = PAGE_SIZE;

/// The default size of a per-process kernel stack.
pub const KERNEL_STACK_SIZE: usize = 16 * 1024;

/// The largest kernel stack the window reserves room for.
pub const KERNEL_STACK_MAX_SIZE: u64 = 64 * 1024;

/// Distance between two slots in the kernel stack window.
pub const KERNEL_STACK_STRIDE: u64 = KERNEL_STACK_MAX_SIZE + KERNEL_STACK_GUARD_SIZE;

/// Top (exclusive) of every user stack.
pub const USER_STACK_TOP: u64 = 0x0000_7fff_ffff_f000;

/// The default size of a per-process user stack.
pub const USER_STACK_SIZE: usize = 16 * 1024;

/// Capacity of the process table.
pub const MAX_PROCESSES: usize = 64;

/// Returns the top-level (PML4) index of a virtual address.
#[inline]
#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub const fn pml4_index(va: u64) -> usize {
    ((va >> 39) & 0x1ff) as usize
}

const _: () = {
    assert!(KERNEL_STACK_SIZE.is_multiple_of(4096));
    assert!(USER_STACK_SIZE.is_multiple_of(4096));
    assert!(KERNEL_STACK_SIZE as u64 <= KERNEL_STACK_MAX_SIZE);
    assert!(HHDM_BASE >= KERNEL_HALF_START);
    assert!(KERNEL_BASE > HHDM_BASE);
    assert!(pml4_index(KERNEL_HALF_START) == KERNEL_HALF_FIRST_INDEX);
    assert!(pml4_index(KERNEL_STACKS_BASE) >= KERNEL_HALF_FIRST_INDEX);
    assert!(pml4_index(KERNEL_STACKS_BASE) != pml4_index(KERNEL_BASE));
    assert!(pml4_index(KERNEL_STACKS_BASE) != pml4_index(HHDM_BASE));
    // The whole window for MAX_PROCESSES slots fits below one PML4 entry.
    assert!(KERNEL_STACK_STRIDE * (MAX_PROCESSES as u64) < (1 << 39));
    assert!(USER_STACK_TOP <= LAST_USERSPACE_ADDRESS);
    assert!(RESERVED_LOW_MEMORY_END > PHYS_LOAD);
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kernel_half_index_matches_boundary() {
        assert_eq!(pml4_index(KERNEL_HALF_START), 256);
        assert_eq!(pml4_index(LAST_USERSPACE_ADDRESS), 255);
        assert_eq!(pml4_index(KERNEL_STACKS_BASE), 510);
        assert_eq!(pml4_index(KERNEL_BASE), 511);
    }
}
