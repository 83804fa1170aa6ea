//! # Address Space Manager
//!
//! [`Vmm`] owns the physical mapper and the MMU and knows the kernel
//! template root. Address spaces are referred to by their root [`Frame`];
//! the manager builds a short-lived [`AddressSpace`] walker for each call.
//!
//! Rules enforced here on top of the walker:
//!
//! - Every space shares PML4 entries `256..512` with the kernel template.
//!   Those entries are copied once at creation, so the kernel half may only
//!   be extended *below* an existing top-level entry. New top-level kernel
//!   entries are reserved at boot, before the first space is created
//!   ([`Vmm::reserve_kernel_entry`], or [`Vmm::reserve_kernel_tables`] for a
//!   whole window down to its page tables).
//! - User-accessible leaves are only accepted in the lower half.
//! - Every successful map or unmap invalidates exactly one TLB entry.
//!
//! Frame allocators are passed per call, so the caller decides how the
//! allocator is shared with the rest of the kernel.

use crate::mmu::Mmu;
use kernel_info::memory::KERNEL_HALF_FIRST_INDEX;
use kernel_vmem::{
    AddressSpace, Frame, FrameAlloc, MapError, MapSize, PageEntryBits, PageSize, PhysMapper,
    PhysicalAddress, Size2M, Size4K, VirtualAddress,
};
use log::{debug, info, warn};

/// Errors of the address space manager.
#[derive(Debug, Copy, Clone, PartialEq, Eq, thiserror::Error)]
pub enum VmmError {
    /// No frame left for the page being mapped.
    #[error("out of physical memory")]
    OutOfMemory,
    /// The page-table walk failed.
    #[error(transparent)]
    Map(#[from] MapError),
    /// The kernel half has no top-level entry covering the address.
    #[error("no shared kernel entry covers {0}")]
    KernelEntryMissing(VirtualAddress),
    /// A kernel-only operation was asked for a user-half address.
    #[error("{0} is not in the kernel half")]
    NotKernelHalf(VirtualAddress),
    /// A user-accessible mapping was requested in the kernel half.
    #[error("user mapping requested at kernel address {0}")]
    UserInKernelHalf(VirtualAddress),
    /// The kernel template space cannot be destroyed.
    #[error("the kernel address space cannot be destroyed")]
    KernelSpace,
    /// The space is loaded in CR3 right now.
    #[error("address space {0} is active")]
    ActiveSpace(Frame),
}

#[inline]
const fn is_kernel_half(va: VirtualAddress) -> bool {
    va.pml4_index() >= KERNEL_HALF_FIRST_INDEX
}

/// Creates, edits, switches and destroys address spaces.
pub struct Vmm<M: PhysMapper, U: Mmu> {
    mapper: M,
    mmu: U,
    kernel_root: Frame,
    active: Frame,
}

impl<M: PhysMapper, U: Mmu> Vmm<M, U> {
    /// Manage spaces derived from the kernel template at `kernel_root`.
    ///
    /// The active space is whatever the MMU currently has loaded.
    pub fn new(mapper: M, mmu: U, kernel_root: Frame) -> Self {
        let active = mmu.current_root();
        Self {
            mapper,
            mmu,
            kernel_root,
            active,
        }
    }

    /// Root of the kernel template space.
    #[inline]
    #[must_use]
    pub const fn kernel_space(&self) -> Frame {
        self.kernel_root
    }

    /// Root of the space currently loaded in the MMU.
    #[inline]
    #[must_use]
    pub const fn current_space(&self) -> Frame {
        self.active
    }

    #[inline]
    #[must_use]
    pub const fn mapper(&self) -> &M {
        &self.mapper
    }

    #[inline]
    #[must_use]
    pub const fn mmu(&self) -> &U {
        &self.mmu
    }

    /// Walker over the space rooted at `root`.
    #[inline]
    #[must_use]
    pub const fn space(&self, root: Frame) -> AddressSpace<'_, M> {
        AddressSpace::from_root(&self.mapper, root)
    }

    /// Make sure the kernel template has a top-level entry covering `va`.
    ///
    /// Spaces created afterwards share it. Spaces that already exist do not
    /// see it, so this belongs to boot. Returns whether a table was created.
    ///
    /// # Errors
    /// [`VmmError::NotKernelHalf`] for lower-half addresses, or the walk's
    /// out-of-memory error.
    pub fn reserve_kernel_entry<A: FrameAlloc>(
        &mut self,
        alloc: &mut A,
        va: VirtualAddress,
    ) -> Result<bool, VmmError> {
        if !is_kernel_half(va) {
            return Err(VmmError::NotKernelHalf(va));
        }
        let created = self
            .space(self.kernel_root)
            .ensure_top_level_entry(alloc, va)?;
        if created {
            info!("reserved kernel PML4 entry {} for {va}", va.pml4_index());
        }
        Ok(created)
    }

    /// Build every page table the kernel template needs to map 4 KiB pages
    /// anywhere in `start..start + len`.
    ///
    /// Later mappings in that window only take leaf frames, so undoing them
    /// with [`unmap`](Self::unmap) gives back everything they took.
    ///
    /// # Errors
    /// [`VmmError::NotKernelHalf`] unless the whole window is in the kernel
    /// half, or the walk's out-of-memory error.
    pub fn reserve_kernel_tables<A: FrameAlloc>(
        &mut self,
        alloc: &mut A,
        start: VirtualAddress,
        len: u64,
    ) -> Result<(), VmmError> {
        let end = start.as_u64().saturating_add(len.max(1));
        if !is_kernel_half(start) || !is_kernel_half(VirtualAddress::new(end - 1)) {
            return Err(VmmError::NotKernelHalf(start));
        }
        let aspace = self.space(self.kernel_root);
        let mut va = start.as_u64() & !(Size2M::SIZE - 1);
        let mut tables = 0usize;
        while va < end {
            aspace.ensure_page_table(alloc, VirtualAddress::new(va))?;
            tables += 1;
            va = va.saturating_add(Size2M::SIZE);
        }
        info!("reserved {tables} kernel page table(s) for {start}..{end:#x}");
        Ok(())
    }

    /// Allocate a new address space sharing the kernel half of the template.
    ///
    /// # Errors
    /// Out of memory for the root table; nothing is allocated then.
    pub fn create_space<A: FrameAlloc>(&mut self, alloc: &mut A) -> Result<Frame, VmmError> {
        let space = AddressSpace::create(&self.mapper, alloc, Some(self.kernel_root))?;
        let root = space.root();
        debug!("created address space {root}");
        Ok(root)
    }

    /// Free every private frame of the space rooted at `root`.
    ///
    /// Returns the number of frames handed back to `alloc`.
    ///
    /// # Errors
    /// The kernel template and the active space are refused untouched.
    pub fn destroy_space<A: FrameAlloc>(
        &mut self,
        alloc: &mut A,
        root: Frame,
    ) -> Result<usize, VmmError> {
        if root == self.kernel_root {
            return Err(VmmError::KernelSpace);
        }
        if root == self.active {
            return Err(VmmError::ActiveSpace(root));
        }
        Ok(self.space(root).destroy(alloc))
    }

    /// Load `root` into the MMU. A no-op when it already is active.
    pub fn switch_to(&mut self, root: Frame) {
        if root == self.active {
            return;
        }
        self.mmu.load_root(root);
        self.active = root;
    }

    /// Map one 4 KiB page `va → pa` in `space`.
    ///
    /// # Errors
    /// See [`map_sized`](Self::map_sized).
    pub fn map<A: FrameAlloc>(
        &mut self,
        alloc: &mut A,
        space: Frame,
        va: VirtualAddress,
        pa: PhysicalAddress,
        flags: PageEntryBits,
    ) -> Result<(), VmmError> {
        self.map_sized::<Size4K, A>(alloc, space, va, pa, flags)
    }

    /// Map one page of size `S` `va → pa` in `space`.
    ///
    /// # Errors
    /// - [`VmmError::UserInKernelHalf`] for user leaves above the canonical hole.
    /// - [`VmmError::KernelEntryMissing`] for kernel addresses without a
    ///   shared top-level entry.
    /// - [`VmmError::Map`] for everything the walk rejects; a 4 KiB page
    ///   inside a 1 GiB page among them.
    pub fn map_sized<S: MapSize, A: FrameAlloc>(
        &mut self,
        alloc: &mut A,
        space: Frame,
        va: VirtualAddress,
        pa: PhysicalAddress,
        flags: PageEntryBits,
    ) -> Result<(), VmmError> {
        let aspace = self.space(space);
        if is_kernel_half(va) {
            if flags.user_access() {
                return Err(VmmError::UserInKernelHalf(va));
            }
            if !aspace.has_top_level_entry(va) {
                return Err(VmmError::KernelEntryMissing(va));
            }
        }
        aspace.map::<S, A>(alloc, va, pa, flags)?;
        self.mmu.invalidate_page(va);
        Ok(())
    }

    /// Map a fresh, zeroed frame at `va` and mark it owned by the space.
    ///
    /// # Errors
    /// [`VmmError::OutOfMemory`] when no frame is left; any mapping error,
    /// in which case the frame is returned to `alloc`.
    pub fn map_anonymous<A: FrameAlloc>(
        &mut self,
        alloc: &mut A,
        space: Frame,
        va: VirtualAddress,
        flags: PageEntryBits,
    ) -> Result<Frame, VmmError> {
        let frame = alloc.alloc_frame().ok_or(VmmError::OutOfMemory)?;
        self.mapper.zero_frame(frame);
        if let Err(e) = self.map(alloc, space, va, frame.base(), flags.with_owned(true)) {
            alloc.free_frame(frame);
            return Err(e);
        }
        Ok(frame)
    }

    /// Remove the 4 KiB mapping at `va` and return the physical address it
    /// pointed to. Owned frames go back to `alloc`.
    ///
    /// # Errors
    /// Whatever [`AddressSpace::unmap`] rejects.
    pub fn unmap<A: FrameAlloc>(
        &mut self,
        alloc: &mut A,
        space: Frame,
        va: VirtualAddress,
    ) -> Result<PhysicalAddress, VmmError> {
        let old = self.space(space).unmap(alloc, va)?;
        self.mmu.invalidate_page(va);
        let pa = old.physical_address();
        if old.owned() && !alloc.free_frame(Frame::containing(pa)) {
            warn!("owned frame at {pa} for {va} was already free");
        }
        Ok(pa)
    }

    /// Physical address `va` resolves to in `space`.
    #[must_use]
    pub fn translate(&self, space: Frame, va: VirtualAddress) -> Option<PhysicalAddress> {
        self.space(space).translate(va)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame_alloc::BitmapFrameAlloc;
    use crate::testing::RecordingMmu;
    use kernel_info::boot::MemoryRegion;
    use kernel_info::memory::{KERNEL_STACKS_BASE, PAGE_SIZE};
    use kernel_vmem::testing::TestPhys;
    use kernel_vmem::Size1G;

    const FRAMES: usize = 256;

    fn setup(words: &mut [u64]) -> (Vmm<TestPhys, RecordingMmu>, BitmapFrameAlloc<'_>) {
        let mut frames = BitmapFrameAlloc::new(words);
        frames.init(&[MemoryRegion::available(0, FRAMES as u64 * PAGE_SIZE)], PAGE_SIZE);
        let kernel_root = frames.alloc().unwrap();
        let phys = TestPhys::with_frames(FRAMES);
        let vmm = Vmm::new(phys, RecordingMmu::new(kernel_root), kernel_root);
        (vmm, frames)
    }

    #[test]
    fn create_space_copies_kernel_half() {
        let mut words = [0u64; FRAMES / 64];
        let (mut vmm, mut frames) = setup(&mut words);
        let kva = VirtualAddress::new(KERNEL_STACKS_BASE);
        assert!(vmm.reserve_kernel_entry(&mut frames, kva).unwrap());
        assert!(!vmm.reserve_kernel_entry(&mut frames, kva).unwrap());

        let space = vmm.create_space(&mut frames).unwrap();
        let kernel = vmm.mapper().table_mut(vmm.kernel_space());
        let user = vmm.mapper().table_mut(space);
        for i in 256..512 {
            assert_eq!(kernel.get(i), user.get(i), "kernel entry {i} differs");
        }
        assert!(user.get(kva.pml4_index()).present());
        assert!((0..256).all(|i| !user.get(i).present()));
    }

    #[test]
    fn kernel_half_mappings_are_shared_and_guarded() {
        let mut words = [0u64; FRAMES / 64];
        let (mut vmm, mut frames) = setup(&mut words);
        let kva = VirtualAddress::new(KERNEL_STACKS_BASE);
        vmm.reserve_kernel_entry(&mut frames, kva).unwrap();
        let space = vmm.create_space(&mut frames).unwrap();

        // Mapped through the new space, visible through the template.
        let pa = PhysicalAddress::new(0x8_0000);
        vmm.map(&mut frames, space, kva, pa, PageEntryBits::kernel_rw())
            .unwrap();
        assert_eq!(vmm.translate(vmm.kernel_space(), kva), Some(pa));

        let elsewhere = VirtualAddress::new(0xffff_9000_0000_0000);
        assert_eq!(
            vmm.map(&mut frames, space, elsewhere, pa, PageEntryBits::kernel_rw()),
            Err(VmmError::KernelEntryMissing(elsewhere))
        );
        assert_eq!(
            vmm.map(&mut frames, space, kva + 0x1000, pa, PageEntryBits::user_rw()),
            Err(VmmError::UserInKernelHalf(kva + 0x1000))
        );
        assert_eq!(
            vmm.reserve_kernel_entry(&mut frames, VirtualAddress::new(0x1000)),
            Err(VmmError::NotKernelHalf(VirtualAddress::new(0x1000)))
        );
    }

    #[test]
    fn reserved_kernel_tables_make_window_mappings_leaf_only() {
        let mut words = [0u64; FRAMES / 64];
        let (mut vmm, mut frames) = setup(&mut words);
        let base = VirtualAddress::new(KERNEL_STACKS_BASE);
        let free = frames.free_count();
        // Straddles one 2 MiB boundary: PDPT, PD and two page tables.
        vmm.reserve_kernel_tables(&mut frames, base + 0x1f_f000, 0x2000)
            .unwrap();
        assert_eq!(free - frames.free_count(), 4);

        let before = frames.free_count();
        let root = vmm.kernel_space();
        for va in [base + 0x1f_f000, base + 0x20_0000] {
            vmm.map_anonymous(&mut frames, root, va, PageEntryBits::kernel_rw())
                .unwrap();
        }
        assert_eq!(before - frames.free_count(), 2);
        for va in [base + 0x1f_f000, base + 0x20_0000] {
            vmm.unmap(&mut frames, root, va).unwrap();
        }
        assert_eq!(frames.free_count(), before);

        // Reserving again takes nothing.
        vmm.reserve_kernel_tables(&mut frames, base, 0x40_0000).unwrap();
        assert_eq!(frames.free_count(), before);
        assert_eq!(
            vmm.reserve_kernel_tables(&mut frames, VirtualAddress::new(0x1000), 0x1000),
            Err(VmmError::NotKernelHalf(VirtualAddress::new(0x1000)))
        );
    }

    #[test]
    fn every_map_and_unmap_invalidates_one_page() {
        let mut words = [0u64; FRAMES / 64];
        let (mut vmm, mut frames) = setup(&mut words);
        let space = vmm.create_space(&mut frames).unwrap();
        let va = VirtualAddress::new(0x40_0000);

        vmm.map_anonymous(&mut frames, space, va, PageEntryBits::user_rw())
            .unwrap();
        vmm.map(
            &mut frames,
            space,
            va + 0x1000,
            PhysicalAddress::new(0x5000),
            PageEntryBits::user_ro(),
        )
        .unwrap();
        vmm.unmap(&mut frames, space, va).unwrap();
        assert_eq!(vmm.mmu().invalidated, vec![va, va + 0x1000, va]);

        // Failed operations leave the TLB alone.
        assert!(vmm.unmap(&mut frames, space, va).is_err());
        assert_eq!(vmm.mmu().invalidated.len(), 3);
    }

    #[test]
    fn unmap_returns_owned_frames_only() {
        let mut words = [0u64; FRAMES / 64];
        let (mut vmm, mut frames) = setup(&mut words);
        let space = vmm.create_space(&mut frames).unwrap();
        let va = VirtualAddress::new(0x40_0000);

        let frame = vmm
            .map_anonymous(&mut frames, space, va, PageEntryBits::user_rw())
            .unwrap();
        assert!(frames.is_used(frame));
        assert_eq!(vmm.translate(space, va), Some(frame.base()));
        assert_eq!(vmm.unmap(&mut frames, space, va), Ok(frame.base()));
        assert!(!frames.is_used(frame));

        let device = Frame::from_index(200);
        vmm.map(&mut frames, space, va, device.base(), PageEntryBits::user_rw())
            .unwrap();
        let free = frames.free_count();
        vmm.unmap(&mut frames, space, va).unwrap();
        assert_eq!(frames.free_count(), free);
    }

    #[test]
    fn anonymous_frames_are_zeroed() {
        let mut words = [0u64; FRAMES / 64];
        let (mut vmm, mut frames) = setup(&mut words);
        let space = vmm.create_space(&mut frames).unwrap();

        let stale = frames.alloc().unwrap();
        unsafe { *vmm.mapper().phys_to_mut::<u64>(stale.base() + 8) = 0xdead_beef };
        frames.free(stale).unwrap();

        // The data frame is allocated before the tables, so it reuses `stale`.
        let va = VirtualAddress::new(0x7000_0000);
        let frame = vmm
            .map_anonymous(&mut frames, space, va, PageEntryBits::user_rw())
            .unwrap();
        assert_eq!(frame, stale);
        assert_eq!(vmm.mapper().read_u64(frame.base() + 8), 0);
    }

    #[test]
    fn failed_anonymous_map_gives_the_frame_back() {
        let mut words = [0u64; FRAMES / 64];
        let (mut vmm, mut frames) = setup(&mut words);
        let space = vmm.create_space(&mut frames).unwrap();
        let va = VirtualAddress::new(0x0000_0080_0000_0000);
        vmm.map_sized::<Size1G, _>(
            &mut frames,
            space,
            va,
            PhysicalAddress::new(0x4000_0000),
            PageEntryBits::user_rw(),
        )
        .unwrap();

        let free = frames.free_count();
        let err = vmm
            .map_anonymous(&mut frames, space, va + 0x3000, PageEntryBits::user_rw())
            .unwrap_err();
        assert_eq!(err, VmmError::Map(MapError::InsideHugePage(va + 0x3000)));
        assert_eq!(frames.free_count(), free);
    }

    #[test]
    fn split_through_the_manager_keeps_neighbours() {
        let mut words = [0u64; FRAMES / 64];
        let (mut vmm, mut frames) = setup(&mut words);
        let space = vmm.create_space(&mut frames).unwrap();
        let base = VirtualAddress::new(0x20_0000);
        let huge = PhysicalAddress::new(0x100_0000);
        vmm.map_sized::<Size2M, _>(&mut frames, space, base, huge, PageEntryBits::user_rw())
            .unwrap();
        vmm.map(
            &mut frames,
            space,
            base + 0x2000,
            PhysicalAddress::new(0x3000),
            PageEntryBits::user_rw(),
        )
        .unwrap();
        assert_eq!(vmm.translate(space, base + 0x1000), Some(huge + 0x1000));
        assert_eq!(vmm.translate(space, base + 0x2000), Some(PhysicalAddress::new(0x3000)));
        assert_eq!(vmm.translate(space, base + 0x3000), Some(huge + 0x3000));
    }

    #[test]
    fn destroy_returns_all_private_frames() {
        let mut words = [0u64; FRAMES / 64];
        let (mut vmm, mut frames) = setup(&mut words);
        vmm.reserve_kernel_entry(&mut frames, VirtualAddress::new(KERNEL_STACKS_BASE))
            .unwrap();
        let before = frames.free_count();

        let space = vmm.create_space(&mut frames).unwrap();
        for page in 0..4u64 {
            vmm.map_anonymous(
                &mut frames,
                space,
                VirtualAddress::new(0x40_0000 + page * 0x1000),
                PageEntryBits::user_rw(),
            )
            .unwrap();
        }
        vmm.map_anonymous(
            &mut frames,
            space,
            VirtualAddress::new(0x7fff_ffff_e000),
            PageEntryBits::user_rw(),
        )
        .unwrap();

        // root + PDPT + PD + PT for the low pages, PDPT + PD + PT for the
        // stack page, five data frames.
        let used = before - frames.free_count();
        assert_eq!(used, 1 + 3 + 3 + 5);
        assert_eq!(vmm.destroy_space(&mut frames, space), Ok(used));
        assert_eq!(frames.free_count(), before);
        // The shared kernel PDPT is still in use by the template.
        let kernel = vmm.mapper().table_mut(vmm.kernel_space());
        let pdpt = Frame::containing(kernel.get(510).physical_address());
        assert!(frames.is_used(pdpt));
    }

    #[test]
    fn switch_and_destroy_guards() {
        let mut words = [0u64; FRAMES / 64];
        let (mut vmm, mut frames) = setup(&mut words);
        let a = vmm.create_space(&mut frames).unwrap();
        let b = vmm.create_space(&mut frames).unwrap();

        assert_eq!(vmm.current_space(), vmm.kernel_space());
        vmm.switch_to(a);
        vmm.switch_to(a);
        vmm.switch_to(b);
        assert_eq!(vmm.current_space(), b);
        assert_eq!(vmm.mmu().loads, vec![a, b]);

        assert_eq!(vmm.destroy_space(&mut frames, b), Err(VmmError::ActiveSpace(b)));
        let kernel = vmm.kernel_space();
        assert_eq!(vmm.destroy_space(&mut frames, kernel), Err(VmmError::KernelSpace));
        assert_eq!(vmm.destroy_space(&mut frames, a), Ok(1));
    }
}
