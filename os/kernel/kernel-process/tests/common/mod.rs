#![allow(dead_code)]

use kernel_alloc::frame_alloc::BitmapFrameAlloc;
use kernel_alloc::testing::RecordingMmu;
use kernel_alloc::vmm::Vmm;
use kernel_info::boot::MemoryRegion;
use kernel_info::memory::PAGE_SIZE;
use kernel_process::switch::Platform;
use kernel_process::{Kernel, KernelConfig, Pid, Priority};
use kernel_vmem::VirtualAddress;
use kernel_vmem::testing::TestPhys;

pub const FRAMES: usize = 512;
pub const SLOTS: usize = 8;
pub const ENTRY: VirtualAddress = VirtualAddress::new(0x40_0000);

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Event {
    Eoi,
    PrivilegedStack(VirtualAddress),
}

#[derive(Default)]
pub struct RecordingPlatform {
    pub events: Vec<Event>,
}

impl RecordingPlatform {
    pub fn eois(&self) -> usize {
        self.events.iter().filter(|e| **e == Event::Eoi).count()
    }

    pub fn last_stack(&self) -> Option<VirtualAddress> {
        self.events.iter().rev().find_map(|e| match e {
            Event::PrivilegedStack(top) => Some(*top),
            Event::Eoi => None,
        })
    }
}

impl Platform for RecordingPlatform {
    fn end_of_interrupt(&mut self) {
        self.events.push(Event::Eoi);
    }

    fn set_privileged_stack(&mut self, top: VirtualAddress) {
        self.events.push(Event::PrivilegedStack(top));
    }
}

pub type TestKernel =
    Kernel<TestPhys, RecordingMmu, BitmapFrameAlloc<'static>, RecordingPlatform, SLOTS>;

/// A kernel over `frames` frames of RAM; frame 0 stays reserved and the
/// first free frame becomes the kernel template root.
pub fn boot_with(frames: usize, config: KernelConfig) -> TestKernel {
    let bitmap = Box::leak(vec![0u64; frames.div_ceil(64)].into_boxed_slice());
    let mut alloc = BitmapFrameAlloc::new(bitmap);
    alloc.init(&[MemoryRegion::available(0, frames as u64 * PAGE_SIZE)], PAGE_SIZE);
    let root = alloc.alloc().expect("a frame for the kernel root");
    let vmm = Vmm::new(TestPhys::with_frames(frames), RecordingMmu::new(root), root);
    Kernel::new(vmm, alloc, RecordingPlatform::default(), config).expect("kernel boots")
}

pub fn boot(config: KernelConfig) -> TestKernel {
    boot_with(FRAMES, config)
}

pub fn spawn(kernel: &mut TestKernel, name: &str, priority: Priority) -> Pid {
    kernel.spawn(name, ENTRY, priority).expect("spawn")
}

/// Deliver `n` timer interrupts, each from the current process's saved sp.
pub fn ticks(kernel: &mut TestKernel, n: usize) {
    for _ in 0..n {
        let sp = kernel.pcb(kernel.current_pid()).map_or(0, |p| p.saved_sp());
        kernel.on_timer_interrupt(sp);
    }
}

pub fn cpu_ticks(kernel: &TestKernel, pid: Pid) -> u64 {
    kernel.pcb(pid).expect("pid exists").cpu_ticks()
}
