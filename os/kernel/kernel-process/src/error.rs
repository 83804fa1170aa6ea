use crate::pcb::{Pid, ProcessState};
use kernel_alloc::vmm::VmmError;

/// Errors of the process core. Every variant maps to a negative syscall
/// return value through [`ProcessError::errno`].
#[derive(Debug, Copy, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProcessError {
    /// No free slot in the process table.
    #[error("process table is full")]
    TableFull,
    /// Building the address space or a stack failed.
    #[error("memory: {0}")]
    Memory(#[from] VmmError),
    #[error("no process with pid {0}")]
    NoSuchProcess(Pid),
    /// The idle process cannot be stopped, killed or reprioritized.
    #[error("pid {0} is protected")]
    Protected(Pid),
    #[error("pid {pid} cannot go from {from} to {to}")]
    InvalidTransition {
        pid: Pid,
        from: ProcessState,
        to: ProcessState,
    },
    #[error("invalid priority {0}")]
    InvalidPriority(u8),
    /// `wait` with nothing to wait for.
    #[error("no child processes")]
    NoChildren,
    /// `wait` found children, but none has exited yet.
    #[error("no child has exited yet")]
    WouldBlock,
}

impl ProcessError {
    /// The value a syscall returns to user space for this error.
    #[must_use]
    pub const fn errno(&self) -> i64 {
        match self {
            Self::Protected(_) => -1,
            Self::NoSuchProcess(_) => -3,
            Self::NoChildren => -10,
            Self::TableFull | Self::WouldBlock => -11,
            Self::Memory(_) => -12,
            Self::InvalidTransition { .. } | Self::InvalidPriority(_) => -22,
        }
    }
}
