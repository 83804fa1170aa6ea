//! # Runtime Configuration
//!
//! Compile-time layout lives in [`kernel_info::memory`]; everything a boot
//! path may want to choose is collected here.
//!
//! ```rust
//! use kernel_process::config::KernelConfig;
//! use kernel_process::scheduler::Policy;
//!
//! let config = KernelConfig::default()
//!     .with_policy(Policy::Priority)
//!     .with_user_stack_size(32 * 1024);
//! assert_eq!(config.policy(), Policy::Priority);
//! ```

use crate::scheduler::Policy;
use kernel_info::memory::{KERNEL_STACK_SIZE, USER_STACK_SIZE};
use log::LevelFilter;
use utils_accessors_derive::{Getters, Setters};

/// Knobs for [`Kernel`](crate::Kernel).
#[derive(Copy, Clone, Debug, PartialEq, Eq, Setters, Getters)]
pub struct KernelConfig {
    /// Scheduling policy at boot.
    #[getters(copy)]
    policy: Policy,
    /// Bytes of kernel stack per process; rounded up to whole pages.
    #[getters(copy)]
    kernel_stack_size: usize,
    /// Bytes of user stack per process; rounded up to whole pages.
    #[getters(copy)]
    user_stack_size: usize,
    /// Level handed to the `log` facade when the logger is installed.
    #[getters(copy)]
    log_level: LevelFilter,
}

impl KernelConfig {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            policy: Policy::RoundRobin,
            kernel_stack_size: KERNEL_STACK_SIZE,
            user_stack_size: USER_STACK_SIZE,
            log_level: LevelFilter::Info,
        }
    }
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self::new()
    }
}
