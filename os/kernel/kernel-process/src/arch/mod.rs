//! Hardware glue. Only built for the bare-metal x86-64 target; the rest of
//! the crate is architecture neutral and runs on the host under test.

#[cfg(all(target_arch = "x86_64", target_os = "none"))]
pub mod x86_64;
