#[cfg(feature = "bpf")]
mod bpf;
mod rlimit;

#[cfg(feature = "bpf")]
pub use bpf::*;
pub use rlimit::*;
