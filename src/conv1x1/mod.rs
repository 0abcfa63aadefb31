//! Quantized 1×1 forward convolution (u8 activations × s8 weights, s32
//! accumulation).
//!
//! `pd` resolves a descriptor into a `KernelConf`, `rtus` rewrites strided
//! problems to unit stride, `kernel*` hold the per-ISA compute units and
//! `primitive` drives them over a worker pool.

pub mod bindings;
pub mod conf;
pub mod epilogue;
pub mod kernel;
#[cfg(target_arch = "x86_64")]
pub mod kernel_avx512;
pub mod kernel_ref;
pub mod pd;
pub mod primitive;
pub mod rtus;
pub mod workspace;

pub use bindings::{BiasData, DstData, InputBindings, OutputBindings};
pub use conf::{init_conf, KernelConf};
pub use kernel::{select_kernel, Conv1x1Kernel};
pub use pd::{Conv1x1Pd, CreateHints, LayoutPolicy};
pub use primitive::Conv1x1Primitive;
pub use rtus::{rtus_prepare, RtusPlan};
pub use workspace::AlignedBuffer;
