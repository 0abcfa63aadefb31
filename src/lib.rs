//! qconv-kernels: quantized 1×1 forward convolution for CPU inference.
//!
//! This crate provides a u8 × s8 → s32 1×1 convolution primitive with:
//! - **Layout Negotiation**: `Any` tensors resolve to nhwc activations and
//!   `OIhw4i16o4i` blocked weights
//! - **ISA Specialization**: AVX-512 VNNI (`vpdpbusd`) kernel selected at
//!   creation time, with an interpreted fallback on other CPUs
//! - **Stride Elimination**: strided and padded problems are gathered to unit
//!   stride per tile so a single unit-stride kernel serves them all
//! - **Fused Epilogue**: bias, output scales, relu and saturating downcast
//!
//! # Quick Start
//!
//! ```ignore
//! use qconv_kernels::*;
//!
//! let pd = Conv1x1Pd::create(&desc, &PrimitiveAttr::new(), LayoutPolicy::PreferKernel, &CreateHints::default())?;
//! let weights = pack_weights(&plain_oihw, pd.weights_desc())?;
//! let mut prim = Conv1x1Primitive::new(
//!     &pd,
//!     InputBindings { src: &src, weights: &weights, bias: None },
//!     OutputBindings { dst: DstData::U8(&mut dst) },
//! )?;
//! let mut event = Event::new();
//! prim.execute(&mut event);
//! ```

pub mod attr;
pub mod cache_params;
pub mod conv1x1;
pub mod conv_desc;
pub mod dispatch;
pub mod event;
pub mod memory;
pub mod types;

pub use attr::{OutputScales, PostOp, PrimitiveAttr, RoundMode};
pub use conv1x1::{
    BiasData, Conv1x1Kernel, Conv1x1Pd, Conv1x1Primitive, CreateHints, DstData, InputBindings,
    KernelConf, LayoutPolicy, OutputBindings, RtusPlan,
};
pub use conv_desc::ConvDesc;
pub use dispatch::{device_profile, DeviceProfile, IsaLevel};
pub use event::{Event, EventState};
pub use memory::{pack_weights, FormatTag, MemoryDesc};
pub use types::{AlgKind, ConvError, ConvResult, DataType, PropKind};
