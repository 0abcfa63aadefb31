//! Kernel handle interface and backend selection.
//!
//! A kernel is specialized once per primitive instance to a fixed
//! `KernelConf`, destination type and relu variant, and then invoked once per
//! work tile from any number of threads.

use crate::conv1x1::bindings::BiasData;
use crate::conv1x1::conf::KernelConf;
use crate::conv1x1::epilogue::DstElem;
#[cfg(target_arch = "x86_64")]
use crate::conv1x1::kernel_avx512::Avx512VnniKernel;
use crate::conv1x1::kernel_ref::RefKernel;
#[cfg(target_arch = "x86_64")]
use crate::dispatch::IsaLevel;
use crate::types::{ConvError, ConvResult, DataType};

/// Arguments of one tile invocation.
///
/// Offsets are already applied: `src` starts at the tile's first pixel and
/// the group's first input channel, `weights` at the tile's first output
/// channel block, `acc`/`dst` at the tile's first (pixel, output channel).
pub struct CallParams<'a> {
    pub src: &'a [u8],
    /// Elements between consecutive pixels of `src`.
    pub src_pix_stride: usize,
    pub weights: &'a [i8],
    /// Whole bias tensor, indexed by global output channel.
    pub bias: Option<BiasData<'a>>,
    /// Global index of the tile's first output channel.
    pub oc_offset: usize,
    pub acc: *mut i32,
    /// Type-erased destination pointer; the kernel knows the element type.
    pub dst: *mut u8,
    /// Elements between consecutive pixels of `acc` and `dst`.
    pub out_pix_stride: usize,
    /// Pixels in the tile.
    pub spatial: usize,
    /// Output channels in the tile.
    pub oc_work: usize,
}

/// Compute unit specialized to one configuration.
pub trait Conv1x1Kernel: Send + Sync {
    /// Implementation name, e.g. `jit_1x1:avx512_core_vnni`.
    fn name(&self) -> &'static str;

    fn conf(&self) -> &KernelConf;

    /// Accumulate the tile into `acc` and store the post-processed result to
    /// `dst`.
    ///
    /// # Safety
    /// For every `p < spatial` and `o < oc_work`, `acc` and `dst` must be
    /// valid for writes at `p * out_pix_stride + o` and no other thread may
    /// access those elements during the call. `src` must hold
    /// `(spatial - 1) * src_pix_stride + conf.ic` elements and `weights` the
    /// full blocked panel of `ceil(oc_work / 16)` output blocks.
    unsafe fn run(&self, p: &CallParams<'_>);
}

/// Build the kernel for `conf`: the ISA picks the backend, the destination
/// type and relu flag pick the monomorphized variant.
pub fn select_kernel(conf: &KernelConf) -> ConvResult<Box<dyn Conv1x1Kernel>> {
    match (conf.dst_dt, conf.with_relu) {
        (DataType::U8, false) => Ok(specialize::<u8, false>(conf)),
        (DataType::U8, true) => Ok(specialize::<u8, true>(conf)),
        (DataType::S8, false) => Ok(specialize::<i8, false>(conf)),
        (DataType::S8, true) => Ok(specialize::<i8, true>(conf)),
        (DataType::S32, false) => Ok(specialize::<i32, false>(conf)),
        (DataType::S32, true) => Ok(specialize::<i32, true>(conf)),
        (DataType::F32, false) => Ok(specialize::<f32, false>(conf)),
        (DataType::F32, true) => Ok(specialize::<f32, true>(conf)),
        (dt, _) => Err(ConvError::Unimplemented(format!("dst data type {dt:?}"))),
    }
}

fn specialize<D: DstElem, const RELU: bool>(conf: &KernelConf) -> Box<dyn Conv1x1Kernel> {
    #[cfg(target_arch = "x86_64")]
    {
        if conf.isa >= IsaLevel::Avx512CoreVnni && is_x86_feature_detected!("avx512vnni") {
            return Box::new(Avx512VnniKernel::<D, RELU>::new(conf.clone()));
        }
    }
    Box::new(RefKernel::<D, RELU>::new(conf.clone()))
}
