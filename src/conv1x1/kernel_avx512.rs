//! AVX-512 VNNI kernel using `vpdpbusd`.
//!
//! vpdpbusd semantics per 32-bit lane i:
//!   acc[i] += sum_{j=0..3}( a_u8[j] * b_i8[4*i + j] )
//!
//! The `4i16o4i` weight block is laid out so that one 64-byte load is exactly
//! the `b` operand for one input-channel quad and 16 output channels:
//!   [quad 0: o0(i0..i3) o1(i0..i3) ... o15(i0..i3)] [quad 1] [quad 2] [quad 3]
//! The source side is 4 consecutive u8 channels of one pixel broadcast to all
//! 16 lanes. Each register tile covers `VNNI_UR` pixels × 16 output channels
//! and reuses the weight vector across its pixels.

use std::arch::x86_64::*;
use std::marker::PhantomData;

use crate::conv1x1::conf::{KernelConf, SIMD_W, VNNI_UR};
use crate::conv1x1::epilogue::{finalize, DstElem};
use crate::conv1x1::kernel::{CallParams, Conv1x1Kernel};
use crate::memory::{div_up, WEIGHTS_BLOCK_BYTES};

pub struct Avx512VnniKernel<D, const RELU: bool> {
    conf: KernelConf,
    _dst: PhantomData<D>,
}

impl<D: DstElem, const RELU: bool> Avx512VnniKernel<D, RELU> {
    pub fn new(conf: KernelConf) -> Self {
        debug_assert_eq!(conf.with_relu, RELU);
        debug_assert_eq!(conf.dst_dt, D::DATA_TYPE);
        Avx512VnniKernel { conf, _dst: PhantomData }
    }
}

impl<D: DstElem, const RELU: bool> Conv1x1Kernel for Avx512VnniKernel<D, RELU> {
    fn name(&self) -> &'static str {
        "jit_1x1:avx512_core_vnni"
    }

    fn conf(&self) -> &KernelConf {
        &self.conf
    }

    unsafe fn run(&self, p: &CallParams<'_>) {
        let conf = &self.conf;
        debug_assert!(p.spatial == 0 || p.src.len() >= (p.spatial - 1) * p.src_pix_stride + conf.ic);
        debug_assert!(
            p.weights.len() >= div_up(p.oc_work, SIMD_W) * conf.nb_ic * WEIGHTS_BLOCK_BYTES
        );

        accumulate_tile(
            p.src.as_ptr(),
            p.src_pix_stride,
            p.weights.as_ptr(),
            p.acc,
            p.out_pix_stride,
            p.spatial,
            p.oc_work,
            conf.ic,
            conf.nb_ic,
        );

        let dst = p.dst as *mut D;
        for pix in 0..p.spatial {
            let row = pix * p.out_pix_stride;
            for o in 0..p.oc_work {
                let acc = *p.acc.add(row + o);
                *dst.add(row + o) =
                    finalize::<D, RELU>(conf, acc, p.bias.as_ref(), p.oc_offset + o);
            }
        }
    }
}

/// Broadcast 4 consecutive u8 channels as a single i32 to all 16 lanes.
/// Fewer than 4 remaining channels are zero-extended so the read never
/// leaves the pixel.
#[inline]
#[target_feature(enable = "avx512f")]
unsafe fn broadcast_src_quad(ptr: *const u8, remaining: usize) -> __m512i {
    let quad = if remaining >= 4 {
        std::ptr::read_unaligned(ptr as *const i32)
    } else {
        let mut bytes = [0u8; 4];
        std::ptr::copy_nonoverlapping(ptr, bytes.as_mut_ptr(), remaining);
        i32::from_le_bytes(bytes)
    };
    _mm512_set1_epi32(quad)
}

/// Byte offset of input quad `q` within one output block's weight column.
#[inline]
fn weight_quad_offset(q: usize) -> usize {
    (q / 4) * WEIGHTS_BLOCK_BYTES + (q % 4) * 64
}

/// Weight vector for input quad `q` of the current output block.
#[inline]
#[target_feature(enable = "avx512f")]
unsafe fn load_weight_quad(block: *const i8, q: usize) -> __m512i {
    _mm512_loadu_si512(block.add(weight_quad_offset(q)) as *const _)
}

#[allow(clippy::too_many_arguments)]
#[target_feature(enable = "avx512f,avx512bw,avx512vnni")]
unsafe fn accumulate_tile(
    src: *const u8,
    src_stride: usize,
    weights: *const i8,
    acc: *mut i32,
    out_stride: usize,
    spatial: usize,
    oc_work: usize,
    ic: usize,
    nb_ic: usize,
) {
    let n_quads = div_up(ic, 4);
    let n_blocks = div_up(oc_work, SIMD_W);

    for ob in 0..n_blocks {
        let block = weights.add(ob * nb_ic * WEIGHTS_BLOCK_BYTES);
        let lanes = SIMD_W.min(oc_work - ob * SIMD_W);
        let mask: __mmask16 = if lanes == SIMD_W { 0xFFFF } else { (1u16 << lanes) - 1 };
        let acc_col = acc.add(ob * SIMD_W);

        let mut pix = 0usize;
        while pix + VNNI_UR <= spatial {
            let mut c = [_mm512_setzero_si512(); VNNI_UR];
            for q in 0..n_quads {
                let vw = load_weight_quad(block, q);
                let remaining = ic - q * 4;
                for (u, cu) in c.iter_mut().enumerate() {
                    let va = broadcast_src_quad(src.add((pix + u) * src_stride + q * 4), remaining);
                    *cu = _mm512_dpbusd_epi32(*cu, va, vw);
                }
            }
            for (u, cu) in c.iter().enumerate() {
                _mm512_mask_storeu_epi32(acc_col.add((pix + u) * out_stride), mask, *cu);
            }
            pix += VNNI_UR;
        }

        // Pixel tail
        while pix < spatial {
            let mut c0 = _mm512_setzero_si512();
            for q in 0..n_quads {
                let vw = load_weight_quad(block, q);
                let va = broadcast_src_quad(src.add(pix * src_stride + q * 4), ic - q * 4);
                c0 = _mm512_dpbusd_epi32(c0, va, vw);
            }
            _mm512_mask_storeu_epi32(acc_col.add(pix * out_stride), mask, c0);
            pix += 1;
        }
    }
}
