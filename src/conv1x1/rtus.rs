//! Stride elimination ("reduce to unit stride").
//!
//! The kernel only handles unit-stride, unpadded 1×1 convolutions. A strided
//! (or padded) 1×1 convolution is the same computation applied to the
//! subsampled source, so the plan rewrites the descriptor to unit stride and,
//! at execution time, gathers each tile's source pixels into a dense scratch
//! buffer before the kernel runs.

use crate::conv_desc::ConvDesc;
use crate::memory::nhwc_offset;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RtusPlan {
    /// Gather is active.
    pub reduce_src: bool,
    /// Descriptor the kernel is configured against. When the plan is active
    /// its source has the destination's spatial extent, unit strides and no
    /// padding.
    pub conv_d: ConvDesc,
    /// Logical dims of the caller's source tensor.
    pub src_dims: [usize; 4],
    pub ow: usize,
    pub stride_h: usize,
    pub stride_w: usize,
    pub t_pad: usize,
    pub l_pad: usize,
}

/// Build the stride-elimination plan.
///
/// Engaged whenever a stride exceeds 1, or unconditionally when `force` is
/// set. Padding on a unit-stride descriptor does not engage it.
pub fn rtus_prepare(conv_d: &ConvDesc, force: bool) -> RtusPlan {
    let reduce_src = force || conv_d.strides != [1, 1];
    let s = &conv_d.src_desc.dims;
    let src_dims = [s[0], s[1], s[2], s[3]];

    let mut reduced = conv_d.clone();
    if reduce_src {
        reduced.strides = [1, 1];
        reduced.padding_l = [0, 0];
        reduced.padding_r = [0, 0];
        reduced.src_desc.dims = conv_d.dst_desc.dims.clone();
        reduced.src_desc.dims[1] = conv_d.ic();
    }

    RtusPlan {
        reduce_src,
        conv_d: reduced,
        src_dims,
        ow: conv_d.ow(),
        stride_h: conv_d.strides[0],
        stride_w: conv_d.strides[1],
        t_pad: conv_d.padding_l[0],
        l_pad: conv_d.padding_l[1],
    }
}

impl RtusPlan {
    /// Copy `count` output-pixel positions starting at `p_start` of image `n`
    /// into `scratch` as a dense `[count][ic]` block of group `g`'s channels.
    /// Positions that fall into the padding are written as zeros.
    pub fn gather(
        &self,
        src: &[u8],
        n: usize,
        g: usize,
        ic: usize,
        p_start: usize,
        count: usize,
        scratch: &mut [u8],
    ) {
        let [_, _, ih, iw] = self.src_dims;
        for (j, row) in scratch.chunks_exact_mut(ic).take(count).enumerate() {
            let p = p_start + j;
            let (ohi, owi) = (p / self.ow, p % self.ow);
            let h = (ohi * self.stride_h).checked_sub(self.t_pad).filter(|&h| h < ih);
            let w = (owi * self.stride_w).checked_sub(self.l_pad).filter(|&w| w < iw);
            match (h, w) {
                (Some(h), Some(w)) => {
                    let off = nhwc_offset(&self.src_dims, n, g * ic, h, w);
                    row.copy_from_slice(&src[off..off + ic]);
                }
                _ => row.fill(0),
            }
        }
    }
}
