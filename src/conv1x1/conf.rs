//! Kernel configuration record and its derivation (`init_conf`).
//!
//! The configuration is computed once per primitive descriptor and is
//! read-only afterwards; every kernel implementation is a pure function of it.

use crate::attr::{OutputScales, PostOp, PrimitiveAttr, RoundMode};
use crate::cache_params::conv1x1_blocking;
use crate::conv_desc::ConvDesc;
use crate::dispatch::IsaLevel;
use crate::memory::{div_up, FormatTag, WEIGHTS_BLOCK};
use crate::types::{ConvError, ConvResult, DataType};

/// Output channels per vector (16 × i32 lanes of a zmm register).
pub const SIMD_W: usize = 16;
/// Output pixels per register tile of the VNNI kernel.
pub const VNNI_UR: usize = 4;

/// Everything the kernel and the driver need to know about one convolution.
#[derive(Debug, Clone, PartialEq)]
pub struct KernelConf {
    pub ngroups: usize,
    pub mb: usize,
    /// Input channels per group.
    pub ic: usize,
    /// Output channels per group.
    pub oc: usize,
    pub ic_total: usize,
    pub oc_total: usize,
    /// Spatial extents as seen by the kernel (after stride elimination the
    /// input extent equals the output extent).
    pub ih: usize,
    pub iw: usize,
    pub oh: usize,
    pub ow: usize,
    /// Output pixels per image.
    pub os: usize,
    pub stride_h: usize,
    pub stride_w: usize,
    pub t_pad: usize,
    pub l_pad: usize,

    pub ic_block: usize,
    pub oc_block: usize,
    pub nb_ic: usize,
    pub nb_oc: usize,
    /// Output pixels per register tile.
    pub ur: usize,
    /// Output pixels per work tile.
    pub bcast_block: usize,
    pub nb_bcast: usize,
    /// Output-channel blocks per work tile.
    pub load_blocking: usize,
    pub nb_load: usize,
    pub simd_w: usize,
    pub nthreads: usize,

    pub bias_dt: Option<DataType>,
    pub dst_dt: DataType,
    pub with_relu: bool,
    pub relu_negative_slope: f32,
    pub scale_mask: u32,
    /// One entry for a common scale, `oc_total` entries for per-channel.
    pub scales: Vec<f32>,
    pub round_mode: RoundMode,
    /// Bias, scale and relu leave the result integral, so the epilogue can
    /// skip the float conversion.
    pub integer_epilogue: bool,

    pub isa: IsaLevel,
    /// Source is gathered into unit-stride scratch before every tile.
    pub reduce_src: bool,
}

impl KernelConf {
    #[inline]
    pub fn with_bias(&self) -> bool {
        self.bias_dt.is_some()
    }

    /// Scale for global output channel `oc`.
    #[inline]
    pub fn scale(&self, oc: usize) -> f32 {
        if self.scale_mask == 0 {
            self.scales[0]
        } else {
            self.scales[oc]
        }
    }

    /// Number of independent work tiles of one `execute` call.
    #[inline]
    pub fn work_amount(&self) -> usize {
        self.mb * self.ngroups * self.nb_bcast * self.nb_load
    }

    /// Elements of the accumulator buffer (full output volume), `None` if
    /// the volume overflows `usize`.
    #[inline]
    pub fn acc_elems(&self) -> Option<usize> {
        self.mb
            .checked_mul(self.oc_total)?
            .checked_mul(self.oh)?
            .checked_mul(self.ow)
    }

    /// Scratch bytes one worker needs for a gathered source tile.
    #[inline]
    pub fn ws_per_thread(&self) -> usize {
        self.bcast_block * self.ic
    }
}

fn unimplemented<T>(reason: impl Into<String>) -> ConvResult<T> {
    Err(ConvError::Unimplemented(reason.into()))
}

/// Derive the kernel configuration.
///
/// `conv_d` is the descriptor the kernel sees: after stride elimination it
/// has unit strides and zero padding. All formats must already be concrete.
pub fn init_conf(
    conv_d: &ConvDesc,
    attr: &PrimitiveAttr,
    nthreads: usize,
    isa: IsaLevel,
    reduce_src: bool,
) -> ConvResult<KernelConf> {
    let (kh, kw) = conv_d.kernel_size();
    if (kh, kw) != (1, 1) {
        return unimplemented(format!("kernel {kh}x{kw} is not 1x1"));
    }
    if conv_d.src_desc.format != FormatTag::Nhwc || conv_d.dst_desc.format != FormatTag::Nhwc {
        return unimplemented(format!(
            "src/dst format {}/{} (need nhwc)",
            conv_d.src_desc.format, conv_d.dst_desc.format
        ));
    }
    let expected_wei = if conv_d.with_groups() {
        FormatTag::GOIhw4i16o4i
    } else {
        FormatTag::OIhw4i16o4i
    };
    if conv_d.weights_desc.format != expected_wei {
        return unimplemented(format!(
            "weights format {} (need {expected_wei})",
            conv_d.weights_desc.format
        ));
    }
    if let Some(bias) = &conv_d.bias_desc {
        if bias.format != FormatTag::X {
            return unimplemented(format!("bias format {} (need x)", bias.format));
        }
    }
    if conv_d.strides != [1, 1] || conv_d.padding_l != [0, 0] || conv_d.padding_r != [0, 0] {
        return unimplemented(format!(
            "kernel needs unit stride and no padding, got stride {:?} padding {:?}/{:?}",
            conv_d.strides, conv_d.padding_l, conv_d.padding_r
        ));
    }

    let (with_relu, relu_negative_slope) = match attr.post_ops.as_slice() {
        [] => (false, 0.0),
        [PostOp::Relu { negative_slope }] if negative_slope.is_finite() => {
            (true, *negative_slope)
        }
        other => return unimplemented(format!("post-ops {other:?}")),
    };

    let oc_total = conv_d.oc();
    let (scale_mask, scales) = match &attr.output_scales {
        OutputScales::Common(s) => (0, vec![*s]),
        OutputScales::PerOc(v) if v.len() == oc_total => (1 << 1, v.clone()),
        OutputScales::PerOc(v) => {
            return unimplemented(format!(
                "{} per-channel scales for {oc_total} output channels",
                v.len()
            ))
        }
    };
    if scales.iter().any(|s| !s.is_finite()) {
        return unimplemented("non-finite output scale");
    }

    let bias_dt = conv_d.bias_desc.as_ref().map(|b| b.data_type);
    let integer_epilogue = attr.output_scales.is_identity()
        && bias_dt.map_or(true, |dt| dt.is_integral())
        && (!with_relu || relu_negative_slope == 0.0);

    let ngroups = conv_d.groups();
    let ic = conv_d.ic() / ngroups;
    let oc = oc_total / ngroups;
    let nb_ic = div_up(ic, WEIGHTS_BLOCK);
    let nb_oc = div_up(oc, WEIGHTS_BLOCK);
    let os = conv_d.oh() * conv_d.ow();
    let mb = conv_d.mb();
    let nthreads = nthreads.max(1);

    let ur = if isa >= IsaLevel::Avx512CoreVnni { VNNI_UR } else { 1 };
    let blocking = conv1x1_blocking(ic, nb_ic, nb_oc, os, ur);
    let load_blocking = blocking.load_blocking;
    let nb_load = div_up(nb_oc, load_blocking);

    // Shrink the spatial tile until every thread has at least one tile.
    let mut bcast_block = blocking.bcast_block;
    while mb * ngroups * div_up(os, bcast_block) * nb_load < nthreads && bcast_block > ur {
        bcast_block = (bcast_block / 2).max(ur);
        if bcast_block > ur {
            bcast_block = bcast_block / ur * ur;
        }
    }
    let nb_bcast = div_up(os, bcast_block);
    let work = mb * ngroups * nb_bcast * nb_load;

    Ok(KernelConf {
        ngroups,
        mb,
        ic,
        oc,
        ic_total: conv_d.ic(),
        oc_total,
        ih: conv_d.ih(),
        iw: conv_d.iw(),
        oh: conv_d.oh(),
        ow: conv_d.ow(),
        os,
        stride_h: conv_d.strides[0],
        stride_w: conv_d.strides[1],
        t_pad: conv_d.padding_l[0],
        l_pad: conv_d.padding_l[1],
        ic_block: WEIGHTS_BLOCK,
        oc_block: WEIGHTS_BLOCK,
        nb_ic,
        nb_oc,
        ur,
        bcast_block,
        nb_bcast,
        load_blocking,
        nb_load,
        simd_w: SIMD_W,
        nthreads: nthreads.min(work).max(1),
        bias_dt,
        dst_dt: conv_d.dst_desc.data_type,
        with_relu,
        relu_negative_slope,
        scale_mask,
        scales,
        round_mode: attr.round_mode,
        integer_epilogue,
        isa,
        reduce_src,
    })
}
