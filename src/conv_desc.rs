//! Logical convolution descriptor.

use std::fmt;

use crate::memory::{FormatTag, MemoryDesc};
use crate::types::{AlgKind, ConvError, ConvResult, DataType, PropKind};

/// Logical description of one 2-D convolution.
///
/// Group count is implied by the weights rank: 5-D weights
/// `[G, O/G, I/G, KH, KW]` describe a grouped convolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConvDesc {
    pub prop_kind: PropKind,
    pub alg_kind: AlgKind,
    pub src_desc: MemoryDesc,
    pub weights_desc: MemoryDesc,
    pub bias_desc: Option<MemoryDesc>,
    pub dst_desc: MemoryDesc,
    /// `[stride_h, stride_w]`
    pub strides: [usize; 2],
    /// `[top, left]`
    pub padding_l: [usize; 2],
    /// `[bottom, right]`
    pub padding_r: [usize; 2],
    pub accum_data_type: DataType,
}

impl ConvDesc {
    /// Direct forward convolution with s32 accumulation.
    #[allow(clippy::too_many_arguments)]
    pub fn forward(
        prop_kind: PropKind,
        src_desc: MemoryDesc,
        weights_desc: MemoryDesc,
        bias_desc: Option<MemoryDesc>,
        dst_desc: MemoryDesc,
        strides: [usize; 2],
        padding_l: [usize; 2],
        padding_r: [usize; 2],
    ) -> Self {
        ConvDesc {
            prop_kind,
            alg_kind: AlgKind::ConvolutionDirect,
            src_desc,
            weights_desc,
            bias_desc,
            dst_desc,
            strides,
            padding_l,
            padding_r,
            accum_data_type: DataType::S32,
        }
    }

    #[inline]
    pub fn with_groups(&self) -> bool {
        self.weights_desc.ndims() == 5
    }

    #[inline]
    pub fn with_bias(&self) -> bool {
        self.bias_desc.is_some()
    }

    #[inline]
    pub fn groups(&self) -> usize {
        if self.with_groups() {
            self.weights_desc.dims[0]
        } else {
            1
        }
    }

    #[inline]
    pub fn mb(&self) -> usize {
        self.src_desc.dims[0]
    }

    /// Total input channels (all groups).
    #[inline]
    pub fn ic(&self) -> usize {
        self.src_desc.dims[1]
    }

    /// Total output channels (all groups).
    #[inline]
    pub fn oc(&self) -> usize {
        self.dst_desc.dims[1]
    }

    #[inline]
    pub fn ih(&self) -> usize {
        self.src_desc.dims[2]
    }

    #[inline]
    pub fn iw(&self) -> usize {
        self.src_desc.dims[3]
    }

    #[inline]
    pub fn oh(&self) -> usize {
        self.dst_desc.dims[2]
    }

    #[inline]
    pub fn ow(&self) -> usize {
        self.dst_desc.dims[3]
    }

    /// `(kh, kw)` from the trailing weights dims.
    #[inline]
    pub fn kernel_size(&self) -> (usize, usize) {
        let d = &self.weights_desc.dims;
        (d[d.len() - 2], d[d.len() - 1])
    }

    /// Every tensor, the blocked weights and the s32 accumulator of the full
    /// output must have a byte size that fits in `usize`.
    fn check_volumes(&self) -> ConvResult<()> {
        let tag = if self.with_groups() {
            FormatTag::GOIhw4i16o4i
        } else {
            FormatTag::OIhw4i16o4i
        };
        let blocked_wei = MemoryDesc::new(self.weights_desc.dims.clone(), DataType::S8, tag);
        let acc_bytes = self
            .dst_desc
            .checked_nelems()
            .and_then(|n| n.checked_mul(self.accum_data_type.size_of()));

        let tensors = [
            ("src", self.src_desc.checked_size_bytes()),
            ("weights", self.weights_desc.checked_size_bytes()),
            ("blocked weights", blocked_wei.checked_size_bytes()),
            ("dst", self.dst_desc.checked_size_bytes()),
            ("accumulator", acc_bytes),
        ];
        for (name, bytes) in tensors {
            if bytes.is_none() {
                return Err(ConvError::InvalidArgument(format!(
                    "{name} volume overflows the address space"
                )));
            }
        }
        Ok(())
    }

    /// Check that all shapes are mutually consistent.
    pub fn check_shapes(&self) -> ConvResult<()> {
        let invalid = |msg: String| Err(ConvError::InvalidArgument(msg));

        if self.src_desc.ndims() != 4 || self.dst_desc.ndims() != 4 {
            return invalid(format!(
                "src/dst must be 4-d, got {}-d/{}-d",
                self.src_desc.ndims(),
                self.dst_desc.ndims()
            ));
        }
        if !matches!(self.weights_desc.ndims(), 4 | 5) {
            return invalid(format!(
                "weights must be 4-d or 5-d, got {}-d",
                self.weights_desc.ndims()
            ));
        }
        let has_zero_dim = [&self.src_desc, &self.weights_desc, &self.dst_desc]
            .iter()
            .any(|d| d.dims.contains(&0));
        if has_zero_dim {
            return invalid("zero-sized dimension".into());
        }
        self.check_volumes()?;
        if self.strides.contains(&0) {
            return invalid(format!("strides must be positive, got {:?}", self.strides));
        }

        let g = self.groups();
        let w = &self.weights_desc.dims;
        let (oc_g, ic_g) = if self.with_groups() { (w[1], w[2]) } else { (w[0], w[1]) };

        if self.dst_desc.dims[0] != self.mb() {
            return invalid(format!(
                "batch mismatch: src {} vs dst {}",
                self.mb(),
                self.dst_desc.dims[0]
            ));
        }
        if g * ic_g != self.ic() {
            return invalid(format!(
                "input channels: weights {g}x{ic_g} vs src {}",
                self.ic()
            ));
        }
        if g * oc_g != self.oc() {
            return invalid(format!(
                "output channels: weights {g}x{oc_g} vs dst {}",
                self.oc()
            ));
        }

        let (kh, kw) = self.kernel_size();
        let expected_oh =
            output_extent(self.ih(), kh, self.strides[0], self.padding_l[0], self.padding_r[0]);
        let expected_ow =
            output_extent(self.iw(), kw, self.strides[1], self.padding_l[1], self.padding_r[1]);
        if expected_oh != Some(self.oh()) || expected_ow != Some(self.ow()) {
            return invalid(format!(
                "output spatial {}x{} does not match expected {:?}x{:?}",
                self.oh(),
                self.ow(),
                expected_oh,
                expected_ow
            ));
        }

        if let Some(bias) = &self.bias_desc {
            if bias.dims != [self.oc()] {
                return invalid(format!(
                    "bias dims {:?} do not match {} output channels",
                    bias.dims,
                    self.oc()
                ));
            }
        }
        Ok(())
    }
}

/// Output extent of one spatial dimension, `None` if the padded input is
/// smaller than the kernel or does not fit in `usize`.
pub fn output_extent(
    input: usize,
    kernel: usize,
    stride: usize,
    pad_l: usize,
    pad_r: usize,
) -> Option<usize> {
    let padded = input.checked_add(pad_l)?.checked_add(pad_r)?;
    if padded < kernel || stride == 0 {
        return None;
    }
    Some((padded - kernel) / stride + 1)
}

impl fmt::Display for ConvDesc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "g{} mb{} ic{} ih{}iw{} oc{} oh{}ow{} s{}x{} p{}x{}",
            self.groups(),
            self.mb(),
            self.ic(),
            self.ih(),
            self.iw(),
            self.oc(),
            self.oh(),
            self.ow(),
            self.strides[0],
            self.strides[1],
            self.padding_l[0],
            self.padding_l[1],
        )
    }
}
