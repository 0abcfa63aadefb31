//! Memory descriptors, format tags and the offset math used by the
//! convolution kernel.
//!
//! Logical dimension order is always `[N, C, H, W]` for activations,
//! `[O, I, KH, KW]` for weights and `[G, O/G, I/G, KH, KW]` for grouped
//! weights, regardless of the physical format.

use std::fmt;

use crate::types::{ConvError, ConvResult, DataType};

/// Channel block of the blocked weight formats (16 output × 16 input).
pub const WEIGHTS_BLOCK: usize = 16;
/// Bytes in one `4i16o4i` block.
pub const WEIGHTS_BLOCK_BYTES: usize = WEIGHTS_BLOCK * WEIGHTS_BLOCK;

/// Physical layout of a tensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FormatTag {
    /// Unspecified; the primitive chooses.
    Any,
    /// Plain 1-D (bias).
    X,
    /// Channel-first activations.
    Nchw,
    /// Channel-last activations.
    Nhwc,
    /// Plain weights.
    Oihw,
    /// Plain grouped weights.
    Goihw,
    /// Weights tiled into 16×16 channel blocks; inside a block the input
    /// channels are split in quads so that 4 consecutive bytes feed one 32-bit
    /// lane of a 16-lane vector.
    OIhw4i16o4i,
    /// Grouped variant of `OIhw4i16o4i`.
    GOIhw4i16o4i,
}

impl FormatTag {
    /// Rank implied by the tag, `None` for `Any`.
    pub fn ndims(self) -> Option<usize> {
        match self {
            FormatTag::Any => None,
            FormatTag::X => Some(1),
            FormatTag::Nchw | FormatTag::Nhwc | FormatTag::Oihw | FormatTag::OIhw4i16o4i => {
                Some(4)
            }
            FormatTag::Goihw | FormatTag::GOIhw4i16o4i => Some(5),
        }
    }

    #[inline]
    pub fn is_blocked(self) -> bool {
        matches!(self, FormatTag::OIhw4i16o4i | FormatTag::GOIhw4i16o4i)
    }
}

impl fmt::Display for FormatTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FormatTag::Any => "any",
            FormatTag::X => "x",
            FormatTag::Nchw => "nchw",
            FormatTag::Nhwc => "nhwc",
            FormatTag::Oihw => "oihw",
            FormatTag::Goihw => "goihw",
            FormatTag::OIhw4i16o4i => "OIhw4i16o4i",
            FormatTag::GOIhw4i16o4i => "gOIhw4i16o4i",
        };
        f.write_str(s)
    }
}

/// Shape, element type and layout of one tensor.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MemoryDesc {
    pub dims: Vec<usize>,
    pub data_type: DataType,
    pub format: FormatTag,
}

impl MemoryDesc {
    pub fn new(dims: impl Into<Vec<usize>>, data_type: DataType, format: FormatTag) -> Self {
        MemoryDesc { dims: dims.into(), data_type, format }
    }

    #[inline]
    pub fn ndims(&self) -> usize {
        self.dims.len()
    }

    #[inline]
    pub fn is_any(&self) -> bool {
        self.format == FormatTag::Any
    }

    /// Number of logical elements, `None` if the volume overflows `usize`.
    pub fn checked_nelems(&self) -> Option<usize> {
        self.dims.iter().try_fold(1usize, |acc, &d| acc.checked_mul(d))
    }

    /// Number of logical elements. Saturates at `usize::MAX`; descriptors
    /// that passed `ConvDesc::check_shapes` never saturate.
    pub fn nelems(&self) -> usize {
        self.checked_nelems().unwrap_or(usize::MAX)
    }

    /// Number of physical elements, including the zero padding of blocked
    /// formats. `None` on overflow.
    pub fn checked_padded_nelems(&self) -> Option<usize> {
        let d = &self.dims;
        match self.format {
            FormatTag::OIhw4i16o4i if self.ndims() == 4 => checked_rnd_up(d[0], WEIGHTS_BLOCK)?
                .checked_mul(checked_rnd_up(d[1], WEIGHTS_BLOCK)?)?
                .checked_mul(d[2])?
                .checked_mul(d[3]),
            FormatTag::GOIhw4i16o4i if self.ndims() == 5 => d[0]
                .checked_mul(checked_rnd_up(d[1], WEIGHTS_BLOCK)?)?
                .checked_mul(checked_rnd_up(d[2], WEIGHTS_BLOCK)?)?
                .checked_mul(d[3])?
                .checked_mul(d[4]),
            _ => self.checked_nelems(),
        }
    }

    /// Saturating form of `checked_padded_nelems`.
    pub fn padded_nelems(&self) -> usize {
        self.checked_padded_nelems().unwrap_or(usize::MAX)
    }

    /// Physical size in bytes, `None` on overflow.
    pub fn checked_size_bytes(&self) -> Option<usize> {
        self.checked_padded_nelems()?.checked_mul(self.data_type.size_of())
    }

    /// Physical size in bytes. Saturates at `usize::MAX`.
    pub fn size_bytes(&self) -> usize {
        self.checked_size_bytes().unwrap_or(usize::MAX)
    }

    /// Assign a concrete format. Fails if the tag's rank disagrees with the
    /// descriptor's dims.
    pub fn set_format(&mut self, format: FormatTag) -> ConvResult<()> {
        match format.ndims() {
            Some(n) if n == self.ndims() => {
                self.format = format;
                Ok(())
            }
            _ => Err(ConvError::InvalidArgument(format!(
                "format {format} does not fit a {}-d tensor",
                self.ndims()
            ))),
        }
    }
}

impl fmt::Display for MemoryDesc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let dims: Vec<String> = self.dims.iter().map(|d| d.to_string()).collect();
        write!(f, "{:?}:{}:{}", self.data_type, self.format, dims.join("x"))
    }
}

#[inline]
pub(crate) fn div_up(a: usize, b: usize) -> usize {
    a.div_ceil(b)
}

#[inline]
fn checked_rnd_up(a: usize, b: usize) -> Option<usize> {
    a.checked_next_multiple_of(b)
}

/// Offset of `(n, c, h, w)` in a channel-last tensor of logical dims
/// `[_, c_total, h_total, w_total]`.
#[inline]
pub fn nhwc_offset(dims: &[usize], n: usize, c: usize, h: usize, w: usize) -> usize {
    let (ch, ih, iw) = (dims[1], dims[2], dims[3]);
    ((n * ih + h) * iw + w) * ch + c
}

/// Geometry of a blocked 1×1 weight tensor, per group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockedWeights {
    pub oc: usize,
    pub ic: usize,
    pub nb_oc: usize,
    pub nb_ic: usize,
}

impl BlockedWeights {
    pub fn new(oc: usize, ic: usize) -> Self {
        BlockedWeights {
            oc,
            ic,
            nb_oc: div_up(oc, WEIGHTS_BLOCK),
            nb_ic: div_up(ic, WEIGHTS_BLOCK),
        }
    }

    /// Elements per group, including padding.
    #[inline]
    pub fn group_stride(&self) -> usize {
        self.nb_oc * self.nb_ic * WEIGHTS_BLOCK_BYTES
    }

    /// Elements per output-channel block.
    #[inline]
    pub fn oc_block_stride(&self) -> usize {
        self.nb_ic * WEIGHTS_BLOCK_BYTES
    }

    /// Offset of weight `(o, i)` relative to the group base.
    #[inline]
    pub fn offset(&self, o: usize, i: usize) -> usize {
        let (ob, oi) = (o / WEIGHTS_BLOCK, o % WEIGHTS_BLOCK);
        let (ib, ii) = (i / WEIGHTS_BLOCK, i % WEIGHTS_BLOCK);
        (ob * self.nb_ic + ib) * WEIGHTS_BLOCK_BYTES + (ii / 4) * 64 + oi * 4 + ii % 4
    }
}

/// Split a 1×1 weights descriptor into `(groups, BlockedWeights)`.
pub fn blocked_geometry(weights: &MemoryDesc) -> ConvResult<(usize, BlockedWeights)> {
    let d = &weights.dims;
    match d.len() {
        4 if d[2] == 1 && d[3] == 1 => Ok((1, BlockedWeights::new(d[0], d[1]))),
        5 if d[3] == 1 && d[4] == 1 => Ok((d[0], BlockedWeights::new(d[1], d[2]))),
        _ => Err(ConvError::InvalidArgument(format!(
            "expected 1x1 weights, got dims {d:?}"
        ))),
    }
}

/// Reorder plain `oihw`/`goihw` 1×1 weights into the blocked layout described
/// by `blocked`. Padding lanes are zero.
pub fn pack_weights(plain: &[i8], blocked: &MemoryDesc) -> ConvResult<Vec<i8>> {
    if !blocked.format.is_blocked() {
        return Err(ConvError::InvalidArgument(format!(
            "pack target must be a blocked format, got {}",
            blocked.format
        )));
    }
    let (groups, geo) = blocked_geometry(blocked)?;
    if plain.len() != groups * geo.oc * geo.ic {
        return Err(ConvError::InvalidArgument(format!(
            "plain weights hold {} elements, descriptor needs {}",
            plain.len(),
            groups * geo.oc * geo.ic
        )));
    }

    let mut packed = vec![0i8; groups * geo.group_stride()];
    for g in 0..groups {
        let base = g * geo.group_stride();
        for o in 0..geo.oc {
            for i in 0..geo.ic {
                packed[base + geo.offset(o, i)] = plain[(g * geo.oc + o) * geo.ic + i];
            }
        }
    }
    Ok(packed)
}
