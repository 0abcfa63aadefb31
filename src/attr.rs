//! Primitive attributes: output scales, rounding and fused post-ops.

/// Rounding applied when the scaled result is stored to an integer
/// destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum RoundMode {
    /// Round half to even.
    #[default]
    Nearest,
    /// Round toward negative infinity.
    Down,
}

/// Per-tensor or per-output-channel scale applied after bias addition.
#[derive(Debug, Clone, PartialEq)]
pub enum OutputScales {
    Common(f32),
    /// One scale per output channel (all groups, in logical order).
    PerOc(Vec<f32>),
}

impl Default for OutputScales {
    fn default() -> Self {
        OutputScales::Common(1.0)
    }
}

impl OutputScales {
    /// True when the scales leave the accumulator unchanged.
    pub fn is_identity(&self) -> bool {
        match self {
            OutputScales::Common(s) => *s == 1.0,
            OutputScales::PerOc(v) => v.iter().all(|&s| s == 1.0),
        }
    }

    /// Mask in the usual convention: 0 for a common scale, `1 << 1` for
    /// per-output-channel scales.
    pub fn mask(&self) -> u32 {
        match self {
            OutputScales::Common(_) => 0,
            OutputScales::PerOc(_) => 1 << 1,
        }
    }
}

/// A fused operation applied to the scaled accumulator.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PostOp {
    /// `x < 0 ? x * negative_slope : x`. A zero slope is a plain clamp at 0.
    Relu { negative_slope: f32 },
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct PrimitiveAttr {
    pub output_scales: OutputScales,
    pub round_mode: RoundMode,
    pub post_ops: Vec<PostOp>,
}

impl PrimitiveAttr {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a relu post-op.
    pub fn with_relu(mut self, negative_slope: f32) -> Self {
        self.post_ops.push(PostOp::Relu { negative_slope });
        self
    }

    pub fn with_output_scales(mut self, scales: OutputScales) -> Self {
        self.output_scales = scales;
        self
    }

    pub fn with_round_mode(mut self, round_mode: RoundMode) -> Self {
        self.round_mode = round_mode;
        self
    }

    /// Negative slope of the first relu post-op, if any.
    pub fn relu_slope(&self) -> Option<f32> {
        self.post_ops.iter().find_map(|op| match op {
            PostOp::Relu { negative_slope } => Some(*negative_slope),
        })
    }
}
