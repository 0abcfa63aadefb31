//! Shared fixtures: problem shapes, deterministic data and a naive
//! reference convolution.

#![allow(dead_code)]

use qconv_kernels::*;

#[derive(Debug, Clone, Copy)]
pub struct Problem {
    pub mb: usize,
    pub groups: usize,
    /// Total input channels.
    pub ic: usize,
    /// Total output channels.
    pub oc: usize,
    pub ih: usize,
    pub iw: usize,
    pub stride: [usize; 2],
    pub pad: [usize; 2],
}

impl Problem {
    pub fn new(mb: usize, ic: usize, oc: usize, hw: usize) -> Self {
        Problem { mb, groups: 1, ic, oc, ih: hw, iw: hw, stride: [1, 1], pad: [0, 0] }
    }

    pub fn groups(mut self, g: usize) -> Self {
        self.groups = g;
        self
    }

    pub fn stride(mut self, s: usize) -> Self {
        self.stride = [s, s];
        self
    }

    pub fn pad(mut self, p: usize) -> Self {
        self.pad = [p, p];
        self
    }

    pub fn oh(&self) -> usize {
        (self.ih + 2 * self.pad[0] - 1) / self.stride[0] + 1
    }

    pub fn ow(&self) -> usize {
        (self.iw + 2 * self.pad[1] - 1) / self.stride[1] + 1
    }

    pub fn src_len(&self) -> usize {
        self.mb * self.ih * self.iw * self.ic
    }

    pub fn dst_len(&self) -> usize {
        self.mb * self.oh() * self.ow() * self.oc
    }

    /// Plain `goihw` element count.
    pub fn weights_len(&self) -> usize {
        self.oc * (self.ic / self.groups)
    }

    pub fn desc(&self, dst: DataType, bias: Option<DataType>) -> ConvDesc {
        let weights = if self.groups == 1 {
            MemoryDesc::new([self.oc, self.ic, 1, 1], DataType::S8, FormatTag::Any)
        } else {
            let g = self.groups;
            MemoryDesc::new([g, self.oc / g, self.ic / g, 1, 1], DataType::S8, FormatTag::Any)
        };
        ConvDesc::forward(
            PropKind::ForwardInference,
            MemoryDesc::new([self.mb, self.ic, self.ih, self.iw], DataType::U8, FormatTag::Any),
            weights,
            bias.map(|dt| MemoryDesc::new([self.oc], dt, FormatTag::Any)),
            MemoryDesc::new([self.mb, self.oc, self.oh(), self.ow()], dst, FormatTag::Any),
            self.stride,
            self.pad,
            self.pad,
        )
    }

    /// Exact s32 dot products in nhwc order.
    pub fn reference_acc(&self, src: &[u8], plain_weights: &[i8]) -> Vec<i32> {
        let (oh, ow) = (self.oh(), self.ow());
        let icg = self.ic / self.groups;
        let ocg = self.oc / self.groups;
        let mut out = vec![0i32; self.dst_len()];
        for n in 0..self.mb {
            for y in 0..oh {
                for x in 0..ow {
                    let hy = (y * self.stride[0]) as isize - self.pad[0] as isize;
                    let wx = (x * self.stride[1]) as isize - self.pad[1] as isize;
                    let inside = hy >= 0
                        && wx >= 0
                        && (hy as usize) < self.ih
                        && (wx as usize) < self.iw;
                    for oc in 0..self.oc {
                        let g = oc / ocg;
                        let mut acc = 0i32;
                        if inside {
                            let pix = ((n * self.ih + hy as usize) * self.iw + wx as usize) * self.ic;
                            for i in 0..icg {
                                let s = i32::from(src[pix + g * icg + i]);
                                let w = i32::from(plain_weights[oc * icg + i]);
                                acc = acc.wrapping_add(s * w);
                            }
                        }
                        out[((n * oh + y) * ow + x) * self.oc + oc] = acc;
                    }
                }
            }
        }
        out
    }
}

pub fn pattern_u8(len: usize, seed: usize) -> Vec<u8> {
    (0..len).map(|i| ((i * 131 + seed * 7919) % 251) as u8).collect()
}

pub fn pattern_i8(len: usize, seed: usize) -> Vec<i8> {
    (0..len).map(|i| (((i * 97 + seed * 31) % 255) as i32 - 127) as i8).collect()
}

pub fn scalar_hints(threads: usize) -> CreateHints {
    CreateHints::default().with_num_threads(threads).with_isa(IsaLevel::Scalar)
}

/// Best ISA of the running CPU.
pub fn auto_hints(threads: usize) -> CreateHints {
    CreateHints::default().with_num_threads(threads)
}

pub fn create(desc: &ConvDesc, attr: &PrimitiveAttr, hints: &CreateHints) -> Conv1x1Pd {
    Conv1x1Pd::create(desc, attr, LayoutPolicy::PreferKernel, hints).unwrap()
}

/// Instantiate, execute once and drop.
pub fn run(
    pd: &Conv1x1Pd,
    src: &[u8],
    weights: &[i8],
    bias: Option<BiasData<'_>>,
    dst: DstData<'_>,
) {
    let mut prim = Conv1x1Primitive::new(
        pd,
        InputBindings { src, weights, bias },
        OutputBindings { dst },
    )
    .unwrap();
    let mut event = Event::new();
    prim.execute(&mut event);
    assert!(event.is_ready());
}

/// Run with an s32 destination and no post-ops.
pub fn run_s32(problem: &Problem, hints: &CreateHints, src: &[u8], plain: &[i8]) -> Vec<i32> {
    let pd = create(&problem.desc(DataType::S32, None), &PrimitiveAttr::new(), hints);
    let weights = pack_weights(plain, pd.weights_desc()).unwrap();
    let mut dst = vec![0i32; problem.dst_len()];
    run(&pd, src, &weights, None, DstData::S32(&mut dst));
    dst
}
