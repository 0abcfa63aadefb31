//! Output stage shared by all kernel implementations:
//! accumulate → bias → scale → relu → round → saturating store.

use crate::attr::RoundMode;
use crate::conv1x1::bindings::BiasData;
use crate::conv1x1::conf::KernelConf;
use crate::types::DataType;

/// Destination element type. Conversions saturate instead of wrapping.
pub trait DstElem: Copy + Send + Sync + 'static {
    const DATA_TYPE: DataType;

    fn from_int(v: i64) -> Self;

    fn from_f32(v: f32, mode: RoundMode) -> Self;
}

#[inline(always)]
fn round(v: f32, mode: RoundMode) -> f32 {
    match mode {
        RoundMode::Nearest => v.round_ties_even(),
        RoundMode::Down => v.floor(),
    }
}

macro_rules! impl_int_dst {
    ($t:ty, $dt:expr) => {
        impl DstElem for $t {
            const DATA_TYPE: DataType = $dt;

            #[inline(always)]
            fn from_int(v: i64) -> Self {
                v.clamp(<$t>::MIN as i64, <$t>::MAX as i64) as $t
            }

            #[inline(always)]
            fn from_f32(v: f32, mode: RoundMode) -> Self {
                // `as` from float saturates at the type bounds and maps NaN to 0.
                round(v, mode) as $t
            }
        }
    };
}

impl_int_dst!(u8, DataType::U8);
impl_int_dst!(i8, DataType::S8);
impl_int_dst!(i32, DataType::S32);

impl DstElem for f32 {
    const DATA_TYPE: DataType = DataType::F32;

    #[inline(always)]
    fn from_int(v: i64) -> Self {
        v as f32
    }

    #[inline(always)]
    fn from_f32(v: f32, _mode: RoundMode) -> Self {
        v
    }
}

/// Convert one accumulator of global output channel `oc` to the destination
/// type. `RELU` must equal `conf.with_relu`.
#[inline(always)]
pub fn finalize<D: DstElem, const RELU: bool>(
    conf: &KernelConf,
    acc: i32,
    bias: Option<&BiasData<'_>>,
    oc: usize,
) -> D {
    if conf.integer_epilogue {
        let mut v = acc as i64;
        if let Some(b) = bias {
            v += b.get_i64(oc);
        }
        if RELU && v < 0 {
            v = 0;
        }
        return D::from_int(v);
    }

    let mut v = acc as f32;
    if let Some(b) = bias {
        v += b.get_f32(oc);
    }
    v *= conf.scale(oc);
    if RELU && v < 0.0 {
        v *= conf.relu_negative_slope;
    }
    D::from_f32(v, conf.round_mode)
}
