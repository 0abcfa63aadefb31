//! Interpreted kernel: walks the blocked weights with plain scalar loops,
//! driven by the same `KernelConf` as the vector kernel.

use std::marker::PhantomData;

use crate::conv1x1::conf::KernelConf;
use crate::conv1x1::epilogue::{finalize, DstElem};
use crate::conv1x1::kernel::{CallParams, Conv1x1Kernel};
use crate::memory::BlockedWeights;

pub struct RefKernel<D, const RELU: bool> {
    conf: KernelConf,
    geo: BlockedWeights,
    _dst: PhantomData<D>,
}

impl<D: DstElem, const RELU: bool> RefKernel<D, RELU> {
    pub fn new(conf: KernelConf) -> Self {
        debug_assert_eq!(conf.with_relu, RELU);
        debug_assert_eq!(conf.dst_dt, D::DATA_TYPE);
        let geo = BlockedWeights::new(conf.oc, conf.ic);
        RefKernel { conf, geo, _dst: PhantomData }
    }
}

impl<D: DstElem, const RELU: bool> Conv1x1Kernel for RefKernel<D, RELU> {
    fn name(&self) -> &'static str {
        "ref_1x1:any"
    }

    fn conf(&self) -> &KernelConf {
        &self.conf
    }

    unsafe fn run(&self, p: &CallParams<'_>) {
        let ic = self.conf.ic;
        let dst = p.dst as *mut D;
        for pix in 0..p.spatial {
            let src_row = &p.src[pix * p.src_pix_stride..][..ic];
            for o in 0..p.oc_work {
                let mut acc = 0i32;
                for (i, &s) in src_row.iter().enumerate() {
                    let w = p.weights[self.geo.offset(o, i)];
                    acc = acc.wrapping_add(i32::from(s) * i32::from(w));
                }
                let off = pix * p.out_pix_stride + o;
                *p.acc.add(off) = acc;
                *dst.add(off) =
                    finalize::<D, RELU>(&self.conf, acc, p.bias.as_ref(), p.oc_offset + o);
            }
        }
    }
}
