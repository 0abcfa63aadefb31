//! Execution driver: binds caller buffers, owns the workspace and the worker
//! pool, and runs the kernel over all work tiles.

use rayon::prelude::*;

use crate::conv1x1::bindings::{DstData, InputBindings, OutputBindings};
use crate::conv1x1::conf::KernelConf;
use crate::conv1x1::kernel::{select_kernel, CallParams, Conv1x1Kernel};
use crate::conv1x1::pd::Conv1x1Pd;
use crate::conv1x1::rtus::RtusPlan;
use crate::conv1x1::workspace::AlignedBuffer;
use crate::event::{Event, EventState};
use crate::memory::{BlockedWeights, WEIGHTS_BLOCK};
use crate::types::{ConvError, ConvResult};

/// One output tile: image `n`, group `g`, a run of output pixels and a run
/// of output-channel blocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Tile {
    n: usize,
    g: usize,
    p_start: usize,
    spatial: usize,
    /// First output block within the group.
    ocb_start: usize,
    oc_work: usize,
}

impl Tile {
    fn from_index(conf: &KernelConf, idx: usize) -> Self {
        let load_i = idx % conf.nb_load;
        let rest = idx / conf.nb_load;
        let bcast_i = rest % conf.nb_bcast;
        let rest = rest / conf.nb_bcast;
        let g = rest % conf.ngroups;
        let n = rest / conf.ngroups;

        let p_start = bcast_i * conf.bcast_block;
        let spatial = conf.bcast_block.min(conf.os - p_start);
        let ocb_start = load_i * conf.load_blocking;
        let ocb_end = (ocb_start + conf.load_blocking).min(conf.nb_oc);
        let oc_work = (ocb_end * WEIGHTS_BLOCK).min(conf.oc) - ocb_start * WEIGHTS_BLOCK;
        Tile { n, g, p_start, spatial, ocb_start, oc_work }
    }
}

/// An instantiated 1×1 convolution bound to caller buffers.
pub struct Conv1x1Primitive<'a> {
    conf: KernelConf,
    rtus: RtusPlan,
    geo: BlockedWeights,
    kernel: Box<dyn Conv1x1Kernel>,
    pool: rayon::ThreadPool,
    acc: AlignedBuffer<i32>,
    scratch: AlignedBuffer<u8>,
    inputs: InputBindings<'a>,
    outputs: OutputBindings<'a>,
}

impl<'a> Conv1x1Primitive<'a> {
    /// Bind buffers, build the worker pool and allocate the workspace.
    pub fn new(
        pd: &Conv1x1Pd,
        inputs: InputBindings<'a>,
        outputs: OutputBindings<'a>,
    ) -> ConvResult<Self> {
        let conf = pd.conf().clone();
        validate_bindings(pd, &inputs, &outputs)?;

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(conf.nthreads)
            .thread_name(|idx| format!("qconv-worker{idx}"))
            .build()?;

        let acc_elems = conf
            .acc_elems()
            .ok_or(ConvError::OutOfMemory { what: "accumulator", bytes: usize::MAX })?;
        let acc = AlignedBuffer::zeroed(acc_elems, "accumulator")?;
        let scratch_len = conf
            .nthreads
            .checked_mul(conf.ws_per_thread())
            .ok_or(ConvError::OutOfMemory { what: "rtus scratch", bytes: usize::MAX })?;
        let scratch = AlignedBuffer::zeroed(scratch_len, "rtus scratch")?;
        let kernel = select_kernel(&conf)?;

        log::debug!(
            "{}: instantiated, {} threads, {} work items, acc {} B, scratch {} B",
            kernel.name(),
            conf.nthreads,
            conf.work_amount(),
            acc.len() * std::mem::size_of::<i32>(),
            scratch.len()
        );

        Ok(Conv1x1Primitive {
            geo: BlockedWeights::new(conf.oc, conf.ic),
            conf,
            rtus: pd.rtus().clone(),
            kernel,
            pool,
            acc,
            scratch,
            inputs,
            outputs,
        })
    }

    pub fn name(&self) -> &'static str {
        self.kernel.name()
    }

    pub fn conf(&self) -> &KernelConf {
        &self.conf
    }

    pub fn outputs(&self) -> &OutputBindings<'a> {
        &self.outputs
    }

    /// Raw s32 dot products of the last `execute`, in dst (nhwc) order.
    pub fn accumulator(&self) -> &[i32] {
        self.acc.as_slice()
    }

    /// Compute the whole output. Blocks until every tile is done, then marks
    /// `event` ready.
    pub fn execute(&mut self, event: &mut Event) {
        event.set_state(EventState::Pending);
        let work = self.conf.work_amount();
        log::trace!("{}: execute, {work} work items", self.kernel.name());

        let acc_addr = self.acc.as_mut_ptr() as usize;
        let dst_addr = self.outputs.dst.as_mut_ptr() as usize;
        let scratch_addr = self.scratch.as_mut_ptr() as usize;

        let conf = &self.conf;
        let rtus = &self.rtus;
        let geo = self.geo;
        let kernel = self.kernel.as_ref();
        let inputs = self.inputs;
        let dst_elem = conf.dst_dt.size_of();
        let ws_per_thread = conf.ws_per_thread();

        self.pool.install(|| {
            (0..work).into_par_iter().for_each(|idx| {
                let t = Tile::from_index(conf, idx);

                let (src, src_pix_stride): (&[u8], usize) = if conf.reduce_src {
                    let tid = rayon::current_thread_index().unwrap_or(0);
                    // Each pool thread owns one scratch slot and runs its
                    // tiles sequentially.
                    let slot = unsafe {
                        std::slice::from_raw_parts_mut(
                            (scratch_addr as *mut u8).add(tid * ws_per_thread),
                            t.spatial * conf.ic,
                        )
                    };
                    rtus.gather(inputs.src, t.n, t.g, conf.ic, t.p_start, t.spatial, slot);
                    (&*slot, conf.ic)
                } else {
                    let off = (t.n * conf.os + t.p_start) * conf.ic_total + t.g * conf.ic;
                    (&inputs.src[off..], conf.ic_total)
                };

                let w_off = t.g * geo.group_stride() + t.ocb_start * geo.oc_block_stride();
                let w_end = (t.g + 1) * geo.group_stride();
                let oc_start = t.g * conf.oc + t.ocb_start * WEIGHTS_BLOCK;
                let out_off = (t.n * conf.os + t.p_start) * conf.oc_total + oc_start;

                let params = CallParams {
                    src,
                    src_pix_stride,
                    weights: &inputs.weights[w_off..w_end],
                    bias: inputs.bias,
                    oc_offset: oc_start,
                    acc: unsafe { (acc_addr as *mut i32).add(out_off) },
                    dst: unsafe { (dst_addr as *mut u8).add(out_off * dst_elem) },
                    out_pix_stride: conf.oc_total,
                    spatial: t.spatial,
                    oc_work: t.oc_work,
                };
                // Tiles cover disjoint (pixel, output channel) sets of acc/dst.
                unsafe { kernel.run(&params) };
            });
        });

        event.set_state(EventState::Ready);
    }
}

fn invalid<T>(msg: String) -> ConvResult<T> {
    Err(ConvError::InvalidArgument(msg))
}

fn validate_bindings(
    pd: &Conv1x1Pd,
    inputs: &InputBindings<'_>,
    outputs: &OutputBindings<'_>,
) -> ConvResult<()> {
    let src_need = pd.src_desc().nelems();
    if inputs.src.len() < src_need {
        return invalid(format!("src holds {} elements, needs {src_need}", inputs.src.len()));
    }
    let wei_need = pd.weights_desc().padded_nelems();
    if inputs.weights.len() < wei_need {
        return invalid(format!(
            "weights hold {} elements, blocked layout needs {wei_need}",
            inputs.weights.len()
        ));
    }

    match (pd.bias_desc(), &inputs.bias) {
        (None, None) => {}
        (Some(md), Some(bias)) => {
            if bias.data_type() != md.data_type {
                return invalid(format!(
                    "bias bound as {:?}, descriptor says {:?}",
                    bias.data_type(),
                    md.data_type
                ));
            }
            if bias.len() < md.nelems() {
                return invalid(format!("bias holds {} elements, needs {}", bias.len(), md.nelems()));
            }
        }
        (Some(_), None) => return invalid("descriptor has bias but none was bound".into()),
        (None, Some(_)) => return invalid("bias bound but descriptor has none".into()),
    }

    let dst_md = pd.dst_desc();
    let dst: &DstData<'_> = &outputs.dst;
    if dst.data_type() != dst_md.data_type {
        return invalid(format!(
            "dst bound as {:?}, descriptor says {:?}",
            dst.data_type(),
            dst_md.data_type
        ));
    }
    if dst.len() < dst_md.nelems() {
        return invalid(format!("dst holds {} elements, needs {}", dst.len(), dst_md.nelems()));
    }
    Ok(())
}
