//! Primitive descriptor: applicability checks, layout negotiation and
//! configuration derivation.

use std::fmt;

use crate::attr::PrimitiveAttr;
use crate::conv1x1::conf::{init_conf, KernelConf};
use crate::conv1x1::rtus::{rtus_prepare, RtusPlan};
use crate::conv_desc::ConvDesc;
use crate::dispatch::{detect_isa_level, device_profile, IsaLevel};
use crate::memory::{FormatTag, MemoryDesc};
use crate::types::{AlgKind, ConvError, ConvResult, DataType};

/// What to do with tensors whose format is `Any`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LayoutPolicy {
    /// Replace `Any` with the kernel's preferred layout.
    #[default]
    PreferKernel,
    /// Every tensor must carry a concrete layout.
    RequireExplicit,
}

/// Per-call overrides of the process-wide device profile.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CreateHints {
    pub num_threads: Option<usize>,
    /// ISA cap; never raises the tier above what the CPU supports.
    pub isa: Option<IsaLevel>,
    /// Engage stride elimination even for unit-stride descriptors.
    pub force_stride_elimination: bool,
}

impl CreateHints {
    pub fn with_num_threads(mut self, n: usize) -> Self {
        self.num_threads = Some(n);
        self
    }

    pub fn with_isa(mut self, isa: IsaLevel) -> Self {
        self.isa = Some(isa);
        self
    }

    pub fn with_forced_stride_elimination(mut self) -> Self {
        self.force_stride_elimination = true;
        self
    }
}

/// Resolved, immutable description of one 1×1 convolution primitive.
#[derive(Debug, Clone)]
pub struct Conv1x1Pd {
    desc: ConvDesc,
    attr: PrimitiveAttr,
    rtus: RtusPlan,
    conf: KernelConf,
}

impl Conv1x1Pd {
    /// Validate `desc` and `attr` and derive the kernel configuration.
    pub fn create(
        desc: &ConvDesc,
        attr: &PrimitiveAttr,
        policy: LayoutPolicy,
        hints: &CreateHints,
    ) -> ConvResult<Self> {
        let result = Self::try_create(desc, attr, policy, hints);
        match &result {
            Ok(pd) => log::debug!("{}: created {} conf={:?}", pd.name(), pd.desc, pd.conf),
            Err(e) => log::debug!("conv1x1 create rejected: {e}"),
        }
        result
    }

    fn try_create(
        desc: &ConvDesc,
        attr: &PrimitiveAttr,
        policy: LayoutPolicy,
        hints: &CreateHints,
    ) -> ConvResult<Self> {
        desc.check_shapes()?;

        let mut desc = desc.clone();
        set_default_params(&mut desc, policy)?;
        predicate(&desc)?;

        let rtus = rtus_prepare(&desc, hints.force_stride_elimination);

        let profile = device_profile();
        let nthreads = hints.num_threads.filter(|&n| n > 0).unwrap_or(profile.max_threads);
        let isa = match hints.isa {
            Some(cap) => cap.min(detect_isa_level()),
            None => profile.isa,
        };
        let conf = init_conf(&rtus.conv_d, attr, nthreads, isa, rtus.reduce_src)?;

        Ok(Conv1x1Pd { desc, attr: attr.clone(), rtus, conf })
    }

    /// Implementation name.
    pub fn name(&self) -> &'static str {
        if self.conf.isa >= IsaLevel::Avx512CoreVnni {
            "jit_1x1:avx512_core_vnni"
        } else {
            "ref_1x1:any"
        }
    }

    pub fn desc(&self) -> &ConvDesc {
        &self.desc
    }

    pub fn attr(&self) -> &PrimitiveAttr {
        &self.attr
    }

    pub fn conf(&self) -> &KernelConf {
        &self.conf
    }

    pub fn rtus(&self) -> &RtusPlan {
        &self.rtus
    }

    pub fn src_desc(&self) -> &MemoryDesc {
        &self.desc.src_desc
    }

    pub fn weights_desc(&self) -> &MemoryDesc {
        &self.desc.weights_desc
    }

    pub fn bias_desc(&self) -> Option<&MemoryDesc> {
        self.desc.bias_desc.as_ref()
    }

    pub fn dst_desc(&self) -> &MemoryDesc {
        &self.desc.dst_desc
    }
}

impl fmt::Display for Conv1x1Pd {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.name(), self.desc)
    }
}

/// Assign the preferred layout to every `Any` tensor.
fn set_default_params(desc: &mut ConvDesc, policy: LayoutPolicy) -> ConvResult<()> {
    let wei_tag = if desc.with_groups() {
        FormatTag::GOIhw4i16o4i
    } else {
        FormatTag::OIhw4i16o4i
    };
    let mut tensors: Vec<(&str, &mut MemoryDesc, FormatTag)> = vec![
        ("src", &mut desc.src_desc, FormatTag::Nhwc),
        ("weights", &mut desc.weights_desc, wei_tag),
        ("dst", &mut desc.dst_desc, FormatTag::Nhwc),
    ];
    if let Some(bias) = desc.bias_desc.as_mut() {
        tensors.push(("bias", bias, FormatTag::X));
    }

    for (name, md, tag) in tensors {
        if !md.is_any() {
            continue;
        }
        if policy == LayoutPolicy::RequireExplicit {
            return Err(ConvError::InvalidArgument(format!(
                "{name} format is `any` but an explicit layout is required"
            )));
        }
        md.set_format(tag)?;
    }
    Ok(())
}

fn predicate(desc: &ConvDesc) -> ConvResult<()> {
    let unimplemented = |reason: String| Err(ConvError::Unimplemented(reason));

    if !desc.prop_kind.is_forward() {
        return unimplemented(format!("prop kind {:?}", desc.prop_kind));
    }
    if desc.alg_kind != AlgKind::ConvolutionDirect {
        return unimplemented(format!("algorithm {:?}", desc.alg_kind));
    }
    if desc.src_desc.data_type != DataType::U8 {
        return unimplemented(format!("src data type {:?}", desc.src_desc.data_type));
    }
    if desc.weights_desc.data_type != DataType::S8 {
        return unimplemented(format!("weights data type {:?}", desc.weights_desc.data_type));
    }
    if !matches!(
        desc.dst_desc.data_type,
        DataType::U8 | DataType::S8 | DataType::S32 | DataType::F32
    ) {
        return unimplemented(format!("dst data type {:?}", desc.dst_desc.data_type));
    }
    if let Some(bias) = &desc.bias_desc {
        if !matches!(
            bias.data_type,
            DataType::F32 | DataType::S32 | DataType::S8 | DataType::U8
        ) {
            return unimplemented(format!("bias data type {:?}", bias.data_type));
        }
    }
    if desc.accum_data_type != DataType::S32 {
        return unimplemented(format!("accumulation data type {:?}", desc.accum_data_type));
    }
    Ok(())
}
