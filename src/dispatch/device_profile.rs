//! Hardware profile used to specialize the convolution kernel.
//!
//! Combines ISA detection with the thread-count hint and the process-wide
//! environment overrides into a single `DeviceProfile`.

use std::fmt;

/// ISA tier for kernel selection. Ordered from least to most capable so a cap
/// can be applied with `min`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum IsaLevel {
    /// Portable interpreted kernel.
    Scalar,
    /// AVX-512 F/BW/VL/DQ without VNNI.
    Avx512Core,
    /// AVX-512 core plus `vpdpbusd`.
    Avx512CoreVnni,
}

impl IsaLevel {
    /// Short name used in implementation strings.
    pub fn name(self) -> &'static str {
        match self {
            IsaLevel::Scalar => "any",
            IsaLevel::Avx512Core => "avx512_core",
            IsaLevel::Avx512CoreVnni => "avx512_core_vnni",
        }
    }

    /// Parse an ISA cap as accepted by `QCONV_ISA`. `auto` is handled by the
    /// caller.
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "scalar" | "any" | "ref" => Some(IsaLevel::Scalar),
            "avx512_core" => Some(IsaLevel::Avx512Core),
            "avx512_core_vnni" | "vnni" => Some(IsaLevel::Avx512CoreVnni),
            _ => None,
        }
    }
}

impl fmt::Display for IsaLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Runtime profile consumed by the configuration resolver.
#[derive(Debug, Clone)]
pub struct DeviceProfile {
    /// Best ISA tier that is both supported by the CPU and allowed by the
    /// environment cap.
    pub isa: IsaLevel,
    /// Default thread-count hint.
    pub max_threads: usize,
}

impl DeviceProfile {
    /// Detect the current hardware and apply the given overrides.
    pub fn detect_with(isa_cap: Option<IsaLevel>, num_threads: Option<usize>) -> Self {
        let detected = detect_isa_level();
        let isa = match isa_cap {
            Some(cap) => detected.min(cap),
            None => detected,
        };
        let max_threads = num_threads
            .filter(|&n| n > 0)
            .unwrap_or_else(|| rayon::current_num_threads().max(1));
        DeviceProfile { isa, max_threads }
    }

    /// Detect the current hardware without overrides.
    pub fn detect() -> Self {
        Self::detect_with(None, None)
    }
}

impl fmt::Display for DeviceProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} | {} threads", self.isa, self.max_threads)
    }
}

/// Detect the best ISA tier of the running CPU.
pub fn detect_isa_level() -> IsaLevel {
    #[cfg(target_arch = "x86_64")]
    {
        let core = is_x86_feature_detected!("avx512f")
            && is_x86_feature_detected!("avx512bw")
            && is_x86_feature_detected!("avx512vl")
            && is_x86_feature_detected!("avx512dq");
        if core && is_x86_feature_detected!("avx512vnni") {
            return IsaLevel::Avx512CoreVnni;
        }
        if core {
            return IsaLevel::Avx512Core;
        }
    }
    IsaLevel::Scalar
}
