//! Runtime cache-aware blocking for the 1×1 convolution.
//!
//! Detects L1D / L2 cache sizes via CPUID (x86) or sysfs (Linux), then picks
//! the tile sizes so that:
//!   - bcast_block * ic                ≤ L1D * 0.50  (source tile stays in L1)
//!   - load_blocking * nb_ic * 256     ≤ L2  * 0.50  (weight panel stays in L2)
//!
//! Sizes are detected once and cached in a static `OnceLock`.

use std::sync::OnceLock;

use crate::memory::WEIGHTS_BLOCK_BYTES;

const MAX_BCAST_BLOCK: usize = 512;
const MAX_LOAD_BLOCKING: usize = 8;

// ── Cache size detection ─────────────────────────────────────────────

/// (L1D bytes, L2 bytes)
fn detect_cache_sizes() -> (usize, usize) {
    #[cfg(target_arch = "x86_64")]
    {
        if let Some(sizes) = detect_x86_cache() {
            return sizes;
        }
    }
    #[cfg(target_os = "linux")]
    {
        if let Some(sizes) = detect_sysfs_cache() {
            return sizes;
        }
    }
    // Conservative fallback: 32 KB L1D, 512 KB L2
    (32 * 1024, 512 * 1024)
}

#[cfg(target_arch = "x86_64")]
fn detect_x86_cache() -> Option<(usize, usize)> {
    // CPUID leaf 4: deterministic cache parameters
    let mut l1d: Option<usize> = None;
    let mut l2: Option<usize> = None;

    for sub in 0..16u32 {
        // SAFETY: cpuid is available on every x86_64 CPU.
        let info = unsafe { std::arch::x86_64::__cpuid_count(4, sub) };
        let cache_type = info.eax & 0x1F;
        if cache_type == 0 {
            break;
        }
        let level = (info.eax >> 5) & 0x7;
        let line_size = (info.ebx & 0xFFF) as usize + 1;
        let partitions = ((info.ebx >> 12) & 0x3FF) as usize + 1;
        let ways = ((info.ebx >> 22) & 0x3FF) as usize + 1;
        let sets = info.ecx as usize + 1;
        let size = line_size * partitions * ways * sets;

        match (level, cache_type) {
            (1, 1) => l1d = Some(size),
            (2, 3) | (2, 2) => l2 = Some(size),
            _ => {}
        }
    }

    match (l1d, l2) {
        (Some(d), Some(u)) => Some((d, u)),
        _ => None,
    }
}

#[cfg(target_os = "linux")]
fn detect_sysfs_cache() -> Option<(usize, usize)> {
    let mut l1d: Option<usize> = None;
    let mut l2: Option<usize> = None;

    for idx in 0..8 {
        let base = format!("/sys/devices/system/cpu/cpu0/cache/index{idx}");
        let Ok(level) = std::fs::read_to_string(format!("{base}/level")) else {
            continue;
        };
        let Ok(ctype) = std::fs::read_to_string(format!("{base}/type")) else {
            continue;
        };
        let Ok(size_str) = std::fs::read_to_string(format!("{base}/size")) else {
            continue;
        };
        let Some(size) = parse_sysfs_size(&size_str) else {
            continue;
        };

        match (level.trim().parse::<u32>().ok()?, ctype.trim()) {
            (1, "Data") => l1d = Some(size),
            (2, "Unified") => l2 = Some(size),
            _ => {}
        }
    }

    match (l1d, l2) {
        (Some(d), Some(u)) => Some((d, u)),
        _ => None,
    }
}

#[cfg_attr(not(target_os = "linux"), allow(dead_code))]
fn parse_sysfs_size(s: &str) -> Option<usize> {
    let s = s.trim();
    if let Some(kb) = s.strip_suffix('K') {
        Some(kb.parse::<usize>().ok()? * 1024)
    } else if let Some(mb) = s.strip_suffix('M') {
        Some(mb.parse::<usize>().ok()? * 1024 * 1024)
    } else {
        s.parse::<usize>().ok()
    }
}

static CACHE_SIZES: OnceLock<(usize, usize)> = OnceLock::new();

fn cache_sizes() -> (usize, usize) {
    *CACHE_SIZES.get_or_init(detect_cache_sizes)
}

// ── Blocking parameter computation ───────────────────────────────────

/// Tile sizes of the 1×1 convolution driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConvBlocking {
    /// Output pixels per tile, a multiple of `ur` unless the whole spatial
    /// extent is smaller.
    pub bcast_block: usize,
    /// Output-channel blocks per tile.
    pub load_blocking: usize,
}

/// Blocking for the detected caches.
pub fn conv1x1_blocking(ic: usize, nb_ic: usize, nb_oc: usize, os: usize, ur: usize) -> ConvBlocking {
    let (l1d, l2) = cache_sizes();
    conv1x1_blocking_for(l1d, l2, ic, nb_ic, nb_oc, os, ur)
}

/// Blocking for explicit cache sizes.
pub fn conv1x1_blocking_for(
    l1d: usize,
    l2: usize,
    ic: usize,
    nb_ic: usize,
    nb_oc: usize,
    os: usize,
    ur: usize,
) -> ConvBlocking {
    let ur = ur.max(1);
    let bcast_raw = (l1d / 2) / ic.max(1);
    let bcast_block = (bcast_raw / ur * ur).clamp(ur, MAX_BCAST_BLOCK).min(os.max(1));

    let panel = nb_ic.max(1) * WEIGHTS_BLOCK_BYTES;
    let load_blocking = ((l2 / 2) / panel).clamp(1, MAX_LOAD_BLOCKING).min(nb_oc.max(1));

    ConvBlocking { bcast_block, load_blocking }
}
