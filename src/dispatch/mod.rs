//! Hardware profile and environment configuration.
//!
//! The profile is detected once per process. Two environment variables
//! adjust it:
//!
//! - `QCONV_NUM_THREADS`: default thread-count hint (positive integer).
//! - `QCONV_ISA`: `auto` (default), `scalar`, `avx512_core` or
//!   `avx512_core_vnni`; caps the ISA tier used for kernel specialization.

pub mod device_profile;

pub use device_profile::{detect_isa_level, DeviceProfile, IsaLevel};

use std::sync::OnceLock;

pub const ENV_NUM_THREADS: &str = "QCONV_NUM_THREADS";
pub const ENV_ISA: &str = "QCONV_ISA";

static PROFILE: OnceLock<DeviceProfile> = OnceLock::new();

/// Get the global device profile (detected once, cached for process lifetime).
pub fn device_profile() -> &'static DeviceProfile {
    PROFILE.get_or_init(|| {
        let isa_cap = std::env::var(ENV_ISA).ok().and_then(|v| parse_isa_cap(&v));
        let num_threads = std::env::var(ENV_NUM_THREADS)
            .ok()
            .and_then(|v| parse_num_threads(&v));
        let profile = DeviceProfile::detect_with(isa_cap, num_threads);
        log::debug!("qconv device profile: {profile}");
        profile
    })
}

/// Parse `QCONV_ISA`. Returns `None` for `auto` and for unrecognized values.
fn parse_isa_cap(value: &str) -> Option<IsaLevel> {
    if value.trim().eq_ignore_ascii_case("auto") {
        return None;
    }
    let cap = IsaLevel::parse(value);
    if cap.is_none() {
        log::warn!("ignoring unrecognized {ENV_ISA}={value:?}, using auto");
    }
    cap
}

/// Parse `QCONV_NUM_THREADS`. Zero and garbage are ignored.
fn parse_num_threads(value: &str) -> Option<usize> {
    match value.trim().parse::<usize>() {
        Ok(n) if n > 0 => Some(n),
        _ => {
            log::warn!("ignoring invalid {ENV_NUM_THREADS}={value:?}");
            None
        }
    }
}
