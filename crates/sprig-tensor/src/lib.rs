//! Shared numeric configuration for the sprig crates.
//!
//! The floating-point precision every op allocates in is fixed at compile time
//! by one of the `dtype-*` features, and the compute device by `candle-cuda` /
//! `candle-metal`.

use anyhow::Result;
use candle_core::{DType, Device};
use rayon::ThreadPoolBuilder;

/// Type alias for floating-point dtype
pub type FDtype = DType;

/// Get the configured floating-point dtype based on compile-time features
#[inline]
pub const fn fdtype() -> FDtype {
    // Compile-time check: ensure at most one dtype feature is enabled
    const DTYPE_COUNT: usize = cfg!(feature = "dtype-f16") as usize
        + cfg!(feature = "dtype-bf16") as usize
        + cfg!(feature = "dtype-f32") as usize
        + cfg!(feature = "dtype-f64") as usize;

    const _: () = assert!(
        DTYPE_COUNT <= 1,
        "Multiple dtype features enabled. Enable only one: dtype-f16, dtype-bf16, dtype-f32, or dtype-f64"
    );

    #[cfg(feature = "dtype-f16")]
    return FDtype::F16;

    #[cfg(feature = "dtype-bf16")]
    return FDtype::BF16;

    #[cfg(feature = "dtype-f64")]
    return FDtype::F64;

    // Default to F32 if no dtype feature is specified
    #[cfg(not(any(feature = "dtype-f16", feature = "dtype-bf16", feature = "dtype-f64")))]
    FDtype::F32
}

/// Device selected by the `candle-cuda` / `candle-metal` features, CPU otherwise.
pub fn device() -> Result<Device> {
    if cfg!(feature = "candle-cuda") {
        Ok(Device::new_cuda(0)?)
    } else if cfg!(feature = "candle-metal") {
        Ok(Device::new_metal(0)?)
    } else {
        Ok(Device::Cpu)
    }
}

/// Configure the global rayon threadpool based on environment or CPU count.
///
/// Reads `RAYON_NUM_THREADS` environment variable, falling back to `num_cpus::get()`.
pub fn set_global_threadpool() -> Result<()> {
    const ENV_VAR_NAME: &str = "RAYON_NUM_THREADS";
    ThreadPoolBuilder::new()
        .num_threads(
            std::env::var(ENV_VAR_NAME)
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(num_cpus::get()),
        )
        .build_global()?;
    Ok(())
}
