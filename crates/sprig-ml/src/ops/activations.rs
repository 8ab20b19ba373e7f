use anyhow::Result;
use candle_core::Tensor;
use candle_nn::ops::sigmoid;
use tracing::instrument;

/// Leak used by [`lrelu`] when the caller has no preference.
pub const DEFAULT_LEAK: f64 = 1e-2;

/// Leaky relu: elementwise `max(x, leak * x)`.
///
/// `leak` is not validated. A leak above 1 turns this into a min for positive inputs.
#[instrument(level = "trace", fields(shape = ?x.shape(), leak = leak), skip(x))]
pub fn lrelu(x: &Tensor, leak: f64) -> Result<Tensor> {
    let leaked = (x * leak)?;
    Ok(x.maximum(&leaked)?)
}

/// Swish: `x * sigmoid(x)`.
#[instrument(level = "trace", fields(shape = ?x.shape()), skip(x))]
pub fn swish(x: &Tensor) -> Result<Tensor> {
    Ok(sigmoid(x)?.mul(x)?)
}
