use anyhow::Result;
use candle_core::{DType, Tensor, Var, backprop::GradStore};
use rayon::iter::{IntoParallelRefIterator, ParallelIterator};
use tracing::{debug, instrument};

/// L2 norm of all `grads` taken together, as if they were concatenated.
///
/// Squared sums are accumulated in f64 whatever the gradient dtype.
pub fn global_norm(grads: &[Tensor]) -> Result<f64> {
    let total_squared_sum: f64 = grads
        .par_iter()
        .map(|grad| -> Result<f64> {
            let sum_sq = grad
                .to_dtype(DType::F64)?
                .sqr()?
                .sum_all()?
                .to_scalar::<f64>()?;
            Ok(sum_sq)
        })
        .try_reduce(|| 0.0f64, |acc, x| Ok(acc + x))?;

    Ok(total_squared_sum.sqrt())
}

/// Gradients after [`clip_gradient`], with the norms before and after clipping.
#[derive(Debug, Clone)]
pub struct ClippedGradients<P> {
    pub pairs: Vec<(Tensor, P)>,
    pub raw_norm: f64,
    pub clipped_norm: f64,
}

fn clip_scale(norm: f64, max_norm: f64) -> f64 {
    if norm > max_norm { max_norm / norm } else { 1.0 }
}

/// Jointly rescales the gradients of `(gradient, parameter)` pairs so that their
/// global norm is at most `max_norm`.
///
/// Every gradient is multiplied by the same factor, so directions and relative
/// magnitudes are kept. Parameters pass through untouched and in order.
#[instrument(level = "debug", fields(num_pairs = pairs.len(), max_norm = max_norm), skip(pairs))]
pub fn clip_gradient<P: Clone>(
    pairs: &[(Tensor, P)],
    max_norm: f64,
) -> Result<ClippedGradients<P>> {
    let grads = pairs.iter().map(|(grad, _)| grad.clone()).collect::<Vec<_>>();
    let raw_norm = global_norm(&grads)?;
    let scale = clip_scale(raw_norm, max_norm);

    let pairs = pairs
        .iter()
        .map(|(grad, param)| -> Result<(Tensor, P)> {
            let grad = if scale < 1.0 {
                grad.affine(scale, 0.0)?
            } else {
                grad.clone()
            };
            Ok((grad, param.clone()))
        })
        .collect::<Result<Vec<_>>>()?;

    let clipped_norm = if scale < 1.0 {
        let grads = pairs.iter().map(|(grad, _)| grad.clone()).collect::<Vec<_>>();
        global_norm(&grads)?
    } else {
        raw_norm
    };
    debug!(raw_norm, clipped_norm, scale, "clipped gradients");

    Ok(ClippedGradients {
        pairs,
        raw_norm,
        clipped_norm,
    })
}

/// [`clip_gradient`] applied in place to a backward pass's gradient store.
///
/// Vars without a gradient are ignored. Returns `(raw_norm, clipped_norm)`.
#[instrument(level = "debug", fields(num_vars = vars.len(), max_norm = max_norm), skip(vars, grad_store))]
pub fn clip_grad_store(
    vars: &[Var],
    grad_store: &mut GradStore,
    max_norm: f64,
) -> Result<(f64, f64)> {
    let pairs = vars
        .iter()
        .filter_map(|var| grad_store.get(var).map(|grad| (grad.clone(), var.clone())))
        .collect::<Vec<_>>();

    let clipped = clip_gradient(&pairs, max_norm)?;
    for (grad, var) in clipped.pairs {
        grad_store.insert(&var, grad);
    }
    Ok((clipped.raw_norm, clipped.clipped_norm))
}
