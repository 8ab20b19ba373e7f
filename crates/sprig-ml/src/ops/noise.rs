use anyhow::Result;
use candle_core::{DType, Device, Shape, Tensor};
use rand::{Rng, SeedableRng, distr::Open01, rngs::StdRng};
use sprig_tensor::fdtype;
use tracing::{instrument, trace};

/// Euler-Mascheroni constant, the mean of a standard Gumbel variable.
pub const EULER_MASCHERONI: f64 = 0.577_215_664_901_532_9;

/// Parameters of a Gumbel draw.
#[derive(Clone, Debug)]
pub struct GumbelConfig {
    /// Location.
    pub mu: f64,
    /// Scale. Not validated: a negative scale mirrors the distribution.
    pub beta: f64,
    /// Output dtype.
    pub dtype: DType,
    /// Fixed seed for repeatable draws. `None` draws from the thread rng.
    pub seed: Option<u64>,
    /// Label recorded on the tracing span.
    pub name: Option<String>,
}

impl Default for GumbelConfig {
    fn default() -> Self {
        Self {
            mu: 0.0,
            beta: 1.0,
            dtype: fdtype(),
            seed: None,
            name: None,
        }
    }
}

impl GumbelConfig {
    pub fn seeded(seed: u64) -> Self {
        Self {
            seed: Some(seed),
            ..Self::default()
        }
    }
}

/// Samples `mu + beta * (-ln(-ln u))` with `u ~ Uniform(0, 1)`.
///
/// Uniforms come from the open interval so the transform never produces infinities.
/// The transform runs on the host in f64 and the result is cast to `config.dtype`
/// before it is moved to `device`.
#[instrument(
    level = "debug",
    fields(name = ?config.name, seed = ?config.seed, mu = config.mu, beta = config.beta),
    skip(shape, config, device)
)]
pub fn random_gumbel<S: Into<Shape>>(
    shape: S,
    config: &GumbelConfig,
    device: &Device,
) -> Result<Tensor> {
    let shape = shape.into();
    let n = shape.elem_count();
    let uniforms = match config.seed {
        Some(seed) => sample_open01(&mut StdRng::seed_from_u64(seed), n),
        None => sample_open01(&mut rand::rng(), n),
    };
    trace!(n, "drew uniforms");

    let gumbel = uniforms
        .into_iter()
        .map(|u| config.mu + config.beta * -(-u.ln()).ln())
        .collect::<Vec<f64>>();
    let gumbel = Tensor::from_vec(gumbel, shape, &Device::Cpu)?
        .to_dtype(config.dtype)?
        .to_device(device)?;
    Ok(gumbel)
}

fn sample_open01<R: Rng + ?Sized>(rng: &mut R, n: usize) -> Vec<f64> {
    (0..n).map(|_| rng.sample(Open01)).collect()
}
