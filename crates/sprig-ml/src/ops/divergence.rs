use anyhow::Result;
use candle_core::Tensor;
use tracing::{instrument, trace};

/// Added to every variance before it is divided by or logged.
pub const KL_EPSILON: f64 = 1e-4;

/// Mean or variance of the target distribution in [`kl_normal`].
///
/// Scalars are compared on the host, so `Moment::Tensor` never takes the
/// standard-normal shortcut even when it holds zeros and ones.
#[derive(Clone, Debug)]
pub enum Moment {
    Scalar(f64),
    Tensor(Tensor),
}

impl From<f64> for Moment {
    fn from(value: f64) -> Self {
        Moment::Scalar(value)
    }
}

impl From<Tensor> for Moment {
    fn from(value: Tensor) -> Self {
        Moment::Tensor(value)
    }
}

impl From<&Tensor> for Moment {
    fn from(value: &Tensor) -> Self {
        Moment::Tensor(value.clone())
    }
}

impl Moment {
    fn is_scalar(&self, expected: f64) -> bool {
        matches!(self, Moment::Scalar(v) if *v == expected)
    }

    fn plus(&self, rhs: f64) -> Result<Moment> {
        Ok(match self {
            Moment::Scalar(v) => Moment::Scalar(v + rhs),
            Moment::Tensor(t) => Moment::Tensor((t + rhs)?),
        })
    }

    /// `lhs - self`
    fn sub_from(&self, lhs: &Tensor) -> Result<Tensor> {
        Ok(match self {
            Moment::Scalar(v) => (lhs - *v)?,
            Moment::Tensor(t) => lhs.broadcast_sub(t)?,
        })
    }

    /// `lhs / self`
    fn divide(&self, lhs: &Tensor) -> Result<Tensor> {
        Ok(match self {
            Moment::Scalar(v) => (lhs / *v)?,
            Moment::Tensor(t) => lhs.broadcast_div(t)?,
        })
    }
}

/// KL(N(mu0, var0) || N(mu1, var1)) for diagonal Gaussians, summed over axis 1.
///
/// `var0` and `var1` hold the diagonals of the covariance matrices.
/// Returns one value per example (axis 0).
#[instrument(level = "debug", fields(mu0_shape = ?mu0.shape(), var0_shape = ?var0.shape()), skip_all)]
pub fn kl_normal(
    mu0: &Tensor,
    var0: &Tensor,
    mu1: impl Into<Moment>,
    var1: impl Into<Moment>,
) -> Result<Tensor> {
    let (mu1, var1) = (mu1.into(), var1.into());
    let var0 = (var0 + KL_EPSILON)?;
    let kl = if mu1.is_scalar(0.0) && var1.is_scalar(1.0) {
        trace!("standard normal target");
        (((&var0 + &mu0.sqr()?)? - 1.0)? - var0.log()?)?
    } else {
        let var1 = var1.plus(KL_EPSILON)?;
        let ratio = var1.divide(&var0)?;
        let mean_term = var1.divide(&mu1.sub_from(mu0)?.sqr()?)?;
        (((&ratio + &mean_term)? - 1.0)? - ratio.log()?)?
    };
    Ok((kl.sum(1)? * 0.5)?)
}

/// [`kl_normal`] against the standard normal.
pub fn kl_normal_standard(mu0: &Tensor, var0: &Tensor) -> Result<Tensor> {
    kl_normal(mu0, var0, 0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use candle_core::{DType, Device};

    use super::*;

    fn close(a: &[f64], b: &[f64], tol: f64) {
        assert_eq!(a.len(), b.len());
        for (x, y) in a.iter().zip(b.iter()) {
            assert!((x - y).abs() < tol, "{} vs {}", x, y);
        }
    }

    #[test]
    fn standard_normal_against_itself_is_zero() -> Result<()> {
        let dev = Device::Cpu;
        let mu0 = Tensor::zeros((3, 4), DType::F32, &dev)?;
        let var0 = Tensor::ones((3, 4), DType::F32, &dev)?;
        let kl = kl_normal_standard(&mu0, &var0)?;
        assert_eq!(kl.dims(), &[3]);
        for v in kl.to_vec1::<f32>()? {
            assert!(v.abs() < 1e-6, "{}", v);
        }
        Ok(())
    }

    #[test]
    fn shifted_mean_against_standard_normal() -> Result<()> {
        let dev = Device::Cpu;
        let mu0 = Tensor::new(&[[1.0f64, -2.0]], &dev)?;
        let var0 = Tensor::new(&[[1.0f64, 0.5]], &dev)?;
        let kl = kl_normal_standard(&mu0, &var0)?.to_vec1::<f64>()?;

        let term = |m: f64, v: f64| {
            let v = v + KL_EPSILON;
            v + m * m - 1.0 - v.ln()
        };
        let expected = 0.5 * (term(1.0, 1.0) + term(-2.0, 0.5));
        close(&kl, &[expected], 1e-9);
        Ok(())
    }

    #[test]
    fn general_form_with_tensor_moments() -> Result<()> {
        let dev = Device::Cpu;
        let mu0 = Tensor::new(&[[0.5f64, 1.0], [0.0, -1.0]], &dev)?;
        let var0 = Tensor::new(&[[2.0f64, 0.5], [1.0, 3.0]], &dev)?;
        let mu1 = Tensor::new(&[[1.0f64, 0.0], [0.5, -1.0]], &dev)?;
        let var1 = Tensor::new(&[[1.0f64, 2.0], [0.25, 3.0]], &dev)?;
        let kl = kl_normal(&mu0, &var0, &mu1, &var1)?.to_vec1::<f64>()?;

        let term = |m0: f64, v0: f64, m1: f64, v1: f64| {
            let (v0, v1) = (v0 + KL_EPSILON, v1 + KL_EPSILON);
            v0 / v1 + (m0 - m1).powi(2) / v1 - 1.0 - (v0 / v1).ln()
        };
        let expected = [
            0.5 * (term(0.5, 2.0, 1.0, 1.0) + term(1.0, 0.5, 0.0, 2.0)),
            0.5 * (term(0.0, 1.0, 0.5, 0.25) + term(-1.0, 3.0, -1.0, 3.0)),
        ];
        close(&kl, &expected, 1e-9);
        Ok(())
    }

    #[test]
    fn tensor_valued_standard_moments_take_general_branch() -> Result<()> {
        let dev = Device::Cpu;
        let mu0 = Tensor::zeros((1, 2), DType::F64, &dev)?;
        let var0 = Tensor::new(&[[0.5f64, 0.5]], &dev)?;
        let zeros = Tensor::zeros((1, 2), DType::F64, &dev)?;
        let ones = Tensor::ones((1, 2), DType::F64, &dev)?;

        let shortcut = kl_normal_standard(&mu0, &var0)?.to_vec1::<f64>()?;
        let general = kl_normal(&mu0, &var0, zeros, ones)?.to_vec1::<f64>()?;

        let v0 = 0.5 + KL_EPSILON;
        let ratio = v0 / (1.0 + KL_EPSILON);
        close(&shortcut, &[v0 - 1.0 - v0.ln()], 1e-12);
        close(&general, &[ratio - 1.0 - ratio.ln()], 1e-12);
        assert_ne!(shortcut, general);
        Ok(())
    }

    #[test]
    fn scalar_non_standard_target() -> Result<()> {
        let dev = Device::Cpu;
        let mu0 = Tensor::new(&[[2.0f64]], &dev)?;
        let var0 = Tensor::new(&[[4.0f64]], &dev)?;
        let kl = kl_normal(&mu0, &var0, 2.0, 4.0)?.to_vec1::<f64>()?;
        // Same distribution on both sides.
        close(&kl, &[0.0], 1e-12);
        Ok(())
    }
}
