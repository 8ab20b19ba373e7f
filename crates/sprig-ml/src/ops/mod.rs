//! Tensor ops: activations, noise, divergences, gradient clipping and the
//! widget combinators used to wire layers together.

pub mod activations;
pub mod clip;
pub mod compose;
pub mod divergence;
pub mod noise;

pub use activations::*;
pub use clip::*;
pub use compose::*;
pub use divergence::*;
pub use noise::*;
