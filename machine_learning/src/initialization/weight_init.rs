use rand::Rng;
use rand_distr::{Distribution, Normal as NormalDist, Uniform as UniformDist};

use crate::{MlErr, Result};

/// The distribution the initial weights of a layer are drawn from.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum WeightInit {
    /// Uniform over `[low, high)`.
    Uniform { low: f32, high: f32 },
    Normal { mean: f32, std_dev: f32 },
    /// Glorot uniform, suited for layers followed by a saturating activation.
    XavierUniform { fan_in: usize, fan_out: usize },
    /// He normal, suited for layers followed by a ReLU.
    Kaiming { fan_in: usize },
}
use WeightInit::*;

impl WeightInit {
    /// Draws `n` weights.
    ///
    /// # Errors
    /// `InvalidDistribution` if the distribution's parameters are invalid, e.g. `low > high` or
    /// a non finite standard deviation.
    pub fn sample<R: Rng + ?Sized>(self, rng: &mut R, n: usize) -> Result<Vec<f32>> {
        let invalid = |e: &dyn std::fmt::Display| MlErr::InvalidDistribution(e.to_string());

        match self {
            Uniform { low, high } => {
                let dist = UniformDist::new(low, high).map_err(|e| invalid(&e))?;
                Ok(draw(rng, dist, n))
            }
            XavierUniform { fan_in, fan_out } => {
                let range = (6. / (fan_in + fan_out) as f32).sqrt();
                let uniform = Uniform {
                    low: -range,
                    high: range,
                };
                uniform.sample(rng, n)
            }
            Normal { mean, std_dev } => {
                let dist = NormalDist::new(mean, std_dev).map_err(|e| invalid(&e))?;
                Ok(draw(rng, dist, n))
            }
            Kaiming { fan_in } => {
                let std_dev = (2. / fan_in as f32).sqrt();
                Normal { mean: 0., std_dev }.sample(rng, n)
            }
        }
    }

    /// Generates the parameters of a layer: `weights` drawn from this distribution followed by
    /// `biases` zeros.
    pub fn layer_params<R: Rng + ?Sized>(
        self,
        rng: &mut R,
        weights: usize,
        biases: usize,
    ) -> Result<Vec<f32>> {
        let mut params = self.sample(rng, weights)?;
        params.resize(weights + biases, 0.);
        Ok(params)
    }
}

fn draw<R: Rng + ?Sized, D: Distribution<f32>>(rng: &mut R, dist: D, n: usize) -> Vec<f32> {
    (0..n).map(|_| dist.sample(rng)).collect()
}
