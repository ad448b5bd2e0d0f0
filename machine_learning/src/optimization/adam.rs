use super::Optimizer;
use crate::{Result, error::check_size};

/// First and second moment estimates of a single parameter.
#[derive(Clone, Copy, Debug, Default)]
struct Moments {
    mean: f32,
    var: f32,
}

/// Adam with bias correction folded into the step size.
#[derive(Debug)]
pub struct Adam {
    step_size: f32,
    decay: (f32, f32),
    eps: f32,
    t: i32,
    moments: Vec<Moments>,
}

impl Adam {
    /// Creates a new `Adam` for `len` parameters.
    ///
    /// # Arguments
    /// * `len` - The amount of parameters it will update.
    /// * `step_size` - The learning rate.
    /// * `beta1` - Decay rate of the running gradient mean.
    /// * `beta2` - Decay rate of the running squared gradient.
    /// * `eps` - Added to the denominator.
    pub fn new(len: usize, step_size: f32, beta1: f32, beta2: f32, eps: f32) -> Self {
        Self {
            step_size,
            decay: (beta1, beta2),
            eps,
            t: 0,
            moments: vec![Moments::default(); len],
        }
    }

    /// Creates a new `Adam` with `beta1 = 0.9`, `beta2 = 0.999` and `eps = 1e-8`.
    pub fn with_defaults(len: usize, step_size: f32) -> Self {
        Self::new(len, step_size, 0.9, 0.999, 1e-8)
    }

    fn corrected_step(&self) -> f32 {
        let (b1, b2) = self.decay;
        let mean_fix = 1. - b1.powi(self.t);
        let var_fix = 1. - b2.powi(self.t);
        self.step_size * var_fix.sqrt() / mean_fix
    }
}

impl Optimizer for Adam {
    fn update_params(&mut self, params: &mut [f32], grad: &[f32]) -> Result<()> {
        check_size("optimizer gradient", grad.len(), params.len())?;
        check_size("optimizer state", self.moments.len(), params.len())?;

        self.t = self.t.saturating_add(1);
        let alpha = self.corrected_step();
        let (b1, b2) = self.decay;
        let eps = self.eps;

        for ((p, &g), m) in params.iter_mut().zip(grad).zip(&mut self.moments) {
            m.mean = b1 * m.mean + (1. - b1) * g;
            m.var = b2 * m.var + (1. - b2) * g * g;
            *p -= alpha * m.mean / (m.var.sqrt() + eps);
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_step_has_learning_rate_length() {
        let mut adam = Adam::with_defaults(2, 0.1);
        let mut params = [1., 1.];
        adam.update_params(&mut params, &[3., -0.01]).unwrap();

        assert!((params[0] - 0.9).abs() < 1e-4);
        assert!((params[1] - 1.1).abs() < 1e-3);
    }

    #[test]
    fn minimizes_a_quadratic() {
        let mut adam = Adam::with_defaults(1, 0.05);
        let mut params = [4.];

        for _ in 0..500 {
            let grad = [2. * (params[0] - 1.)];
            adam.update_params(&mut params, &grad).unwrap();
        }

        assert!((params[0] - 1.).abs() < 0.05);
    }

    #[test]
    fn wrong_length_fails() {
        let mut adam = Adam::with_defaults(3, 0.1);
        let mut params = [1., 1.];
        assert!(adam.update_params(&mut params, &[0., 0.]).is_err());
    }
}
