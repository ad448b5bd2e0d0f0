use ndarray::{Array2, ArrayView2};
use rand::Rng;

use super::{Activation, Conv2d, Dense};
use crate::{Result, arch::activations::ActFn, arch::differentiable::Differentiable};

#[derive(Clone, Debug)]
pub enum Layer {
    Dense(Dense),
    Conv(Conv2d),
    Activation(Activation),
}
use Layer::*;

impl Layer {
    pub fn dense(dim: (usize, usize), act_fn: Option<ActFn>) -> Self {
        Self::Dense(Dense::new(dim, act_fn))
    }

    pub fn conv(
        input: (usize, usize, usize),
        kernel: (usize, usize),
        filters: usize,
        stride: (usize, usize),
        act_fn: Option<ActFn>,
    ) -> Self {
        Self::Conv(Conv2d::new(input, kernel, filters, stride, act_fn))
    }

    pub fn activation(act_fn: ActFn) -> Self {
        Self::Activation(Activation::new(act_fn))
    }

    /// Generates this layer's initial parameters.
    pub fn init_params<R: Rng>(&self, rng: &mut R) -> Result<Vec<f32>> {
        match self {
            Dense(l) => l.init_params(rng),
            Conv(l) => l.init_params(rng),
            Activation(_) => Ok(Vec::new()),
        }
    }
}

impl Differentiable for Layer {
    fn size(&self) -> usize {
        match self {
            Dense(l) => l.size(),
            Conv(l) => l.size(),
            Activation(_) => 0,
        }
    }

    fn forward(&mut self, params: &[f32], x: ArrayView2<f32>) -> Result<Array2<f32>> {
        match self {
            Dense(l) => l.forward(params, x),
            Conv(l) => l.forward(params, x),
            Activation(l) => Ok(l.forward(x)),
        }
    }

    fn backward(
        &mut self,
        params: &[f32],
        grad: &mut [f32],
        d: Array2<f32>,
    ) -> Result<Array2<f32>> {
        match self {
            Dense(l) => l.backward(params, grad, d),
            Conv(l) => l.backward(params, grad, d),
            Activation(l) => l.backward(d),
        }
    }
}
