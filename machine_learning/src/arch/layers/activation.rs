use ndarray::{Array2, ArrayView2};

use crate::{Result, arch::activations::ActFn, error::check_size};

/// A parameterless layer that applies an activation function element-wise.
#[derive(Clone, Debug)]
pub struct Activation {
    act_fn: ActFn,
    z: Array2<f32>,
}

impl Activation {
    pub fn new(act_fn: ActFn) -> Self {
        Self {
            act_fn,
            z: Array2::zeros((0, 0)),
        }
    }

    pub fn forward(&mut self, x: ArrayView2<f32>) -> Array2<f32> {
        self.z = x.to_owned();
        x.mapv(|z| self.act_fn.f(z))
    }

    pub fn backward(&mut self, mut d: Array2<f32>) -> Result<Array2<f32>> {
        check_size("activation delta rows", d.nrows(), self.z.nrows())?;
        check_size("activation delta columns", d.ncols(), self.z.ncols())?;

        d.zip_mut_with(&self.z, |d, &z| *d *= self.act_fn.df(z));
        Ok(d)
    }
}
