use ndarray::{Array2, ArrayView2};
use rand::Rng;

use super::{Differentiable, layers::Layer};
use crate::{Result, error::check_size};

/// A chain of layers reading consecutive slices of one flat parameter buffer.
#[derive(Clone, Debug, Default)]
pub struct Sequential {
    layers: Vec<Layer>,
}

impl Sequential {
    /// Creates a new `Sequential`.
    ///
    /// # Arguments
    /// * `layers` - The layers the sequential is composed of.
    ///
    /// # Returns
    /// A new `Sequential` instance.
    pub fn new<I>(layers: I) -> Self
    where
        I: IntoIterator<Item = Layer>,
    {
        Self {
            layers: layers.into_iter().collect(),
        }
    }

    /// Returns the layers of this model in forward order.
    pub fn layers(&self) -> &[Layer] {
        &self.layers
    }

    /// Generates the initial parameters of every layer, concatenated in forward order.
    pub fn init_params<R: Rng>(&self, rng: &mut R) -> Result<Vec<f32>> {
        let mut params = Vec::with_capacity(self.size());

        for layer in &self.layers {
            params.extend(layer.init_params(rng)?);
        }

        Ok(params)
    }
}

impl Differentiable for Sequential {
    fn size(&self) -> usize {
        self.layers.iter().map(|layer| layer.size()).sum()
    }

    fn forward(&mut self, params: &[f32], x: ArrayView2<f32>) -> Result<Array2<f32>> {
        check_size("sequential parameters", params.len(), self.size())?;

        let mut layers = self.layers.iter_mut();
        let Some(first) = layers.next() else {
            return Ok(x.to_owned());
        };

        let (head, mut rest) = params.split_at(first.size());
        let mut a = first.forward(head, x)?;

        for layer in layers {
            let (head, tail) = rest.split_at(layer.size());
            a = layer.forward(head, a.view())?;
            rest = tail;
        }

        Ok(a)
    }

    fn backward(
        &mut self,
        params: &[f32],
        grad: &mut [f32],
        mut d: Array2<f32>,
    ) -> Result<Array2<f32>> {
        check_size("sequential parameters", params.len(), self.size())?;
        check_size("sequential gradient", grad.len(), self.size())?;

        let mut end = params.len();

        for layer in self.layers.iter_mut().rev() {
            let start = end - layer.size();
            d = layer.backward(&params[start..end], &mut grad[start..end], d)?;
            end = start;
        }

        Ok(d)
    }
}
