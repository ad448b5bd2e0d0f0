use ndarray::{Array2, ArrayView2};

use crate::Result;

/// A parameterized, batched map from an input matrix to an output matrix that can propagate
/// deltas back to its input.
///
/// Implementors do not own their parameters: every call receives the flat slice holding them,
/// which lets a model keep all of its parameters (and gradients) in a single buffer.
pub trait Differentiable {
    /// Returns the amount of parameters.
    fn size(&self) -> usize;

    /// Computes the output for a batch of inputs, one sample per row.
    ///
    /// # Arguments
    /// * `params` - This function's parameters, exactly `size()` of them.
    /// * `x` - The input batch.
    fn forward(&mut self, params: &[f32], x: ArrayView2<f32>) -> Result<Array2<f32>>;

    /// Propagates the delta of the last `forward` output back to its input.
    ///
    /// # Arguments
    /// * `params` - The same parameters given to `forward`.
    /// * `grad` - The gradient buffer, the gradient of each parameter is **added** to it.
    /// * `d` - The delta of the loss with respect to the output.
    ///
    /// # Returns
    /// The delta of the loss with respect to the input.
    fn backward(&mut self, params: &[f32], grad: &mut [f32], d: Array2<f32>) -> Result<Array2<f32>>;
}
