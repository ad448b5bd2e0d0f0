use ndarray::{Array2, ArrayView2};

use crate::Result;

/// A loss function over a batch of predictions, one sample per row.
pub trait LossFn {
    /// Computes the loss of `y_pred` with respect to the expected `y`.
    fn loss(&self, y_pred: ArrayView2<f32>, y: ArrayView2<f32>) -> Result<f32>;

    /// Computes the delta of the loss with respect to every element of `y_pred`.
    fn loss_prime(&self, y_pred: ArrayView2<f32>, y: ArrayView2<f32>) -> Result<Array2<f32>>;
}

pub(super) fn check_dims(y_pred: &ArrayView2<f32>, y: &ArrayView2<f32>) -> Result<()> {
    crate::error::check_size("loss rows", y.nrows(), y_pred.nrows())?;
    crate::error::check_size("loss columns", y.ncols(), y_pred.ncols())
}
