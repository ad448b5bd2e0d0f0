use ndarray::{Array2, ArrayView2, Axis};

use super::{LossFn, loss_fn::check_dims};
use crate::{MlErr, Result};

/// Categorical cross entropy taken on raw scores, with a softmax over each row, averaged over
/// the rows of the batch.
#[derive(Clone, Copy, Debug, Default)]
pub struct SoftmaxCrossEntropy;

impl SoftmaxCrossEntropy {
    pub fn new() -> Self {
        Self
    }
}

fn log_softmax(y_pred: ArrayView2<f32>) -> Array2<f32> {
    let mut out = y_pred.to_owned();

    for mut row in out.rows_mut() {
        let max = row.fold(f32::NEG_INFINITY, |m, &z| m.max(z));
        let log_sum = row.fold(0f32, |acc, &z| acc + (z - max).exp()).ln();
        row.mapv_inplace(|z| z - max - log_sum);
    }

    out
}

impl LossFn for SoftmaxCrossEntropy {
    fn loss(&self, y_pred: ArrayView2<f32>, y: ArrayView2<f32>) -> Result<f32> {
        check_dims(&y_pred, &y)?;
        if y_pred.is_empty() {
            return Err(MlErr::InvalidInput("empty batch"));
        }

        let total = -(log_softmax(y_pred) * &y).sum();
        Ok(total / y_pred.nrows() as f32)
    }

    fn loss_prime(&self, y_pred: ArrayView2<f32>, y: ArrayView2<f32>) -> Result<Array2<f32>> {
        check_dims(&y_pred, &y)?;
        if y_pred.is_empty() {
            return Err(MlErr::InvalidInput("empty batch"));
        }

        let n = y_pred.len_of(Axis(0)) as f32;
        let mut d = log_softmax(y_pred).mapv(f32::exp);
        d -= &y;
        d /= n;
        Ok(d)
    }
}
