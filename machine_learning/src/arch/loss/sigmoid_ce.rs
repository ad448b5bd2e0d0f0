use ndarray::{Array2, ArrayView2, Zip};

use super::{LossFn, loss_fn::check_dims};
use crate::{MlErr, Result, arch::activations::Sigmoid};

/// Binary cross entropy taken on raw scores (logits), averaged over every element.
///
/// The sigmoid is folded into the loss so it stays finite for scores of any magnitude.
#[derive(Clone, Copy, Debug, Default)]
pub struct SigmoidCrossEntropy;

impl SigmoidCrossEntropy {
    pub fn new() -> Self {
        Self
    }
}

impl LossFn for SigmoidCrossEntropy {
    fn loss(&self, y_pred: ArrayView2<f32>, y: ArrayView2<f32>) -> Result<f32> {
        check_dims(&y_pred, &y)?;
        if y_pred.is_empty() {
            return Err(MlErr::InvalidInput("empty batch"));
        }

        // max(z, 0) - z * y + ln(1 + e^-|z|)
        let total = Zip::from(&y_pred)
            .and(&y)
            .fold(0f32, |acc, &z, &y| {
                acc + z.max(0.) - z * y + (-z.abs()).exp().ln_1p()
            });

        Ok(total / y_pred.len() as f32)
    }

    fn loss_prime(&self, y_pred: ArrayView2<f32>, y: ArrayView2<f32>) -> Result<Array2<f32>> {
        check_dims(&y_pred, &y)?;
        if y_pred.is_empty() {
            return Err(MlErr::InvalidInput("empty batch"));
        }

        let n = y_pred.len() as f32;
        let sigmoid = Sigmoid::default();
        Ok(Zip::from(&y_pred)
            .and(&y)
            .map_collect(|&z, &y| (sigmoid.f(z) - y) / n))
    }
}

#[cfg(test)]
mod tests {
    use ndarray::array;

    use super::*;

    #[test]
    fn zero_scores_cost_ln_2() {
        let loss = SigmoidCrossEntropy
            .loss(array![[0.], [0.]].view(), array![[1.], [0.]].view())
            .unwrap();
        assert!((loss - std::f32::consts::LN_2).abs() < 1e-6);
    }

    #[test]
    fn large_scores_stay_finite() {
        let y_pred = array![[1000.], [-1000.]];
        let y = array![[0.], [1.]];

        let loss = SigmoidCrossEntropy.loss(y_pred.view(), y.view()).unwrap();
        assert!((loss - 1000.).abs() < 1e-3);

        let d = SigmoidCrossEntropy
            .loss_prime(y_pred.view(), y.view())
            .unwrap();
        assert_eq!(d, array![[0.5], [-0.5]]);
    }

    #[test]
    fn loss_prime_matches_finite_differences() {
        let y_pred = array![[0.3], [-1.2], [2.]];
        let y = array![[1.], [0.], [0.]];
        let d = SigmoidCrossEntropy
            .loss_prime(y_pred.view(), y.view())
            .unwrap();

        let h = 1e-2;
        for i in 0..3 {
            let mut up = y_pred.clone();
            up[[i, 0]] += h;
            let mut down = y_pred.clone();
            down[[i, 0]] -= h;

            let numeric = (SigmoidCrossEntropy.loss(up.view(), y.view()).unwrap()
                - SigmoidCrossEntropy.loss(down.view(), y.view()).unwrap())
                / (2. * h);
            assert!((d[[i, 0]] - numeric).abs() < 1e-3);
        }
    }

    #[test]
    fn mismatched_shapes_fail() {
        let res = SigmoidCrossEntropy.loss(array![[0.]].view(), array![[0.], [1.]].view());
        assert!(res.is_err());
    }
}
