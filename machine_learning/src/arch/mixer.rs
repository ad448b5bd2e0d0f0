use std::ops::Range;

use ndarray::{Array2, ArrayView2};
use rand::Rng;

use super::{Differentiable, Sequential};
use crate::{Result, error::check_size};

/// A differentiable function of two inputs.
pub trait Mixer {
    /// Returns the amount of parameters.
    fn size(&self) -> usize;

    /// Combines two batches with the same amount of rows into a single one.
    fn mix(
        &mut self,
        params: &[f32],
        a: ArrayView2<f32>,
        b: ArrayView2<f32>,
    ) -> Result<Array2<f32>>;

    /// Propagates the delta of the last `mix` output back to both inputs, adding the gradient
    /// of every parameter to `grad`.
    ///
    /// # Returns
    /// The deltas of the first and second inputs.
    fn backward(
        &mut self,
        params: &[f32],
        grad: &mut [f32],
        d: Array2<f32>,
    ) -> Result<(Array2<f32>, Array2<f32>)>;
}

/// Mixes two inputs by transforming each through its own branch, adding the results and
/// feeding the sum through an output stage.
///
/// Parameters are laid out as `[in1 | in2 | out]`.
#[derive(Clone, Debug, Default)]
pub struct AddMixer<A = Sequential, B = Sequential, C = Sequential> {
    pub in1: A,
    pub in2: B,
    pub out: C,
}

impl<A, B, C> AddMixer<A, B, C>
where
    A: Differentiable,
    B: Differentiable,
    C: Differentiable,
{
    pub fn new(in1: A, in2: B, out: C) -> Self {
        Self { in1, in2, out }
    }

    /// Returns the parameter ranges of the first branch, the second branch and the output
    /// stage, relative to the mixer's own parameters.
    pub fn ranges(&self) -> [Range<usize>; 3] {
        let in1_end = self.in1.size();
        let in2_end = in1_end + self.in2.size();
        let out_end = in2_end + self.out.size();

        [0..in1_end, in1_end..in2_end, in2_end..out_end]
    }
}

impl AddMixer {
    /// Generates the initial parameters of the three stages, concatenated.
    pub fn init_params<R: Rng>(&self, rng: &mut R) -> Result<Vec<f32>> {
        let mut params = self.in1.init_params(rng)?;
        params.extend(self.in2.init_params(rng)?);
        params.extend(self.out.init_params(rng)?);
        Ok(params)
    }
}

impl<A, B, C> Mixer for AddMixer<A, B, C>
where
    A: Differentiable,
    B: Differentiable,
    C: Differentiable,
{
    fn size(&self) -> usize {
        self.in1.size() + self.in2.size() + self.out.size()
    }

    fn mix(
        &mut self,
        params: &[f32],
        a: ArrayView2<f32>,
        b: ArrayView2<f32>,
    ) -> Result<Array2<f32>> {
        check_size("mixer parameters", params.len(), self.size())?;
        check_size("mixer input rows", b.nrows(), a.nrows())?;

        let [r1, r2, r3] = self.ranges();

        let mut sum = self.in1.forward(&params[r1], a)?;
        let b = self.in2.forward(&params[r2], b)?;
        check_size("mixer branch outputs", b.ncols(), sum.ncols())?;
        sum += &b;

        self.out.forward(&params[r3], sum.view())
    }

    fn backward(
        &mut self,
        params: &[f32],
        grad: &mut [f32],
        d: Array2<f32>,
    ) -> Result<(Array2<f32>, Array2<f32>)> {
        check_size("mixer parameters", params.len(), self.size())?;
        check_size("mixer gradient", grad.len(), self.size())?;

        let [r1, r2, r3] = self.ranges();

        let d_sum = self
            .out
            .backward(&params[r3.clone()], &mut grad[r3], d)?;
        let da = self
            .in1
            .backward(&params[r1.clone()], &mut grad[r1], d_sum.clone())?;
        let db = self.in2.backward(&params[r2.clone()], &mut grad[r2], d_sum)?;

        Ok((da, db))
    }
}
