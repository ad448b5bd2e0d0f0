use ndarray::{Zip, linalg, prelude::*};
use rand::Rng;

use crate::{
    Result,
    arch::activations::ActFn,
    error::check_size,
    initialization::WeightInit,
};

/// Spatial bookkeeping of a convolution, kept apart from the layer so it can be shared by the
/// parallel per-sample kernels.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct Geometry {
    /// `(height, width, depth)` of each input sample.
    input: (usize, usize, usize),
    /// `(height, width)` of the kernel.
    kernel: (usize, usize),
    /// `(vertical, horizontal)` stride.
    stride: (usize, usize),
    /// `(height, width)` of the output feature maps.
    output: (usize, usize),
}

impl Geometry {
    fn positions(&self) -> usize {
        self.output.0 * self.output.1
    }

    fn patch(&self) -> usize {
        self.kernel.0 * self.kernel.1 * self.input.2
    }

    /// Unrolls every receptive field of one sample into a row of `cols`.
    fn im2col(&self, x: ArrayView1<f32>, mut cols: ArrayViewMut2<f32>) {
        let (_, w, depth) = self.input;
        let (kh, kw) = self.kernel;
        let (sy, sx) = self.stride;
        let (oh, ow) = self.output;

        for oy in 0..oh {
            for ox in 0..ow {
                let mut row = cols.row_mut(oy * ow + ox);

                for ky in 0..kh {
                    for kx in 0..kw {
                        let src = ((oy * sy + ky) * w + ox * sx + kx) * depth;
                        let dst = (ky * kw + kx) * depth;

                        for c in 0..depth {
                            row[dst + c] = x[src + c];
                        }
                    }
                }
            }
        }
    }

    /// Inverse of `im2col`: scatters and sums the receptive field deltas back into `dx`.
    fn col2im(&self, dcols: ArrayView2<f32>, mut dx: ArrayViewMut1<f32>) {
        let (_, w, depth) = self.input;
        let (kh, kw) = self.kernel;
        let (sy, sx) = self.stride;
        let (oh, ow) = self.output;

        for oy in 0..oh {
            for ox in 0..ow {
                let row = dcols.row(oy * ow + ox);

                for ky in 0..kh {
                    for kx in 0..kw {
                        let dst = ((oy * sy + ky) * w + ox * sx + kx) * depth;
                        let src = (ky * kw + kx) * depth;

                        for c in 0..depth {
                            dx[dst + c] += row[src + c];
                        }
                    }
                }
            }
        }
    }
}

/// A strided 2-D convolution without padding, followed by an optional activation function.
///
/// Samples are flattened in `(height, width, depth)` order, both on the input and the output
/// side, so convolutions can be stacked directly. Parameters are the `(patch, filters)` kernel
/// matrix followed by one bias per filter.
#[derive(Clone, Debug)]
pub struct Conv2d {
    geometry: Geometry,
    filters: usize,
    act_fn: Option<ActFn>,
    size: usize,

    // Forward metadata
    cols: Array2<f32>,
    z: Array2<f32>,
    batch: usize,
}

impl Conv2d {
    /// Creates a new `Conv2d` layer.
    ///
    /// # Arguments
    /// * `input` - The `(height, width, depth)` of each input sample.
    /// * `kernel` - The `(height, width)` of every filter.
    /// * `filters` - The amount of filters, that is, the output depth.
    /// * `stride` - The `(vertical, horizontal)` stride.
    /// * `act_fn` - An optional activation function applied to the output.
    ///
    /// # Panics
    /// If the kernel does not fit in the input or a stride is zero.
    pub fn new(
        input: (usize, usize, usize),
        kernel: (usize, usize),
        filters: usize,
        stride: (usize, usize),
        act_fn: Option<ActFn>,
    ) -> Self {
        assert!(stride.0 > 0 && stride.1 > 0, "stride must be positive");
        assert!(
            kernel.0 <= input.0 && kernel.1 <= input.1,
            "kernel {kernel:?} does not fit in input {input:?}"
        );

        let output = (
            (input.0 - kernel.0) / stride.0 + 1,
            (input.1 - kernel.1) / stride.1 + 1,
        );

        let geometry = Geometry {
            input,
            kernel,
            stride,
            output,
        };

        Self {
            size: (geometry.patch() + 1) * filters,
            geometry,
            filters,
            act_fn,
            cols: Array2::zeros((0, 0)),
            z: Array2::zeros((0, 0)),
            batch: 0,
        }
    }

    /// Returns the amount of parameters this layer has.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Returns the `(height, width, depth)` of the output feature maps.
    pub fn output_shape(&self) -> (usize, usize, usize) {
        let (oh, ow) = self.geometry.output;
        (oh, ow, self.filters)
    }

    /// Returns the flattened length of each input sample.
    pub fn in_len(&self) -> usize {
        let (h, w, depth) = self.geometry.input;
        h * w * depth
    }

    /// Returns the flattened length of each output sample.
    pub fn out_len(&self) -> usize {
        self.geometry.positions() * self.filters
    }

    /// Generates initial parameters: Kaiming normal kernels and zero biases.
    pub fn init_params<R: Rng>(&self, rng: &mut R) -> Result<Vec<f32>> {
        let patch = self.geometry.patch();
        WeightInit::Kaiming { fan_in: patch }.layer_params(rng, patch * self.filters, self.filters)
    }

    pub fn forward(&mut self, params: &[f32], x: ArrayView2<f32>) -> Result<Array2<f32>> {
        check_size("convolution input", x.ncols(), self.in_len())?;
        let (w, b) = self.view_params(params)?;

        let geometry = self.geometry;
        let batch = x.nrows();
        let positions = geometry.positions();

        let mut cols = Array3::zeros((batch, positions, geometry.patch()));
        Zip::from(x.rows())
            .and(cols.outer_iter_mut())
            .par_for_each(|x, cols| geometry.im2col(x, cols));

        let cols = cols.into_shape_with_order((batch * positions, geometry.patch()))?;

        let mut z = Array2::zeros((batch * positions, self.filters));
        linalg::general_mat_mul(1.0, &cols, &w, 0.0, &mut z);
        z += &b;

        let a = match &self.act_fn {
            Some(act_fn) => z.mapv(|z| act_fn.f(z)),
            None => z.clone(),
        };

        self.cols = cols;
        self.z = z;
        self.batch = batch;

        Ok(a.into_shape_with_order((batch, self.out_len()))?)
    }

    /// Accumulates this layer's gradient into `grad` and returns the delta of its input.
    pub fn backward(
        &mut self,
        params: &[f32],
        grad: &mut [f32],
        d: Array2<f32>,
    ) -> Result<Array2<f32>> {
        check_size("convolution delta rows", d.nrows(), self.batch)?;
        check_size("convolution delta columns", d.ncols(), self.out_len())?;

        let geometry = self.geometry;
        let positions = geometry.positions();

        let mut d = d
            .as_standard_layout()
            .into_owned()
            .into_shape_with_order((self.batch * positions, self.filters))?;

        if let Some(act_fn) = &self.act_fn {
            d.zip_mut_with(&self.z, |d, &z| *d *= act_fn.df(z));
        }

        let (mut dw, mut db) = self.view_grad(grad)?;
        linalg::general_mat_mul(1.0, &self.cols.t(), &d, 1.0, &mut dw);
        db += &d.sum_axis(Axis(0));

        let (w, _) = self.view_params(params)?;
        let mut dcols = Array2::zeros((d.nrows(), geometry.patch()));
        linalg::general_mat_mul(1.0, &d, &w.t(), 0.0, &mut dcols);
        let dcols = dcols.into_shape_with_order((self.batch, positions, geometry.patch()))?;

        let mut dx = Array2::zeros((self.batch, self.in_len()));
        Zip::from(dx.rows_mut())
            .and(dcols.outer_iter())
            .par_for_each(|dx, dcols| geometry.col2im(dcols, dx));

        Ok(dx)
    }

    fn view_grad<'a>(
        &self,
        grad: &'a mut [f32],
    ) -> Result<(ArrayViewMut2<'a, f32>, ArrayViewMut1<'a, f32>)> {
        check_size("convolution gradient", grad.len(), self.size)?;

        let w_size = self.size - self.filters;
        let (dw_raw, db_raw) = grad.split_at_mut(w_size);
        let dw = ArrayViewMut2::from_shape((self.geometry.patch(), self.filters), dw_raw)?;
        let db = ArrayViewMut1::from_shape(self.filters, db_raw)?;
        Ok((dw, db))
    }

    fn view_params<'a>(
        &self,
        params: &'a [f32],
    ) -> Result<(ArrayView2<'a, f32>, ArrayView1<'a, f32>)> {
        check_size("convolution parameters", params.len(), self.size)?;

        let w_size = self.size - self.filters;
        let w = ArrayView2::from_shape((self.geometry.patch(), self.filters), &params[..w_size])?;
        let b = ArrayView1::from_shape(self.filters, &params[w_size..])?;
        Ok((w, b))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{SeedableRng, rngs::StdRng};

    #[test]
    fn output_shape_follows_stride() {
        let conv = Conv2d::new((54, 54, 1), (3, 3), 8, (2, 2), None);
        assert_eq!(conv.output_shape(), (26, 26, 8));

        let conv = Conv2d::new((26, 26, 8), (3, 3), 16, (2, 2), None);
        assert_eq!(conv.output_shape(), (12, 12, 16));

        let conv = Conv2d::new((12, 12, 16), (3, 3), 32, (2, 2), None);
        assert_eq!(conv.output_shape(), (5, 5, 32));
    }

    #[test]
    fn single_filter_sums_receptive_fields() {
        // 3x3 input, 2x2 kernel of ones, stride 1, bias 0.5.
        let mut conv = Conv2d::new((3, 3, 1), (2, 2), 1, (1, 1), None);
        let params = [1., 1., 1., 1., 0.5];
        let x = array![[1., 2., 3., 4., 5., 6., 7., 8., 9.]];

        let y = conv.forward(&params, x.view()).unwrap();
        assert_eq!(y, array![[12.5, 16.5, 24.5, 28.5]]);
    }

    #[test]
    fn stride_skips_positions() {
        let mut conv = Conv2d::new((3, 3, 1), (1, 1), 1, (2, 2), None);
        let params = [1., 0.];
        let x = array![[1., 2., 3., 4., 5., 6., 7., 8., 9.]];

        let y = conv.forward(&params, x.view()).unwrap();
        assert_eq!(y, array![[1., 3., 7., 9.]]);
    }

    #[test]
    fn backward_matches_finite_differences() {
        let mut rng = StdRng::seed_from_u64(3);
        let mut conv = Conv2d::new((5, 5, 2), (3, 3), 2, (2, 2), Some(ActFn::tanh()));
        let mut params = conv.init_params(&mut rng).unwrap();
        let x = Array2::from_shape_fn((2, 50), |(i, j)| ((i * 50 + j) as f32 * 0.37).sin());

        // loss = sum of outputs
        let y = conv.forward(&params, x.view()).unwrap();
        let mut grad = vec![0.; conv.size()];
        let dx = conv
            .backward(&params, &mut grad, Array2::ones(y.dim()))
            .unwrap();

        let h = 1e-2;
        for i in [0, 5, 17, 36, conv.size() - 1] {
            let orig = params[i];
            params[i] = orig + h;
            let up = conv.forward(&params, x.view()).unwrap().sum();
            params[i] = orig - h;
            let down = conv.forward(&params, x.view()).unwrap().sum();
            params[i] = orig;

            let numeric = (up - down) / (2. * h);
            assert!(
                (grad[i] - numeric).abs() < 1e-2,
                "param {i}: {} vs {numeric}",
                grad[i]
            );
        }

        for j in [0, 7, 24, 49] {
            let mut x_up = x.clone();
            x_up[[1, j]] += h;
            let mut x_down = x.clone();
            x_down[[1, j]] -= h;

            let up = conv.forward(&params, x_up.view()).unwrap().sum();
            let down = conv.forward(&params, x_down.view()).unwrap().sum();

            let numeric = (up - down) / (2. * h);
            assert!(
                (dx[[1, j]] - numeric).abs() < 1e-2,
                "input {j}: {} vs {numeric}",
                dx[[1, j]]
            );
        }
    }
}
