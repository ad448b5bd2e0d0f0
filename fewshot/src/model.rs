use std::ops::Range;

use machine_learning::{
    MlErr,
    arch::{
        AddMixer, Differentiable, Mixer, Sequential,
        activations::ActFn,
        layers::{Conv2d, Layer},
    },
};
use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis};
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::Result;

/// The width of the hidden representations shared by every sub-network.
pub const HIDDEN_SIZE: usize = 128;

/// The smallest image side the convolutional tower can reduce.
pub const MIN_IMAGE_SIZE: usize = 15;

const CONV_STAGES: [usize; 3] = [8, 16, 32];
const KERNEL: (usize, usize) = (3, 3);
const STRIDE: (usize, usize) = (2, 2);

/// Everything needed to rebuild a model's architecture.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelSpec {
    pub image_size: usize,
    pub knowledge_size: usize,
}

impl ModelSpec {
    pub fn new(image_size: usize, knowledge_size: usize) -> Self {
        Self {
            image_size,
            knowledge_size,
        }
    }

    /// The length of each encoded image.
    pub fn in_len(&self) -> usize {
        self.image_size * self.image_size
    }

    fn validate(&self) -> Result<()> {
        if self.image_size < MIN_IMAGE_SIZE {
            return Err(MlErr::InvalidInput("image too small for the convolutional tower").into());
        }
        if self.knowledge_size == 0 {
            return Err(MlErr::InvalidInput("knowledge size must be positive").into());
        }
        Ok(())
    }
}

/// Builds the convolutional tower shared by the learner and the mixer's query side: three
/// stride 2 convolutions with ReLU and a `tanh` projection to `HIDDEN_SIZE`.
///
/// # Panics
/// If `image_size` is smaller than `MIN_IMAGE_SIZE`.
pub fn tower(image_size: usize) -> Sequential {
    Sequential::new(tower_layers(image_size))
}

fn tower_layers(image_size: usize) -> Vec<Layer> {
    let mut layers = Vec::with_capacity(CONV_STAGES.len() + 1);
    let mut input = (image_size, image_size, 1);

    for filters in CONV_STAGES {
        let conv = Conv2d::new(input, KERNEL, filters, STRIDE, Some(ActFn::relu()));
        input = conv.output_shape();
        layers.push(Layer::Conv(conv));
    }

    let flat = input.0 * input.1 * input.2;
    layers.push(Layer::dense((flat, HIDDEN_SIZE), Some(ActFn::tanh())));
    layers
}

/// Where every sub-network lives in the model's flat parameter buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParameterLayout {
    pub learner: Range<usize>,
    pub mixer: Range<usize>,
    pub classifier: Range<usize>,
    /// The learner's convolutional tower, a prefix of `learner`.
    pub trunk: Range<usize>,
    /// The mixer's query-side tower.
    pub query_tower: Range<usize>,
}

impl ParameterLayout {
    fn new(learner: &Sequential, mixer: &AddMixer, classifier: &Sequential, trunk: usize) -> Self {
        let learner_end = learner.size();
        let mixer_end = learner_end + mixer.size();
        let classifier_end = mixer_end + classifier.size();

        let [_, in2, _] = mixer.ranges();

        Self {
            learner: 0..learner_end,
            mixer: learner_end..mixer_end,
            classifier: mixer_end..classifier_end,
            trunk: 0..trunk,
            query_tower: learner_end + in2.start..learner_end + in2.end,
        }
    }

    /// The total amount of parameters.
    pub fn len(&self) -> usize {
        self.classifier.end
    }
}

/// The few-shot comparator: decides whether each query shows the same character as a set of
/// examples.
///
/// It is composed of three sub-networks:
/// * The learner maps each example to a knowledge vector.
/// * The mixer fuses a knowledge vector with the representation its own tower gives a query.
/// * The classifier maps the fused representation to a pre-sigmoid score.
///
/// All their parameters live in a single buffer laid out as `learner | mixer | classifier`.
#[derive(Clone, Debug)]
pub struct Model {
    spec: ModelSpec,
    learner: Sequential,
    mixer: AddMixer,
    classifier: Sequential,
    layout: ParameterLayout,
    params: Vec<f32>,

    // Forward metadata
    num_examples: usize,
    groups: usize,
    num_queries: usize,
}

impl Model {
    /// Creates a new untrained `Model`.
    ///
    /// # Arguments
    /// * `spec` - The image and knowledge sizes.
    /// * `rng` - The source of the initial parameters.
    pub fn new<R: Rng>(spec: ModelSpec, rng: &mut R) -> Result<Self> {
        let mut model = Self::build(spec)?;

        let mut params = model.learner.init_params(rng)?;
        params.extend(model.mixer.init_params(rng)?);
        params.extend(model.classifier.init_params(rng)?);
        model.params = params;

        Ok(model)
    }

    /// Rebuilds a `Model` from its spec and its parameters.
    ///
    /// # Errors
    /// `SizeMismatch` if `params` does not fit the architecture `spec` describes.
    pub fn from_parts(spec: ModelSpec, params: Vec<f32>) -> Result<Self> {
        let mut model = Self::build(spec)?;

        if params.len() != model.layout.len() {
            return Err(MlErr::SizeMismatch {
                what: "model parameters",
                got: params.len(),
                expected: model.layout.len(),
            }
            .into());
        }

        model.params = params;
        Ok(model)
    }

    fn build(spec: ModelSpec) -> Result<Self> {
        spec.validate()?;

        let k = spec.knowledge_size;
        let trunk = tower(spec.image_size);
        let trunk_size = trunk.size();

        let mut learner_layers = tower_layers(spec.image_size);
        learner_layers.push(Layer::dense((HIDDEN_SIZE, k), None));
        let learner = Sequential::new(learner_layers);

        let mixer = AddMixer::new(
            Sequential::new([Layer::dense((k, HIDDEN_SIZE), Some(ActFn::tanh()))]),
            trunk,
            Sequential::new([
                Layer::activation(ActFn::tanh()),
                Layer::dense((HIDDEN_SIZE, HIDDEN_SIZE), None),
            ]),
        );

        let classifier = Sequential::new([Layer::dense((HIDDEN_SIZE, 1), None)]);
        let layout = ParameterLayout::new(&learner, &mixer, &classifier, trunk_size);

        Ok(Self {
            spec,
            learner,
            mixer,
            classifier,
            layout,
            params: Vec::new(),
            num_examples: 0,
            groups: 0,
            num_queries: 0,
        })
    }

    pub fn spec(&self) -> ModelSpec {
        self.spec
    }

    pub fn layout(&self) -> &ParameterLayout {
        &self.layout
    }

    /// Returns every parameter of the model, in `learner | mixer | classifier` order.
    pub fn parameters(&self) -> &[f32] {
        &self.params
    }

    pub fn parameters_mut(&mut self) -> &mut [f32] {
        &mut self.params
    }

    /// Looks at the examples and then scores a batch of queries against them.
    ///
    /// `examples` holds one or more groups of `num_examples` consecutive rows. Each group's
    /// knowledge vectors are averaged, and the average is used for an equal share of
    /// consecutive queries. With a single group every query is compared to every example.
    ///
    /// # Arguments
    /// * `examples` - The encoded examples, one per row.
    /// * `queries` - The encoded queries, one per row.
    /// * `num_examples` - The amount of examples in each group.
    /// * `num_queries` - The amount of queries.
    ///
    /// # Returns
    /// The pre-sigmoid score of every query.
    pub fn apply(
        &mut self,
        examples: ArrayView2<f32>,
        queries: ArrayView2<f32>,
        num_examples: usize,
        num_queries: usize,
    ) -> Result<Array1<f32>> {
        let groups = self.check_batch(&examples, &queries, num_examples, num_queries)?;
        let per_group = num_queries / groups;
        let params = &self.params;

        let knowledge = self
            .learner
            .forward(&params[self.layout.learner.clone()], examples)?;

        let mut avg = Array2::<f32>::zeros((groups, self.spec.knowledge_size));
        for (i, row) in knowledge.rows().into_iter().enumerate() {
            let mut acc = avg.row_mut(i / num_examples);
            acc += &row;
        }
        avg /= num_examples as f32;

        let repeated = Array2::from_shape_fn((num_queries, self.spec.knowledge_size), |(q, j)| {
            avg[[q / per_group, j]]
        });

        let mixed = self.mixer.mix(
            &params[self.layout.mixer.clone()],
            repeated.view(),
            queries,
        )?;
        let scores = self
            .classifier
            .forward(&params[self.layout.classifier.clone()], mixed.view())?;

        self.num_examples = num_examples;
        self.groups = groups;
        self.num_queries = num_queries;

        Ok(scores.column(0).to_owned())
    }

    /// Propagates the delta of the last `apply` scores back through the whole model.
    ///
    /// # Arguments
    /// * `d` - The delta of the loss with respect to each score.
    /// * `grad` - The gradient buffer, aligned with `parameters()`; gradients are **added**.
    pub fn backward(&mut self, d: ArrayView1<f32>, grad: &mut [f32]) -> Result<()> {
        if self.num_queries == 0 {
            return Err(MlErr::InvalidInput("backward called before apply").into());
        }
        check(d.len(), self.num_queries, "score deltas")?;
        check(grad.len(), self.params.len(), "model gradient")?;

        let params = &self.params;
        let ParameterLayout {
            learner,
            mixer,
            classifier,
            ..
        } = &self.layout;

        let (g_learner, rest) = grad.split_at_mut(learner.end);
        let (g_mixer, g_classifier) = rest.split_at_mut(mixer.len());

        let d_mixed = self.classifier.backward(
            &params[classifier.clone()],
            g_classifier,
            d.to_owned().insert_axis(Axis(1)),
        )?;
        let (d_repeated, _) = self
            .mixer
            .backward(&params[mixer.clone()], g_mixer, d_mixed)?;

        let per_group = self.num_queries / self.groups;
        let mut d_avg = Array2::<f32>::zeros((self.groups, self.spec.knowledge_size));
        for (q, row) in d_repeated.rows().into_iter().enumerate() {
            let mut acc = d_avg.row_mut(q / per_group);
            acc += &row;
        }
        d_avg /= self.num_examples as f32;

        let rows = self.groups * self.num_examples;
        let num_examples = self.num_examples;
        let d_knowledge = Array2::from_shape_fn((rows, self.spec.knowledge_size), |(i, j)| {
            d_avg[[i / num_examples, j]]
        });

        self.learner
            .backward(&params[learner.clone()], g_learner, d_knowledge)?;

        Ok(())
    }

    /// Scores the queries against the examples and returns match probabilities.
    pub fn classify(
        &mut self,
        examples: ArrayView2<f32>,
        queries: ArrayView2<f32>,
        num_examples: usize,
    ) -> Result<Array1<f32>> {
        let sigmoid = ActFn::sigmoid(1.);
        let scores = self.apply(examples, queries, num_examples, queries.nrows())?;
        Ok(scores.mapv(|z| sigmoid.f(z)))
    }

    /// Returns a fresh copy of the convolutional tower's architecture.
    pub fn tower(&self) -> Sequential {
        tower(self.spec.image_size)
    }

    /// Returns the parameters of the learner's convolutional tower.
    pub fn trunk(&self) -> &[f32] {
        &self.params[self.layout.trunk.clone()]
    }

    /// Copies a trained tower into both the learner and the mixer's query side.
    ///
    /// The two towers keep their own storage and are updated independently afterwards.
    pub fn load_trunk(&mut self, trunk: &[f32]) -> Result<()> {
        check(trunk.len(), self.layout.trunk.len(), "trunk parameters")?;

        for range in [self.layout.trunk.clone(), self.layout.query_tower.clone()] {
            self.params[range].copy_from_slice(trunk);
        }
        Ok(())
    }

    fn check_batch(
        &self,
        examples: &ArrayView2<f32>,
        queries: &ArrayView2<f32>,
        num_examples: usize,
        num_queries: usize,
    ) -> Result<usize> {
        if num_examples == 0 || num_queries == 0 {
            return Err(MlErr::InvalidInput("empty examples or queries").into());
        }

        let in_len = self.spec.in_len();
        check(examples.ncols(), in_len, "example length")?;
        check(queries.ncols(), in_len, "query length")?;
        check(queries.nrows(), num_queries, "query rows")?;

        if examples.nrows() == 0 || examples.nrows() % num_examples != 0 {
            return Err(MlErr::InvalidInput("example rows not a multiple of num_examples").into());
        }

        let groups = examples.nrows() / num_examples;
        if num_queries % groups != 0 {
            return Err(MlErr::InvalidInput("queries not evenly split among groups").into());
        }

        Ok(groups)
    }
}

fn check(got: usize, expected: usize, what: &'static str) -> Result<()> {
    if got != expected {
        return Err(MlErr::SizeMismatch {
            what,
            got,
            expected,
        }
        .into());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use rand::{SeedableRng, rngs::StdRng};

    use super::*;

    const SPEC: ModelSpec = ModelSpec {
        image_size: 15,
        knowledge_size: 4,
    };

    fn batch(rows: usize, seed: f32) -> Array2<f32> {
        Array2::from_shape_fn((rows, SPEC.in_len()), |(i, j)| {
            ((i * 31 + j) as f32 * seed).sin().abs()
        })
    }

    #[test]
    fn reference_tower_reduces_to_800() {
        let tower = tower(54);
        let Layer::Dense(dense) = &tower.layers()[3] else {
            panic!("expected a dense projection");
        };
        assert_eq!(dense.dim(), (800, HIDDEN_SIZE));
    }

    #[test]
    fn layout_covers_every_parameter() {
        let mut rng = StdRng::seed_from_u64(0);
        let model = Model::new(SPEC, &mut rng).unwrap();
        let layout = model.layout();

        assert_eq!(layout.learner.start, 0);
        assert_eq!(layout.learner.end, layout.mixer.start);
        assert_eq!(layout.mixer.end, layout.classifier.start);
        assert_eq!(layout.len(), model.parameters().len());
        assert_eq!(layout.trunk.len(), layout.query_tower.len());
        assert_eq!(layout.classifier.len(), HIDDEN_SIZE + 1);
    }

    #[test]
    fn too_small_images_are_rejected() {
        let mut rng = StdRng::seed_from_u64(0);
        assert!(Model::new(ModelSpec::new(14, 4), &mut rng).is_err());
        assert!(Model::from_parts(SPEC, vec![0.; 3]).is_err());
    }

    #[test]
    fn a_single_group_is_broadcast() {
        let mut rng = StdRng::seed_from_u64(1);
        let mut model = Model::new(SPEC, &mut rng).unwrap();
        let examples = batch(3, 0.7);
        let queries = batch(5, 0.3);

        let broadcast = model.apply(examples.view(), queries.view(), 3, 5).unwrap();
        assert_eq!(broadcast.len(), 5);

        // the same examples repeated for every query are averaged the same way
        let mut repeated = Array2::zeros((15, SPEC.in_len()));
        for g in 0..5 {
            repeated
                .slice_mut(ndarray::s![g * 3..g * 3 + 3, ..])
                .assign(&examples);
        }
        let grouped = model.apply(repeated.view(), queries.view(), 3, 5).unwrap();

        for (a, b) in broadcast.iter().zip(&grouped) {
            assert!((a - b).abs() < 1e-5);
        }
    }

    #[test]
    fn uneven_groups_fail() {
        let mut rng = StdRng::seed_from_u64(2);
        let mut model = Model::new(SPEC, &mut rng).unwrap();

        let res = model.apply(batch(4, 0.1).view(), batch(3, 0.2).view(), 2, 3);
        assert!(res.is_err());
        let res = model.apply(batch(5, 0.1).view(), batch(3, 0.2).view(), 2, 3);
        assert!(res.is_err());
    }

    #[test]
    fn load_trunk_copies_into_both_towers() {
        let mut rng = StdRng::seed_from_u64(3);
        let mut model = Model::new(SPEC, &mut rng).unwrap();
        let trunk: Vec<f32> = (0..model.layout().trunk.len()).map(|i| i as f32).collect();

        model.load_trunk(&trunk).unwrap();
        let layout = model.layout().clone();
        let params = model.parameters();
        assert_eq!(&params[layout.trunk], trunk.as_slice());
        assert_eq!(&params[layout.query_tower.clone()], trunk.as_slice());

        // no aliasing afterwards
        model.parameters_mut()[layout.query_tower.start] = -1.;
        assert_eq!(model.trunk()[0], 0.);

        assert!(model.load_trunk(&trunk[1..]).is_err());
    }

    #[test]
    fn backward_matches_finite_differences() {
        let mut rng = StdRng::seed_from_u64(4);
        let mut model = Model::new(SPEC, &mut rng).unwrap();
        let examples = batch(4, 0.9);
        let queries = batch(4, 0.4);

        let total = |model: &mut Model| {
            model
                .apply(examples.view(), queries.view(), 2, 4)
                .unwrap()
                .sum()
        };

        total(&mut model);
        let mut grad = vec![0.; model.parameters().len()];
        model
            .backward(Array1::ones(4).view(), &mut grad)
            .unwrap();

        let h = 1e-2;
        let n = grad.len();
        for i in (0..n).step_by(n / 40) {
            let orig = model.parameters()[i];
            model.parameters_mut()[i] = orig + h;
            let up = total(&mut model);
            model.parameters_mut()[i] = orig - h;
            let down = total(&mut model);
            model.parameters_mut()[i] = orig;

            let numeric = (up - down) / (2. * h);
            assert!(
                (grad[i] - numeric).abs() < 5e-2 * (1. + numeric.abs()),
                "param {i}: {} vs {numeric}",
                grad[i]
            );
        }
    }
}
