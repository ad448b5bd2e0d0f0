use std::{collections::BTreeMap, ops::Range, sync::Arc};

use machine_learning::{
    MlErr,
    arch::{
        Differentiable, Sequential,
        layers::Layer,
        loss::{LossFn, SoftmaxCrossEntropy},
    },
    optimization::Optimizer,
};
use ndarray::{Array2, ArrayView2};
use rand::{Rng, seq::SliceRandom};

use crate::{
    Result,
    catalog::Sample,
    encoder::{Angle, Encoder},
    model::{HIDDEN_SIZE, Model},
    sampler::encode_rows,
};

/// Maps every label to a dense class index, in the labels' natural order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClassMap {
    indices: BTreeMap<char, usize>,
}

impl ClassMap {
    /// Builds the map over the distinct labels of the samples.
    pub fn new<'a, I>(samples: I) -> Self
    where
        I: IntoIterator<Item = &'a Sample>,
    {
        let mut indices: BTreeMap<char, usize> =
            samples.into_iter().map(|s| (s.label, 0)).collect();

        for (i, index) in indices.values_mut().enumerate() {
            *index = i;
        }

        Self { indices }
    }

    pub fn index(&self, label: char) -> Option<usize> {
        self.indices.get(&label).copied()
    }

    pub fn len(&self) -> usize {
        self.indices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    /// Returns the labels sorted by index.
    pub fn labels(&self) -> impl Iterator<Item = char> + '_ {
        self.indices.keys().copied()
    }

    /// Returns the one hot target of a label.
    pub fn one_hot(&self, label: char) -> Option<Vec<f32>> {
        let mut v = vec![0.; self.len()];
        v[self.index(label)?] = 1.;
        Some(v)
    }
}

/// Samples for training the learner's tower as a plain classifier.
#[derive(Clone, Debug)]
pub struct PretrainSamples<'s> {
    class_map: Arc<ClassMap>,
    samples: Vec<&'s Sample>,
    encoder: Encoder,
}

impl<'s> PretrainSamples<'s> {
    pub fn new(samples: &'s [Sample], encoder: Encoder) -> Self {
        Self {
            class_map: Arc::new(ClassMap::new(samples)),
            samples: samples.iter().collect(),
            encoder,
        }
    }

    pub fn class_map(&self) -> &ClassMap {
        &self.class_map
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Encodes the `i`th sample.
    ///
    /// # Returns
    /// The encoded image and the one hot vector of its class.
    ///
    /// # Panics
    /// If `i` is out of bounds.
    pub fn get_sample(&self, i: usize) -> Result<(Vec<f32>, Vec<f32>)> {
        let sample = self.samples[i];
        let input = self.encoder.encode(sample, Angle::Deg0)?;
        Ok((input, self.target(sample)))
    }

    fn target(&self, sample: &Sample) -> Vec<f32> {
        // every label of the samples is in the map
        self.class_map
            .one_hot(sample.label)
            .unwrap_or_else(|| vec![0.; self.class_map.len()])
    }

    /// Returns the samples in `range`, sharing this set's class map.
    pub fn slice(&self, range: Range<usize>) -> Self {
        Self {
            class_map: Arc::clone(&self.class_map),
            samples: self.samples[range].to_vec(),
            encoder: self.encoder,
        }
    }

    pub fn shuffle<R: Rng + ?Sized>(&mut self, rng: &mut R) {
        self.samples.shuffle(rng);
    }

    /// Encodes every sample in parallel.
    ///
    /// # Returns
    /// The inputs and the one hot targets, one row per sample.
    pub fn batch(&self) -> Result<(Array2<f32>, Array2<f32>)> {
        let pairs = self.samples.iter().map(|&s| (s, Angle::Deg0)).collect();
        let inputs = encode_rows(&self.encoder, pairs)?;

        let classes = self.class_map.len();
        let mut targets = Array2::zeros((self.samples.len(), classes));
        for (mut row, sample) in targets.rows_mut().into_iter().zip(&self.samples) {
            if let Some(i) = self.class_map.index(sample.label) {
                row[i] = 1.;
            }
        }

        Ok((inputs, targets))
    }
}

/// Trains a copy of a model's convolutional tower, topped with a new dense layer, to classify
/// the training labels.
#[derive(Clone, Debug)]
pub struct Pretrainer {
    net: Sequential,
    params: Vec<f32>,
    grad: Vec<f32>,
    trunk_len: usize,
    loss: SoftmaxCrossEntropy,
    last_cost: Option<f32>,
}

impl Pretrainer {
    /// Creates a new `Pretrainer`.
    ///
    /// # Arguments
    /// * `model` - The model whose tower is copied.
    /// * `num_classes` - The amount of labels to classify.
    /// * `rng` - The source of the head's initial parameters.
    pub fn new<R: Rng>(model: &Model, num_classes: usize, rng: &mut R) -> Result<Self> {
        if num_classes == 0 {
            return Err(MlErr::InvalidInput("no classes to pretrain on").into());
        }

        let head = Layer::dense((HIDDEN_SIZE, num_classes), None);

        let mut params = model.trunk().to_vec();
        let trunk_len = params.len();
        params.extend(head.init_params(rng)?);

        let mut layers = model.tower().layers().to_vec();
        layers.push(head);
        let net = Sequential::new(layers);

        Ok(Self {
            grad: vec![0.; params.len()],
            net,
            params,
            trunk_len,
            loss: SoftmaxCrossEntropy,
            last_cost: None,
        })
    }

    pub fn last_cost(&self) -> Option<f32> {
        self.last_cost
    }

    /// The amount of parameters of the tower and the head.
    pub fn num_params(&self) -> usize {
        self.params.len()
    }

    /// Returns the trained tower's parameters.
    pub fn trunk(&self) -> &[f32] {
        &self.params[..self.trunk_len]
    }

    /// Returns the class scores of every input row.
    pub fn predict(&mut self, inputs: ArrayView2<f32>) -> Result<Array2<f32>> {
        Ok(self.net.forward(&self.params, inputs)?)
    }

    /// Computes the averaged cross entropy gradient of a batch and lets the optimizer update the
    /// parameters.
    ///
    /// # Returns
    /// The cost of the batch before the update.
    pub fn step<O: Optimizer + ?Sized>(
        &mut self,
        inputs: ArrayView2<f32>,
        targets: ArrayView2<f32>,
        optimizer: &mut O,
    ) -> Result<f32> {
        self.grad.fill(0.);

        let scores = self.net.forward(&self.params, inputs)?;
        let cost = self.loss.loss(scores.view(), targets)?;
        let d = self.loss.loss_prime(scores.view(), targets)?;
        self.net.backward(&self.params, &mut self.grad, d)?;

        optimizer.update_params(&mut self.params, &self.grad)?;
        self.last_cost = Some(cost);
        Ok(cost)
    }

    /// Copies the trained tower into both of the model's towers.
    pub fn finish(self, model: &mut Model) -> Result<()> {
        model.load_trunk(self.trunk())
    }
}
