use std::{collections::BTreeMap, num::NonZeroUsize};

use log::debug;
use machine_learning::MlErr;
use ndarray::{Array1, Array2};
use rand::{Rng, seq::index};
use rayon::prelude::*;

use crate::{
    FewShotErr, Result,
    catalog::Sample,
    encoder::{Angle, Encoder},
    error::Context,
};

/// A sample together with the rotation it is shown with.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AngledSample<'s> {
    pub sample: &'s Sample,
    pub angle: Angle,
}

/// One drawn training triple: a set of examples of a class, a query and whether the query
/// belongs to that class.
#[derive(Clone, Debug)]
pub struct Draw<'s> {
    pub examples: Vec<AngledSample<'s>>,
    pub query: AngledSample<'s>,
    pub target: f32,
}

/// A batch of encoded triples.
///
/// `examples` holds `num_examples` consecutive rows per triple, `queries` and `targets` one
/// per triple.
#[derive(Clone, Debug)]
pub struct Batch {
    pub examples: Array2<f32>,
    pub queries: Array2<f32>,
    pub targets: Array1<f32>,
    pub batch_size: usize,
    pub num_examples: usize,
}

/// Draws balanced random batches from a pool of samples.
#[derive(Clone, Debug)]
pub struct BatchSampler<'s> {
    classes: BTreeMap<char, Vec<&'s Sample>>,
    labels: Vec<char>,
    usable: Vec<char>,
    num_examples: usize,
    augment: bool,
    encoder: Encoder,
}

impl<'s> BatchSampler<'s> {
    /// Creates a new `BatchSampler`.
    ///
    /// # Arguments
    /// * `samples` - The pool every batch is drawn from.
    /// * `num_examples` - The amount of examples of each triple, one if `None`.
    /// * `encoder` - Turns the drawn samples into feature vectors.
    ///
    /// # Errors
    /// `NotEnoughClasses` if no label has `num_examples` samples or the pool has less than two
    /// labels, since "no match" queries need a second class.
    pub fn new(
        samples: &'s [Sample],
        num_examples: Option<NonZeroUsize>,
        encoder: Encoder,
    ) -> Result<Self> {
        let num_examples = num_examples.map_or(1, NonZeroUsize::get);

        let mut classes: BTreeMap<char, Vec<&Sample>> = BTreeMap::new();
        for sample in samples {
            classes.entry(sample.label).or_default().push(sample);
        }

        let labels: Vec<char> = classes.keys().copied().collect();
        let usable: Vec<char> = classes
            .iter()
            .filter(|(_, members)| members.len() >= num_examples)
            .map(|(&label, _)| label)
            .collect();

        if labels.len() < 2 {
            return Err(FewShotErr::NotEnoughClasses {
                usable: labels.len(),
                required: 2,
            });
        }
        if usable.is_empty() {
            return Err(FewShotErr::NotEnoughClasses {
                usable: 0,
                required: 1,
            });
        }

        Ok(Self {
            classes,
            labels,
            usable,
            num_examples,
            augment: false,
            encoder,
        })
    }

    /// Shows every drawn sample rotated by a random multiple of 90 degrees.
    pub fn with_augmentation(mut self, augment: bool) -> Self {
        self.augment = augment;
        self
    }

    pub fn num_examples(&self) -> usize {
        self.num_examples
    }

    /// Returns the labels that have enough samples to be the class of a triple.
    pub fn usable_labels(&self) -> &[char] {
        &self.usable
    }

    /// Draws `size` triples.
    ///
    /// For each one a usable class is picked uniformly and its examples are drawn without
    /// replacement. Half of the time the query is drawn from the same class, otherwise from
    /// a uniformly picked different class.
    pub fn draw<R: Rng + ?Sized>(&self, rng: &mut R, size: usize) -> Vec<Draw<'s>> {
        (0..size).map(|_| self.draw_one(rng)).collect()
    }

    fn draw_one<R: Rng + ?Sized>(&self, rng: &mut R) -> Draw<'s> {
        let class = self.usable[rng.random_range(0..self.usable.len())];
        let members = &self.classes[&class];

        let examples = index::sample(rng, members.len(), self.num_examples)
            .into_iter()
            .map(|i| self.angled(rng, members[i]))
            .collect();

        let (pool, target) = if rng.random_bool(0.5) {
            (members, 1.)
        } else {
            // skip the class itself among the other labels
            let mut i = rng.random_range(0..self.labels.len() - 1);
            if self.labels[i] >= class {
                i += 1;
            }
            (&self.classes[&self.labels[i]], 0.)
        };

        let pick = rng.random_range(0..pool.len());
        let query = self.angled(rng, pool[pick]);

        Draw {
            examples,
            query,
            target,
        }
    }

    fn angled<R: Rng + ?Sized>(&self, rng: &mut R, sample: &'s Sample) -> AngledSample<'s> {
        let angle = if self.augment {
            Angle::random(rng)
        } else {
            Angle::Deg0
        };

        AngledSample { sample, angle }
    }

    /// Draws and encodes a batch of `size` triples.
    ///
    /// Samples are encoded in parallel, the rows keep the order they were drawn in. Any
    /// encoding failure fails the whole batch.
    pub fn fetch<R: Rng + ?Sized>(&self, rng: &mut R, size: usize) -> Result<Batch> {
        self.fetch_inner(rng, size).context("fetch samples")
    }

    fn fetch_inner<R: Rng + ?Sized>(&self, rng: &mut R, size: usize) -> Result<Batch> {
        if size == 0 {
            return Err(MlErr::InvalidInput("empty batch").into());
        }

        let draws = self.draw(rng, size);
        debug!(size = size, num_examples = self.num_examples; "drew batch");

        let examples: Vec<_> = draws
            .iter()
            .flat_map(|d| d.examples.iter().copied())
            .collect();
        let queries: Vec<_> = draws.iter().map(|d| d.query).collect();
        let targets = draws.iter().map(|d| d.target).collect();

        Ok(Batch {
            examples: self.encode_all(&examples)?,
            queries: self.encode_all(&queries)?,
            targets,
            batch_size: size,
            num_examples: self.num_examples,
        })
    }

    fn encode_all(&self, samples: &[AngledSample]) -> Result<Array2<f32>> {
        encode_rows(
            &self.encoder,
            samples.iter().map(|s| (s.sample, s.angle)).collect(),
        )
    }
}

/// Encodes the samples in parallel into the rows of a matrix, in the given order.
pub(crate) fn encode_rows(
    encoder: &Encoder,
    samples: Vec<(&Sample, Angle)>,
) -> Result<Array2<f32>> {
    let rows = samples
        .into_par_iter()
        .map(|(sample, angle)| encoder.encode(sample, angle))
        .collect::<Result<Vec<_>>>()?;

    let shape = (rows.len(), encoder.len());
    Array2::from_shape_vec(shape, rows.concat()).map_err(|e| MlErr::from(e).into())
}
