use std::{num::NonZeroUsize, path::PathBuf};

use clap::ValueEnum;
use machine_learning::optimization::{Adam, GradientDescent, Optimizer};
use rand::{SeedableRng, rngs::StdRng};

use crate::{encoder::DEFAULT_IMAGE_SIZE, model::ModelSpec};

const DEFAULT_BATCH_SIZE: NonZeroUsize = match NonZeroUsize::new(64) {
    Some(n) => n,
    None => unreachable!(),
};

/// The parameter update rule.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum OptimizerKind {
    /// Gradient descent with a constant step size.
    #[default]
    Sgd,
    Adam,
}

impl OptimizerKind {
    /// Builds the optimizer for `len` parameters.
    pub fn build(self, len: usize, step_size: f32) -> Box<dyn Optimizer + Send> {
        match self {
            OptimizerKind::Sgd => Box::new(GradientDescent::new(step_size)),
            OptimizerKind::Adam => Box::new(Adam::with_defaults(len, step_size)),
        }
    }
}

/// How a training run goes.
#[derive(Clone, Debug)]
pub struct TrainConfig {
    pub step_size: f32,
    pub batch_size: NonZeroUsize,
    /// Examples per triple, a single one if `None`.
    pub num_examples: Option<NonZeroUsize>,
    pub augment: bool,
    /// Stop after this many steps instead of waiting for a cancellation.
    pub max_steps: Option<NonZeroUsize>,
    pub seed: Option<u64>,
    pub optimizer: OptimizerKind,
}

impl Default for TrainConfig {
    fn default() -> Self {
        Self {
            step_size: 0.001,
            batch_size: DEFAULT_BATCH_SIZE,
            num_examples: None,
            augment: false,
            max_steps: None,
            seed: None,
            optimizer: OptimizerKind::Sgd,
        }
    }
}

impl TrainConfig {
    /// Returns whether `steps` steps are enough to stop.
    pub fn is_done(&self, steps: usize) -> bool {
        self.max_steps.is_some_and(|max| steps >= max.get())
    }
}

/// Everything a run of the training binary needs.
#[derive(Clone, Debug)]
pub struct RunConfig {
    pub model_path: PathBuf,
    pub samples_dir: PathBuf,
    /// Every label held out for validation.
    pub validation: String,
    /// Train the learner's tower as a classifier instead of training the whole model.
    pub pretrain: bool,
    /// The architecture of the model when a new one has to be created.
    pub spec: ModelSpec,
    pub train: TrainConfig,
}

impl RunConfig {
    pub fn new(samples_dir: impl Into<PathBuf>) -> Self {
        Self {
            model_path: PathBuf::from("model_out"),
            samples_dir: samples_dir.into(),
            validation: "aBcD94".to_string(),
            pretrain: false,
            spec: ModelSpec::new(DEFAULT_IMAGE_SIZE as usize, 16),
            train: TrainConfig::default(),
        }
    }
}

/// Creates the run's random source, seeded if `seed` is given.
pub fn generate_rng(seed: Option<u64>) -> StdRng {
    match seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_os_rng(),
    }
}
