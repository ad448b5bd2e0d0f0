use machine_learning::{
    arch::loss::{LossFn, SigmoidCrossEntropy},
    optimization::Optimizer,
};
use ndarray::{Array2, Axis};

use crate::{Result, model::Model, sampler::Batch};

/// Computes costs and gradients of a `Model` over batches.
#[derive(Clone, Debug)]
pub struct Trainer {
    model: Model,
    grad: Vec<f32>,
    loss: SigmoidCrossEntropy,
    last_cost: Option<f32>,
}

impl Trainer {
    /// Creates a new `Trainer` owning the model it trains.
    pub fn new(model: Model) -> Self {
        Self {
            grad: vec![0.; model.parameters().len()],
            model,
            loss: SigmoidCrossEntropy,
            last_cost: None,
        }
    }

    pub fn model(&self) -> &Model {
        &self.model
    }

    pub fn model_mut(&mut self) -> &mut Model {
        &mut self.model
    }

    pub fn into_model(self) -> Model {
        self.model
    }

    /// The cost of the batch given to the last `gradient` call.
    pub fn last_cost(&self) -> Option<f32> {
        self.last_cost
    }

    /// Computes the binary cross entropy between the model's match probabilities and the
    /// batch targets, averaged over the batch.
    pub fn total_cost(&mut self, batch: &Batch) -> Result<f32> {
        let scores = self.scores(batch)?;
        let targets = batch.targets.view().insert_axis(Axis(1));
        Ok(self.loss.loss(scores.view(), targets)?)
    }

    fn scores(&mut self, batch: &Batch) -> Result<Array2<f32>> {
        let scores = self.model.apply(
            batch.examples.view(),
            batch.queries.view(),
            batch.num_examples,
            batch.batch_size,
        )?;

        Ok(scores.insert_axis(Axis(1)))
    }

    /// Computes the gradient of `total_cost` with respect to every model parameter.
    ///
    /// # Returns
    /// The gradient, index aligned with `Model::parameters`.
    pub fn gradient(&mut self, batch: &Batch) -> Result<&[f32]> {
        self.grad.fill(0.);

        let scores = self.scores(batch)?;
        let targets = batch.targets.view().insert_axis(Axis(1));

        let cost = self.loss.loss(scores.view(), targets)?;
        let d = self.loss.loss_prime(scores.view(), targets)?;
        self.model.backward(d.column(0), &mut self.grad)?;

        self.last_cost = Some(cost);
        Ok(&self.grad)
    }

    /// Computes the gradient of the batch and lets the optimizer update the parameters.
    ///
    /// # Returns
    /// The cost of the batch before the update.
    pub fn step<O: Optimizer + ?Sized>(&mut self, batch: &Batch, optimizer: &mut O) -> Result<f32> {
        self.gradient(batch)?;
        optimizer.update_params(self.model.parameters_mut(), &self.grad)?;
        Ok(self.last_cost.unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use machine_learning::optimization::GradientDescent;
    use ndarray::{Array1, Array2};
    use rand::{SeedableRng, rngs::StdRng};

    use super::*;
    use crate::model::ModelSpec;

    const SPEC: ModelSpec = ModelSpec {
        image_size: 15,
        knowledge_size: 4,
    };

    fn batch(size: usize, num_examples: usize) -> Batch {
        let len = SPEC.in_len();
        Batch {
            examples: Array2::from_shape_fn((size * num_examples, len), |(i, j)| {
                ((i * 7 + j) as f32 * 0.37).sin().abs()
            }),
            queries: Array2::from_shape_fn((size, len), |(i, j)| {
                ((i * 5 + j) as f32 * 0.21).cos().abs()
            }),
            targets: Array1::from_shape_fn(size, |i| (i % 2) as f32),
            batch_size: size,
            num_examples,
        }
    }

    fn trainer(seed: u64) -> Trainer {
        let mut rng = StdRng::seed_from_u64(seed);
        Trainer::new(Model::new(SPEC, &mut rng).unwrap())
    }

    #[test]
    fn gradient_is_aligned_with_the_parameters() {
        let mut trainer = trainer(0);
        let batch = batch(4, 2);

        let grad = trainer.gradient(&batch).unwrap().to_vec();
        assert_eq!(grad.len(), trainer.model().parameters().len());
        assert!(grad.iter().all(|g| g.is_finite()));
        assert!(grad.iter().any(|&g| g != 0.));

        let cost = trainer.total_cost(&batch).unwrap();
        assert_eq!(trainer.last_cost(), Some(cost));
    }

    #[test]
    fn gradient_is_recomputed_from_scratch() {
        let mut trainer = trainer(1);
        let batch = batch(2, 1);

        let first = trainer.gradient(&batch).unwrap().to_vec();
        let second = trainer.gradient(&batch).unwrap().to_vec();
        assert_eq!(first, second);
    }

    #[test]
    fn steps_reduce_the_cost() {
        let mut trainer = trainer(2);
        let mut optimizer = GradientDescent::new(0.05);
        let batch = batch(6, 1);

        let before = trainer.total_cost(&batch).unwrap();
        for _ in 0..20 {
            trainer.step(&batch, &mut optimizer).unwrap();
        }
        let after = trainer.total_cost(&batch).unwrap();

        assert!(after < before, "{after} >= {before}");
    }
}
