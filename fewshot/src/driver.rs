use log::{debug, info, warn};
use machine_learning::optimization::Optimizer;
use rand::Rng;
use tokio_util::sync::CancellationToken;

use crate::{
    FewShotErr, Result,
    catalog::{Sample, partition, read_samples},
    config::{RunConfig, TrainConfig, generate_rng},
    encoder::Encoder,
    error::Context,
    model::Model,
    pretrain::{PretrainSamples, Pretrainer},
    sampler::BatchSampler,
    store,
    trainer::Trainer,
};

/// Trains the model until the token is cancelled or the step limit is reached.
///
/// Cancellation is only checked between steps, so the last step is always fully applied.
///
/// # Arguments
/// * `trainer` - Holds the model being trained.
/// * `training` - Draws the training batches.
/// * `validation` - Draws the batches the validation cost is reported on, if any.
/// * `optimizer` - Updates the parameters with each gradient.
/// * `config` - The batch size and the step limit.
/// * `token` - Stops the training when cancelled.
/// * `rng` - The source of every batch.
///
/// # Returns
/// The amount of steps taken.
pub fn train<R, O>(
    trainer: &mut Trainer,
    training: &BatchSampler,
    validation: Option<&BatchSampler>,
    optimizer: &mut O,
    config: &TrainConfig,
    token: &CancellationToken,
    rng: &mut R,
) -> Result<usize>
where
    R: Rng,
    O: Optimizer + ?Sized,
{
    let batch_size = config.batch_size.get();
    let mut iter = 0;

    while !token.is_cancelled() && !config.is_done(iter) {
        let batch = training.fetch(rng, batch_size)?;
        let cost = trainer.step(&batch, optimizer)?;

        match validation {
            Some(validation) => {
                let batch = validation.fetch(rng, batch_size)?;
                let validation = trainer.total_cost(&batch)?;
                info!("iter {iter}: cost={cost} validation={validation}");
            }
            None => info!("iter {iter}: cost={cost}"),
        }

        iter += 1;
    }

    Ok(iter)
}

/// Trains the model's convolutional tower as a classifier over the labels of `samples`, then
/// copies it into both of the model's towers.
///
/// The samples are shuffled every epoch and split into batches of `config.batch_size`.
///
/// # Returns
/// The amount of steps taken.
pub fn pretrain<R: Rng>(
    model: &mut Model,
    samples: &[Sample],
    config: &TrainConfig,
    token: &CancellationToken,
    rng: &mut R,
) -> Result<usize> {
    let encoder = Encoder::new(model.spec().image_size as u32);
    let mut set = PretrainSamples::new(samples, encoder);

    let classes = set.class_map().len();
    if classes < 2 {
        return Err(FewShotErr::NotEnoughClasses {
            usable: classes,
            required: 2,
        })
        .context("pretrain");
    }
    info!("training with {classes} classes");

    let mut pretrainer = Pretrainer::new(model, classes, rng)?;
    let mut optimizer = config
        .optimizer
        .build(pretrainer.num_params(), config.step_size);

    let batch_size = config.batch_size.get();
    let mut iter = 0;

    'epochs: loop {
        set.shuffle(rng);
        debug!("starting epoch over {} samples", set.len());

        for start in (0..set.len()).step_by(batch_size) {
            if token.is_cancelled() || config.is_done(iter) {
                break 'epochs;
            }

            let end = (start + batch_size).min(set.len());
            let (inputs, targets) = set.slice(start..end).batch().context("pretrain")?;
            let cost = pretrainer.step(inputs.view(), targets.view(), optimizer.as_mut())?;

            info!("iter {iter}: cost={cost}");
            iter += 1;
        }
    }

    pretrainer.finish(model)?;
    Ok(iter)
}

/// Runs a whole training session: reads the samples, loads or creates the model, trains it
/// and saves it.
pub fn run(config: &RunConfig, token: &CancellationToken) -> Result<()> {
    let mut rng = generate_rng(config.train.seed);

    let samples = read_samples(&config.samples_dir)?;
    let (validation, training) = partition(samples, &config.validation);
    info!(
        "samples: {} training and {} validation",
        training.len(),
        validation.len()
    );

    let mut model = store::load_or_create(&config.model_path, config.spec, &mut rng)?;

    let steps = if config.pretrain {
        pretrain(&mut model, &training, &config.train, token, &mut rng)?
    } else {
        let (steps, trained) = train_model(model, &training, &validation, config, token, &mut rng)?;
        model = trained;
        steps
    };

    if token.is_cancelled() {
        info!("cancelled after {steps} steps");
    } else {
        info!("finished after {steps} steps");
    }

    store::save(&model, &config.model_path)?;
    info!("saved model to {}", config.model_path.display());

    Ok(())
}

fn train_model<R: Rng>(
    model: Model,
    training: &[Sample],
    validation: &[Sample],
    config: &RunConfig,
    token: &CancellationToken,
    rng: &mut R,
) -> Result<(usize, Model)> {
    let TrainConfig {
        num_examples,
        augment,
        ..
    } = config.train;
    let encoder = Encoder::new(model.spec().image_size as u32);

    let training = BatchSampler::new(training, num_examples, encoder)
        .context("train")?
        .with_augmentation(augment);
    let validation = match BatchSampler::new(validation, num_examples, encoder) {
        Ok(sampler) => Some(sampler.with_augmentation(augment)),
        Err(e) => {
            warn!("not reporting validation cost: {e}");
            None
        }
    };

    let mut trainer = Trainer::new(model);
    let mut optimizer = config
        .train
        .optimizer
        .build(trainer.model().parameters().len(), config.train.step_size);

    let steps = train(
        &mut trainer,
        &training,
        validation.as_ref(),
        optimizer.as_mut(),
        &config.train,
        token,
        rng,
    )?;

    Ok((steps, trainer.into_model()))
}
