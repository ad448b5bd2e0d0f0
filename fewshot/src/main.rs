use std::{num::NonZeroUsize, path::PathBuf, process::ExitCode};

use anyhow::Context as _;
use clap::Parser;
use log::{error, info};
use tokio::{signal, task};
use tokio_util::sync::CancellationToken;

use fewshot::{
    config::{OptimizerKind, RunConfig, TrainConfig},
    driver,
    encoder::DEFAULT_IMAGE_SIZE,
    model::ModelSpec,
};

/// Train a few-shot glyph classifier on a font dump.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Model file, loaded if present and saved when training stops
    #[arg(long, default_value = "model_out")]
    model: PathBuf,

    /// Sample directory, one directory per font
    #[arg(long)]
    samples: PathBuf,

    /// Labels held out for validation
    #[arg(long, default_value = "aBcD94")]
    validation: String,

    /// Step size
    #[arg(long, default_value_t = 0.001)]
    step: f32,

    /// Number of triples per batch
    #[arg(long, default_value = "64")]
    batch: NonZeroUsize,

    /// Size of learned knowledge vectors
    #[arg(long, default_value = "16")]
    knowledge: NonZeroUsize,

    /// Train the learner's tower on classification
    #[arg(long)]
    pretrain: bool,

    /// Examples per triple
    #[arg(long)]
    examples: Option<NonZeroUsize>,

    /// Rotate samples by random multiples of 90 degrees
    #[arg(long)]
    augment: bool,

    /// Seed for reproducible runs
    #[arg(long)]
    seed: Option<u64>,

    /// Stop after this many steps instead of waiting for Ctrl-C
    #[arg(long)]
    steps: Option<NonZeroUsize>,

    /// Parameter update rule
    #[arg(long, value_enum, default_value_t = OptimizerKind::Sgd)]
    optimizer: OptimizerKind,
}

impl From<Args> for RunConfig {
    fn from(args: Args) -> Self {
        Self {
            model_path: args.model,
            samples_dir: args.samples,
            validation: args.validation,
            pretrain: args.pretrain,
            spec: ModelSpec::new(DEFAULT_IMAGE_SIZE as usize, args.knowledge.get()),
            train: TrainConfig {
                step_size: args.step,
                batch_size: args.batch,
                num_examples: args.examples,
                augment: args.augment,
                max_steps: args.steps,
                seed: args.seed,
                optimizer: args.optimizer,
            },
        }
    }
}

async fn run(config: RunConfig) -> anyhow::Result<()> {
    let token = CancellationToken::new();

    let cancel = token.clone();
    tokio::spawn(async move {
        if signal::ctrl_c().await.is_ok() {
            info!("received SIGINT, stopping after the current step");
            cancel.cancel();
        }
    });

    task::spawn_blocking(move || driver::run(&config, &token))
        .await
        .context("training task panicked")??;

    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    env_logger::init();
    let args = Args::parse();

    match run(args.into()).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e}");
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn args_are_consistent() {
        Args::command().debug_assert();
    }

    #[test]
    fn samples_are_required() {
        assert!(Args::try_parse_from(["fewshot"]).is_err());

        let args = Args::try_parse_from(["fewshot", "--samples", "fonts"]).unwrap();
        let config = RunConfig::from(args);
        assert_eq!(config.model_path, PathBuf::from("model_out"));
        assert_eq!(config.validation, "aBcD94");
        assert_eq!(config.train.batch_size.get(), 64);
        assert_eq!(config.spec.knowledge_size, 16);
        assert_eq!(config.train.optimizer, OptimizerKind::Sgd);
    }
}
