mod common;

use std::num::NonZeroUsize;

use fewshot::{
    FewShotErr,
    catalog::read_samples,
    config::{RunConfig, generate_rng},
    driver,
    encoder::{Angle, Encoder},
    model::{Model, ModelSpec},
    pretrain::PretrainSamples,
    sampler::{Batch, BatchSampler},
    store,
    trainer::Trainer,
};
use ndarray::{Axis, concatenate};
use rand::{SeedableRng, rngs::StdRng};
use tempfile::tempdir;
use tokio_util::sync::CancellationToken;

use common::font_dump;

const SPEC: ModelSpec = ModelSpec {
    image_size: 54,
    knowledge_size: 16,
};

#[test]
fn fetch_builds_a_consistent_batch() {
    let dir = tempdir().unwrap();
    font_dump(dir.path(), "abc", 4);
    let samples = read_samples(dir.path()).unwrap();
    assert_eq!(samples.len(), 12);

    let encoder = Encoder::default();
    let sampler = BatchSampler::new(&samples, None, encoder).unwrap();

    let rng = StdRng::seed_from_u64(42);
    let draws = sampler.draw(&mut rng.clone(), 10);
    let batch = sampler.fetch(&mut rng.clone(), 10).unwrap();

    assert_eq!(batch.batch_size, 10);
    assert_eq!(batch.targets.len(), 10);
    assert!(batch.targets.iter().all(|&t| t == 0. || t == 1.));
    assert_eq!(batch.examples.dim(), (10, 54 * 54));
    assert_eq!(batch.queries.dim(), (10, 54 * 54));

    for (i, draw) in draws.iter().enumerate() {
        let example = &draw.examples[0];
        let same = draw.query.sample.label == example.sample.label;
        assert_eq!(same, batch.targets[i] == 1.);

        let encoded = encoder.encode(example.sample, example.angle).unwrap();
        assert_eq!(batch.examples.row(i).to_vec(), encoded);
        let encoded = encoder.encode(draw.query.sample, draw.query.angle).unwrap();
        assert_eq!(batch.queries.row(i).to_vec(), encoded);
    }
}

#[test]
fn several_examples_per_triple() {
    let dir = tempdir().unwrap();
    font_dump(dir.path(), "abc", 4);
    let samples = read_samples(dir.path()).unwrap();

    let sampler = BatchSampler::new(&samples, NonZeroUsize::new(3), Encoder::default())
        .unwrap()
        .with_augmentation(true);
    let mut rng = StdRng::seed_from_u64(1);
    let batch = sampler.fetch(&mut rng, 4).unwrap();

    assert_eq!(batch.examples.nrows(), 12);
    assert_eq!(batch.queries.nrows(), 4);

    let mut trainer = Trainer::new(Model::new(SPEC, &mut rng).unwrap());
    let cost = trainer.total_cost(&batch).unwrap();
    assert!(cost.is_finite() && cost > 0.);
}

#[test]
fn cost_is_invariant_to_duplicating_the_batch() {
    let dir = tempdir().unwrap();
    font_dump(dir.path(), "abcd", 3);
    let samples = read_samples(dir.path()).unwrap();

    let sampler = BatchSampler::new(&samples, NonZeroUsize::new(2), Encoder::default()).unwrap();
    let mut rng = StdRng::seed_from_u64(9);
    let batch = sampler.fetch(&mut rng, 6).unwrap();

    let doubled = Batch {
        examples: concatenate(Axis(0), &[batch.examples.view(), batch.examples.view()]).unwrap(),
        queries: concatenate(Axis(0), &[batch.queries.view(), batch.queries.view()]).unwrap(),
        targets: concatenate(Axis(0), &[batch.targets.view(), batch.targets.view()]).unwrap(),
        batch_size: 12,
        num_examples: 2,
    };

    let mut trainer = Trainer::new(Model::new(SPEC, &mut rng).unwrap());
    let single = trainer.total_cost(&batch).unwrap();
    let double = trainer.total_cost(&doubled).unwrap();

    assert!((single - double).abs() < 1e-5, "{single} vs {double}");
}

#[test]
fn deserialized_model_scores_identically() {
    let dir = tempdir().unwrap();
    font_dump(dir.path(), "ab", 3);
    let samples = read_samples(dir.path()).unwrap();

    let sampler = BatchSampler::new(&samples, None, Encoder::default()).unwrap();
    let mut rng = StdRng::seed_from_u64(5);
    let batch = sampler.fetch(&mut rng, 5).unwrap();

    let mut model = Model::new(SPEC, &mut rng).unwrap();
    let path = dir.path().join("model_out");
    store::save(&model, &path).unwrap();
    let mut loaded = store::load(&path).unwrap();

    let scores = |model: &mut Model| {
        model
            .apply(batch.examples.view(), batch.queries.view(), 1, 5)
            .unwrap()
    };
    assert_eq!(scores(&mut model), scores(&mut loaded));

    let probabilities = loaded
        .classify(batch.examples.view(), batch.queries.view(), 1)
        .unwrap();
    assert!(probabilities.iter().all(|p| (0. ..=1.).contains(p)));
}

#[test]
fn run_trains_and_saves() {
    let dir = tempdir().unwrap();
    let samples_dir = dir.path().join("fonts");
    font_dump(&samples_dir, "abcd", 2);

    let mut config = RunConfig::new(&samples_dir);
    config.model_path = dir.path().join("model_out");
    config.validation = "ab".into();
    config.spec = ModelSpec::new(54, 4);
    config.train.batch_size = NonZeroUsize::new(4).unwrap();
    config.train.max_steps = NonZeroUsize::new(2);
    config.train.seed = Some(0);

    let token = CancellationToken::new();
    driver::run(&config, &token).unwrap();
    let first = store::load(&config.model_path).unwrap();
    assert_eq!(first.spec(), config.spec);

    // the second run continues from the saved model
    driver::run(&config, &token).unwrap();
    let second = store::load(&config.model_path).unwrap();
    assert_ne!(first.parameters(), second.parameters());
}

#[test]
fn cancelled_run_still_saves() {
    let dir = tempdir().unwrap();
    let samples_dir = dir.path().join("fonts");
    // none of these labels is in the default validation set
    font_dump(&samples_dir, "xyz", 2);

    let mut config = RunConfig::new(&samples_dir);
    config.model_path = dir.path().join("model_out");
    config.spec = ModelSpec::new(54, 4);

    let token = CancellationToken::new();
    token.cancel();
    driver::run(&config, &token).unwrap();

    let saved = store::load(&config.model_path).unwrap();
    assert_eq!(saved.spec(), config.spec);
}

#[test]
fn pretrain_samples_pair_images_with_one_hot_targets() {
    let dir = tempdir().unwrap();
    font_dump(dir.path(), "aB9", 1);

    let samples = read_samples(dir.path()).unwrap();
    let set = PretrainSamples::new(&samples, Encoder::default());
    let encoder = Encoder::default();
    assert_eq!(set.len(), 3);

    for (i, sample) in samples.iter().enumerate() {
        let (input, target) = set.get_sample(i).unwrap();
        assert_eq!(input.len(), 54 * 54);
        assert_eq!(input, encoder.encode(sample, Angle::Deg0).unwrap());

        let hot = set.class_map().index(sample.label).unwrap();
        let mut expected = vec![0.; 3];
        expected[hot] = 1.;
        assert_eq!(target, expected);
    }

    // '9' < 'B' < 'a'
    let a = samples.iter().position(|s| s.label == 'a').unwrap();
    assert_eq!(set.get_sample(a).unwrap().1, vec![0., 0., 1.]);
}

#[test]
fn pretraining_warm_starts_both_towers() {
    let dir = tempdir().unwrap();
    let samples_dir = dir.path().join("fonts");
    font_dump(&samples_dir, "abc", 2);

    let samples = read_samples(&samples_dir).unwrap();
    let mut rng = generate_rng(Some(4));
    let mut model = Model::new(ModelSpec::new(54, 4), &mut rng).unwrap();
    let before = model.trunk().to_vec();

    let mut config = RunConfig::new(&samples_dir).train;
    config.batch_size = NonZeroUsize::new(4).unwrap();
    config.max_steps = NonZeroUsize::new(3);
    config.step_size = 0.01;

    let token = CancellationToken::new();
    let steps = driver::pretrain(&mut model, &samples, &config, &token, &mut rng).unwrap();
    assert_eq!(steps, 3);

    let layout = model.layout().clone();
    assert_ne!(model.trunk(), before.as_slice());
    assert_eq!(&model.parameters()[layout.query_tower], model.trunk());
}

#[test]
fn missing_samples_dir_fails() {
    let dir = tempdir().unwrap();
    let config = RunConfig::new(dir.path().join("nope"));

    let err = driver::run(&config, &CancellationToken::new()).unwrap_err();
    assert!(err.to_string().starts_with("read samples: "));
}

#[test]
fn single_training_class_fails_with_context() {
    let dir = tempdir().unwrap();
    let samples_dir = dir.path().join("fonts");
    // only 'b' stays out of the default validation set
    font_dump(&samples_dir, "abc", 2);

    let mut config = RunConfig::new(&samples_dir);
    config.model_path = dir.path().join("model_out");
    config.spec = ModelSpec::new(54, 4);

    let err = driver::run(&config, &CancellationToken::new()).unwrap_err();
    assert!(err.to_string().starts_with("train: "), "{err}");
    assert!(matches!(
        err.root(),
        FewShotErr::NotEnoughClasses { usable: 1, .. }
    ));
    assert!(!config.model_path.exists());
}
