//! Integration tests for the simcse crate.
//!
//! These tests exercise cross-module interactions: encoder + loss + grouped
//! optimizer, the epoch-level training driver with checkpointing and resume,
//! and evaluation of a restored model. All use the NdArray backend, a tiny
//! randomly initialized backbone and synthetic token pairs.

use std::sync::Arc;

use burn::backend::ndarray::NdArray;
use burn::backend::Autodiff;
use burn::data::dataloader::batcher::Batcher;
use burn::module::AutodiffModule;
use burn::optim::GradientsParams;
use burn::prelude::*;
use rand::rngs::StdRng;
use rand::SeedableRng;
use tempfile::TempDir;

use pairs::{PairBatcher, PairDataset, PairLoader, TokenizedPair};
use simcse::model::backbone::BackboneConfig;
use simcse::model::encoder::SentenceEncoderConfig;
use simcse::model::pooling::PoolerType;
use simcse::training::loss::ContrastiveLossConfig;
use simcse::training::metrics::{
    JsonlMetricSink, MetricRecord, MetricsHistory, DIFF_POS, HP_METRIC, SIM_NEG, SIM_POS,
    TRAIN_LOSS,
};
use simcse::training::optim::grouped_adamw;
use simcse::training::step::{evaluation_step, training_step};
use simcse::training::trainer::{evaluate, load_encoder, train, CheckpointMeta, TrainingConfig};

type TestBackend = NdArray<f32>;
type TestAutodiffBackend = Autodiff<NdArray<f32>>;

const SEQ_LEN: usize = 8;

fn encoder_config(pooler: PoolerType) -> SentenceEncoderConfig {
    let backbone = BackboneConfig::new(64)
        .with_hidden_size(16)
        .with_num_layers(2)
        .with_num_heads(2)
        .with_intermediate_size(32)
        .with_max_position_embeddings(SEQ_LEN)
        .with_dropout(0.0);
    SentenceEncoderConfig::new(backbone)
        .with_pooler(pooler)
        .with_mlp_layers(vec![16])
        .with_boundary_token_ids(vec![1, 2])
}

/// `[1, w.., 2, 0..]` padded to `SEQ_LEN`.
fn encode(words: &[i64]) -> (Vec<i64>, Vec<i64>) {
    let mut ids = vec![1];
    ids.extend_from_slice(words);
    ids.push(2);
    let mut mask = vec![1; ids.len()];
    ids.resize(SEQ_LEN, 0);
    mask.resize(SEQ_LEN, 0);
    (ids, mask)
}

/// Pair `i` shares its first word with its target; label alternates.
fn synthetic_pairs(n: usize) -> Vec<TokenizedPair> {
    (0..n)
        .map(|i| {
            let i = i as i64;
            let anchor = encode(&[3 + i % 30, 40 + i % 7, 50 + i % 5]);
            let target = encode(&[3 + i % 30, 60 + i % 3]);
            TokenizedPair::new(
                pairs::TokenizedText {
                    input_ids: anchor.0,
                    attention_mask: anchor.1,
                },
                pairs::TokenizedText {
                    input_ids: target.0,
                    attention_mask: target.1,
                },
                (i % 2) as u8,
            )
        })
        .collect()
}

fn loaders(batch_size: usize) -> (PairLoader, PairLoader) {
    let all = PairDataset::new(synthetic_pairs(24));
    let train = Arc::new(PairDataset::new(synthetic_pairs(24)).positives_only());
    (
        PairLoader::new(train, batch_size, true),
        PairLoader::new(Arc::new(all), batch_size, false),
    )
}

#[test]
fn test_manual_steps_reduce_loss_on_fixed_batch() {
    let device = Default::default();
    let mut model = encoder_config(PoolerType::Avg)
        .with_input_mask_rate(0.0)
        .init::<TestAutodiffBackend>(&device)
        .unwrap();
    let loss_fn = ContrastiveLossConfig::new().init().unwrap();
    let mut optimizer = grouped_adamw::<TestAutodiffBackend, _>(&model, 0.01, Some(1.0));
    let batcher = PairBatcher::<TestAutodiffBackend>::new(device);
    let batch = batcher.batch(synthetic_pairs(8));

    let mut rng = StdRng::seed_from_u64(1);
    let mut history = MetricsHistory::new();
    let mut losses = Vec::new();
    for step in 0..15 {
        let out = training_step(&model, &loss_fn, &batch, &mut rng, &mut history, step);
        losses.push(out.loss_value);
        let grads = GradientsParams::from_grads(out.loss.backward(), &model);
        model = optimizer.step(1e-3, model, grads);
    }

    assert_eq!(history.series(TRAIN_LOSS).len(), 15);
    // Negatives are re-permuted every step, so compare window means.
    let first: f64 = losses[..3].iter().sum::<f64>() / 3.0;
    let last: f64 = losses[12..].iter().sum::<f64>() / 3.0;
    assert!(
        last < first,
        "loss should decrease on a fixed batch: first={first}, last={last}"
    );
}

#[test]
fn test_train_writes_checkpoints_and_validation_metrics() {
    let tmp = TempDir::new().unwrap();
    let device = Default::default();
    let (train_loader, val_loader) = loaders(4);
    assert_eq!(train_loader.num_batches(), 3);

    let config = TrainingConfig::new()
        .with_epochs(2)
        .with_learning_rate(1e-3)
        .with_log_interval(2)
        .with_checkpoint_interval(2)
        .with_checkpoint_dir(tmp.path().join("ckpt").display().to_string());
    let model = encoder_config(PoolerType::Cls)
        .init::<TestAutodiffBackend>(&device)
        .unwrap();

    let metrics_path = tmp.path().join("metrics.jsonl");
    let mut sink = JsonlMetricSink::create(&metrics_path).unwrap();
    let mut steps_seen = Vec::new();
    let output = train(
        &config,
        model,
        &train_loader,
        Some(&val_loader),
        &device,
        &mut sink,
        None,
        &mut |step, _loss| steps_seen.push(step),
    )
    .unwrap();
    sink.flush().unwrap();

    assert_eq!(output.steps, 6);
    assert_eq!(steps_seen, vec![1, 2, 3, 4, 5, 6]);
    assert_eq!(output.validation.len(), 2);
    for m in &output.validation {
        assert!(m.sim_pos.is_finite() && m.sim_neg.is_finite());
        assert!((m.hp_metric - (m.sim_pos - m.sim_neg)).abs() < 1e-9);
    }

    let ckpt = tmp.path().join("ckpt");
    for dir in ["step_2", "step_4", "step_6", "final"] {
        assert!(ckpt.join(dir).join("model.mpk").exists(), "{dir}/model.mpk missing");
        assert!(ckpt.join(dir).join("optimizer_decay.mpk").exists());
        assert!(ckpt.join(dir).join("meta.json").exists());
    }
    let meta: CheckpointMeta =
        serde_json::from_reader(std::fs::File::open(ckpt.join("step_4/meta.json")).unwrap()).unwrap();
    assert_eq!(meta.step, 4);
    assert_eq!(meta.epoch, 1);
    assert_eq!(meta.batch_in_epoch, 1);

    let records: Vec<MetricRecord> = std::fs::read_to_string(&metrics_path)
        .unwrap()
        .lines()
        .map(|l| serde_json::from_str(l).unwrap())
        .collect();
    assert_eq!(records.iter().filter(|r| r.name == TRAIN_LOSS).count(), 6);
    assert_eq!(records.iter().filter(|r| r.name == HP_METRIC).count(), 2);
}

#[test]
fn test_resume_continues_from_step() {
    let tmp = TempDir::new().unwrap();
    let device = Default::default();
    let (train_loader, _) = loaders(4);
    let config = TrainingConfig::new()
        .with_epochs(2)
        .with_checkpoint_interval(2)
        .with_checkpoint_dir(tmp.path().display().to_string());

    let model = encoder_config(PoolerType::Avg)
        .init::<TestAutodiffBackend>(&device)
        .unwrap();
    let mut history = MetricsHistory::new();
    train(&config, model, &train_loader, None, &device, &mut history, None, &mut |_, _| {}).unwrap();

    let fresh = encoder_config(PoolerType::Avg)
        .init::<TestAutodiffBackend>(&device)
        .unwrap();
    let mut resumed_history = MetricsHistory::new();
    let output = train(
        &config,
        fresh,
        &train_loader,
        None,
        &device,
        &mut resumed_history,
        Some(4),
        &mut |_, _| {},
    )
    .unwrap();

    // Four steps cover epoch 0 and the first batch of epoch 1; two batches remain.
    assert_eq!(output.steps, 6);
    let resumed_steps: Vec<usize> = resumed_history
        .series(TRAIN_LOSS)
        .into_iter()
        .map(|(s, _)| s)
        .collect();
    assert_eq!(resumed_steps, vec![4, 5]);
}

#[test]
fn test_restored_model_matches_trained_model() {
    let tmp = TempDir::new().unwrap();
    let device = Default::default();
    let (train_loader, val_loader) = loaders(4);
    let config = TrainingConfig::new().with_checkpoint_dir(tmp.path().display().to_string());
    let encoder = encoder_config(PoolerType::AvgFirstLast);

    let model = encoder.init::<TestAutodiffBackend>(&device).unwrap();
    let mut history = MetricsHistory::new();
    let output = train(&config, model, &train_loader, None, &device, &mut history, None, &mut |_, _| {}).unwrap();

    let restored = load_encoder::<TestBackend>(&tmp.path().join("final/model.mpk"), &encoder, &device).unwrap();
    let trained = output.model.valid();

    let mut a = MetricsHistory::new();
    let mut b = MetricsHistory::new();
    let ma = evaluate(&trained, 0.05, &val_loader, &device, &mut a, 0).unwrap();
    let mb = evaluate(&restored, 0.05, &val_loader, &device, &mut b, 0).unwrap();
    assert!((ma.sim_pos - mb.sim_pos).abs() < 1e-4);
    assert!((ma.diff_pos - mb.diff_pos).abs() < 1e-4);
    assert_eq!(a.last(SIM_POS), Some(ma.sim_pos));
    assert!(b.last(SIM_NEG).is_some());
}

#[test]
fn test_evaluation_separates_labels_per_batch() {
    let device = Default::default();
    let model = encoder_config(PoolerType::Avg)
        .init::<TestBackend>(&device)
        .unwrap();
    let batcher = PairBatcher::<TestBackend>::new(device);

    // Positive rows have identical anchor and target, negatives do not.
    let mut items = synthetic_pairs(4);
    for item in items.iter_mut().filter(|p| p.label == 1) {
        item.target_input_ids = item.anchor_input_ids.clone();
        item.target_attention_mask = item.anchor_attention_mask.clone();
    }
    let batch = batcher.batch(items);

    let mut history = MetricsHistory::new();
    let m = evaluation_step(&model, 0.05, &batch, &mut history, 0);
    assert!(m.diff_pos < 1e-4);
    assert!(m.diff_neg > m.diff_pos);
    assert!(m.sim_pos > m.sim_neg);
    assert!(m.hp_metric > 0.0);
    assert_eq!(history.last(DIFF_POS), Some(m.diff_pos));
}

#[test]
fn test_too_small_training_split_is_error() {
    let tmp = TempDir::new().unwrap();
    let device = Default::default();
    let loader = PairLoader::new(Arc::new(PairDataset::new(synthetic_pairs(3))), 4, false);
    let config = TrainingConfig::new().with_checkpoint_dir(tmp.path().display().to_string());
    let model = encoder_config(PoolerType::Avg)
        .init::<TestAutodiffBackend>(&device)
        .unwrap();
    let mut history = MetricsHistory::new();
    let err = train(&config, model, &loader, None, &device, &mut history, None, &mut |_, _| {})
        .err()
        .unwrap();
    assert!(err.to_string().contains("fewer than one batch"));
}
