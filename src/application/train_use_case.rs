// ============================================================
// Layer 2 — TrainUseCase
// ============================================================
// Orchestrates the full workflow in order:
//
//   Step 1: Discover (or generate) volume pairs   (Layer 4)
//   Step 2: Split train/validation                (Layer 4)
//   Step 3: Validate shape/stride preconditions   (Layer 5)
//   Step 4: Build datasets and loaders            (Layer 4)
//   Step 5: Build model and optimizer             (Layer 5)
//   Step 6: Wire observers                        (Layer 6)
//   Step 7: Run the training engine               (Layer 5)

use anyhow::{bail, Context, Result};
use burn::data::dataloader::DataLoaderBuilder;
use burn::optim::AdamConfig;
use burn::tensor::backend::Backend;
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::application::generate_use_case::{GenerateConfig, GenerateUseCase};
use crate::data::batcher::SegBatcher;
use crate::data::dataset::PairedVolumeDataset;
use crate::data::splitter::split_train_val;
use crate::data::transforms::{
    AddChannel, RandSpatialCrop, Resize, ScaleIntensity, TransformPipeline,
};
use crate::infra::checkpoint::{CheckpointManager, CheckpointObserver};
use crate::infra::metrics::MetricsLogger;
use crate::infra::stats::ConsoleStatsObserver;
use crate::infra::tensorboard::{ImageObserver, ScalarObserver, SummaryLogger};
use crate::infra::validation::ValidationObserver;
use crate::ml::engine::{EngineStatus, EvalEngine, TrainEngine};
use crate::ml::loss::{DiceLoss, MeanDice};
use crate::ml::model::VoxelUnetConfig;
use crate::ml::{CpuDevice, EvalBackend, TrainBackend};

// ─── Training Configuration ──────────────────────────────────────────────────
// All knobs for one run. Serialisable so it is written next to
// the checkpoints and a snapshot stays reconstructable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainConfig {
    pub data_dir: String,
    pub checkpoint_dir: String,
    pub log_dir: String,

    /// Pairs generated when the data dir holds none yet
    pub num_samples: usize,
    /// Cubic edge length of generated volumes
    pub vol_size: usize,
    /// Cubic edge length fed to the model: the training crop and
    /// the validation resize target
    pub roi_size: usize,

    pub batch_size: usize,
    pub epochs: usize,
    pub lr: f64,
    pub num_workers: usize,

    /// Fraction of pairs kept for training; the rest validate
    pub train_fraction: f64,
    /// Run validation every this many epochs
    pub val_interval: usize,

    pub checkpoint_every: usize,
    pub keep_checkpoints: usize,

    pub channels: Vec<usize>,
    pub strides: Vec<usize>,
    pub num_res_units: usize,

    pub seed: u64,
    pub log_every: usize,
}

impl Default for TrainConfig {
    fn default() -> Self {
        Self {
            data_dir: "data/volumes".to_string(),
            checkpoint_dir: "checkpoints".to_string(),
            log_dir: "runs/segmentation".to_string(),
            num_samples: 16,
            vol_size: 64,
            roi_size: 32,
            batch_size: 2,
            epochs: 10,
            lr: 1e-3,
            num_workers: 2,
            train_fraction: 0.8,
            val_interval: 2,
            checkpoint_every: 1,
            keep_checkpoints: 3,
            channels: vec![16, 32, 64, 128, 256],
            strides: vec![2, 2, 2, 2],
            num_res_units: 2,
            seed: 42,
            log_every: 1,
        }
    }
}

/// Scalar outcome of a run, for callers and tests.
#[derive(Debug, Clone)]
pub struct TrainSummary {
    pub status: EngineStatus,
    pub epochs_run: usize,
    pub iterations: usize,
    pub final_loss: f64,
}

// ─── TrainUseCase ─────────────────────────────────────────────────────────────

pub struct TrainUseCase {
    config: TrainConfig,
}

impl TrainUseCase {
    pub fn new(config: TrainConfig) -> Self {
        Self { config }
    }

    pub fn execute(&self) -> Result<TrainSummary> {
        let cfg = &self.config;
        let device = CpuDevice::default();
        TrainBackend::seed(cfg.seed);

        // ── Step 1: Discover or generate volume pairs ─────────────────────────
        let mut pairs = discover_pairs(Path::new(&cfg.data_dir))?;
        if pairs.is_empty() {
            tracing::info!(
                "No volumes in '{}', generating {} synthetic pairs",
                cfg.data_dir,
                cfg.num_samples
            );
            pairs = GenerateUseCase::new(GenerateConfig {
                out_dir: cfg.data_dir.clone(),
                num_samples: cfg.num_samples,
                vol_size: cfg.vol_size,
                seed: cfg.seed,
                ..Default::default()
            })
            .execute()?;
        }
        tracing::info!("Using {} volume pairs", pairs.len());

        // ── Step 2: Train/validation split ────────────────────────────────────
        let mut rng = StdRng::seed_from_u64(cfg.seed);
        let (train_pairs, val_pairs) = split_train_val(pairs, cfg.train_fraction, &mut rng);
        if train_pairs.is_empty() {
            bail!("training split is empty; add samples or raise train_fraction");
        }

        // ── Step 3: Shape/stride precondition ─────────────────────────────────
        // The crop and resize extents must survive the
        // encoder-decoder path; checked here so a bad pairing
        // fails before any volume is loaded.
        let model_cfg = VoxelUnetConfig::new(
            1,
            1,
            cfg.channels.clone(),
            cfg.strides.clone(),
            cfg.num_res_units,
        );
        model_cfg.validate()?;
        let roi = [cfg.roi_size, cfg.roi_size, cfg.roi_size];
        model_cfg.check_spatial_shape(roi)?;

        // ── Step 4: Datasets and loaders ──────────────────────────────────────
        let (train_images, train_labels): (Vec<_>, Vec<_>) = train_pairs.into_iter().unzip();
        let train_dataset = PairedVolumeDataset::from_files(
            &train_images,
            &train_labels,
            TransformPipeline::new(vec![Box::new(ScaleIntensity), Box::new(AddChannel)]),
            TransformPipeline::new(vec![Box::new(AddChannel)]),
            Some(RandSpatialCrop::new(roi)),
        )
        .context("building training dataset")?;

        let train_loader = DataLoaderBuilder::new(SegBatcher::<TrainBackend>::new(device.clone()))
            .batch_size(cfg.batch_size)
            .shuffle(cfg.seed)
            .num_workers(cfg.num_workers)
            .build(train_dataset);

        // ── Step 5: Model and optimizer ───────────────────────────────────────
        let model = model_cfg.init::<TrainBackend>(&device);
        let optim = AdamConfig::new().with_epsilon(1e-8).init();
        let mut engine = TrainEngine::new(model, optim, DiceLoss::new(), cfg.lr);

        // ── Step 6: Observers, in attach order ────────────────────────────────
        let summary_logger = SummaryLogger::new(Path::new(&cfg.log_dir))?;
        engine.attach(Box::new(ConsoleStatsObserver::new(cfg.log_every)));
        engine.attach(Box::new(ScalarObserver::new(summary_logger.clone())));

        if val_pairs.is_empty() {
            tracing::warn!("Validation split is empty; skipping validation wiring");
        } else {
            let (val_images, val_labels): (Vec<_>, Vec<_>) = val_pairs.into_iter().unzip();
            let val_dataset = PairedVolumeDataset::from_files(
                &val_images,
                &val_labels,
                TransformPipeline::new(vec![
                    Box::new(ScaleIntensity),
                    Box::new(AddChannel),
                    Box::new(Resize::new(roi)),
                ]),
                TransformPipeline::new(vec![Box::new(AddChannel), Box::new(Resize::new(roi))]),
                None,
            )
            .context("building validation dataset")?;

            let val_loader =
                DataLoaderBuilder::new(SegBatcher::<EvalBackend>::new(device.clone()))
                    .batch_size(cfg.batch_size)
                    .num_workers(cfg.num_workers)
                    .build(val_dataset);

            let mut eval_engine = EvalEngine::new(MeanDice::new());
            eval_engine.attach(Box::new(ConsoleStatsObserver::new(cfg.log_every)));
            eval_engine.attach(Box::new(ScalarObserver::new(summary_logger.clone())));
            eval_engine.attach(Box::new(ImageObserver::new(summary_logger.clone(), 4)));

            engine.attach(Box::new(ValidationObserver::<TrainBackend>::new(
                eval_engine,
                val_loader,
                cfg.val_interval,
                Some(MetricsLogger::new(&cfg.checkpoint_dir)?),
            )));
        }

        let ckpt_manager = CheckpointManager::new(&cfg.checkpoint_dir, cfg.keep_checkpoints)?;
        ckpt_manager.save_config(cfg)?;
        engine.attach(Box::new(CheckpointObserver::new(
            ckpt_manager,
            cfg.checkpoint_every,
        )));

        // ── Step 7: Run ───────────────────────────────────────────────────────
        let report = engine.run(&train_loader, cfg.epochs)?;
        summary_logger.flush();

        tracing::info!(
            "Run finished: {} epochs, {} iterations, final loss {:.4}",
            report.epochs_run,
            report.iterations,
            report.final_loss,
        );

        Ok(TrainSummary {
            status: report.status,
            epochs_run: report.epochs_run,
            iterations: report.iterations,
            final_loss: report.final_loss,
        })
    }
}

// ─── Pair discovery ───────────────────────────────────────────────────────────

/// Collect `img_*`/`seg_*` volume files and pair them by sorted
/// order. Lexicographic sorting pairs unpadded indices correctly
/// only below 100 samples; the naming scheme inherits that limit.
fn discover_pairs(dir: &Path) -> Result<Vec<(PathBuf, PathBuf)>> {
    if !dir.exists() {
        return Ok(Vec::new());
    }

    let mut images = Vec::new();
    let mut labels = Vec::new();
    for entry in std::fs::read_dir(dir)
        .with_context(|| format!("cannot read data dir '{}'", dir.display()))?
    {
        let path = entry?.path();
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        if !name.ends_with(".nii") && !name.ends_with(".nii.gz") {
            continue;
        }
        if name.starts_with("img_") {
            images.push(path);
        } else if name.starts_with("seg_") {
            labels.push(path);
        }
    }

    images.sort();
    labels.sort();
    if images.len() != labels.len() {
        bail!(
            "unpaired volumes in '{}': {} images vs {} labels",
            dir.display(),
            images.len(),
            labels.len()
        );
    }

    Ok(images.into_iter().zip(labels).collect())
}
