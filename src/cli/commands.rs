// ============================================================
// Layer 1 — CLI Commands and Arguments
// ============================================================
// Defines the two subcommands, `generate` and `train`, and
// their flags. clap's derive macros generate the help text,
// parsing, and type conversion.

use clap::{Args, Subcommand};

use crate::application::generate_use_case::GenerateConfig;
use crate::application::train_use_case::TrainConfig;

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Write a synthetic volume dataset to disk
    Generate(GenerateArgs),

    /// Train the segmentation model end to end
    Train(TrainArgs),
}

/// Arguments for the `generate` subcommand.
#[derive(Args, Debug)]
pub struct GenerateArgs {
    /// Output directory for img_*/seg_* volume files
    #[arg(long, default_value = "data/volumes")]
    pub out_dir: String,

    /// Number of image/label pairs to write
    #[arg(long, default_value_t = 16)]
    pub num_samples: usize,

    /// Cubic edge length of every volume
    #[arg(long, default_value_t = 64)]
    pub vol_size: usize,

    /// Spheres placed per volume
    #[arg(long, default_value_t = 6)]
    pub num_objects: usize,

    /// Foreground label classes
    #[arg(long, default_value_t = 1)]
    pub num_classes: usize,

    /// Standard deviation of the additive image noise
    #[arg(long, default_value_t = 0.05)]
    pub noise_std: f32,

    /// RNG seed for reproducible datasets
    #[arg(long, default_value_t = 42)]
    pub seed: u64,
}

impl From<GenerateArgs> for GenerateConfig {
    fn from(a: GenerateArgs) -> Self {
        GenerateConfig {
            out_dir: a.out_dir,
            num_samples: a.num_samples,
            vol_size: a.vol_size,
            num_objects: a.num_objects,
            num_classes: a.num_classes,
            noise_std: a.noise_std,
            seed: a.seed,
        }
    }
}

/// Arguments for the `train` subcommand.
#[derive(Args, Debug)]
pub struct TrainArgs {
    /// Directory of img_*/seg_* volume pairs; filled with
    /// synthetic data when empty
    #[arg(long, default_value = "data/volumes")]
    pub data_dir: String,

    /// Directory for checkpoints and the metrics CSV
    #[arg(long, default_value = "checkpoints")]
    pub checkpoint_dir: String,

    /// Directory for TensorBoard event files
    #[arg(long, default_value = "runs/segmentation")]
    pub log_dir: String,

    /// Pairs to generate when the data dir is empty
    #[arg(long, default_value_t = 16)]
    pub num_samples: usize,

    /// Cubic edge length of generated volumes
    #[arg(long, default_value_t = 64)]
    pub vol_size: usize,

    /// Model input size: training crop and validation resize.
    /// Must be divisible by the product of the strides
    #[arg(long, default_value_t = 32)]
    pub roi_size: usize,

    /// Samples per optimizer step
    #[arg(long, default_value_t = 2)]
    pub batch_size: usize,

    /// Full passes over the training data
    #[arg(long, default_value_t = 10)]
    pub epochs: usize,

    /// Adam learning rate
    #[arg(long, default_value_t = 1e-3)]
    pub lr: f64,

    /// Loader worker threads
    #[arg(long, default_value_t = 2)]
    pub num_workers: usize,

    /// Fraction of pairs used for training (rest validate)
    #[arg(long, default_value_t = 0.8)]
    pub train_fraction: f64,

    /// Validate every N epochs
    #[arg(long, default_value_t = 2)]
    pub val_interval: usize,

    /// Checkpoint every N epochs
    #[arg(long, default_value_t = 1)]
    pub checkpoint_every: usize,

    /// How many checkpoint snapshots survive pruning
    #[arg(long, default_value_t = 3)]
    pub keep_checkpoints: usize,

    /// Residual units per resolution stage
    #[arg(long, default_value_t = 2)]
    pub num_res_units: usize,

    /// RNG seed for generation, splitting, and shuffling
    #[arg(long, default_value_t = 42)]
    pub seed: u64,

    /// Log a training line every N iterations
    #[arg(long, default_value_t = 1)]
    pub log_every: usize,
}

impl From<TrainArgs> for TrainConfig {
    fn from(a: TrainArgs) -> Self {
        TrainConfig {
            data_dir: a.data_dir,
            checkpoint_dir: a.checkpoint_dir,
            log_dir: a.log_dir,
            num_samples: a.num_samples,
            vol_size: a.vol_size,
            roi_size: a.roi_size,
            batch_size: a.batch_size,
            epochs: a.epochs,
            lr: a.lr,
            num_workers: a.num_workers,
            train_fraction: a.train_fraction,
            val_interval: a.val_interval,
            checkpoint_every: a.checkpoint_every,
            keep_checkpoints: a.keep_checkpoints,
            num_res_units: a.num_res_units,
            seed: a.seed,
            log_every: a.log_every,
            ..TrainConfig::default()
        }
    }
}
