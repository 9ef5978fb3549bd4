// ============================================================
// Layer 6 — Checkpoint Manager
// ============================================================
// Saves model weights and optimizer state with burn's
// CompactRecorder and keeps only the most recent snapshots.
//
// File naming convention:
//   checkpoints/
//     model_epoch_3.mpk.gz   ← model weights after epoch 3
//     optim_epoch_3.mpk.gz   ← optimizer state after epoch 3
//     latest_epoch.json      ← number of the newest snapshot
//     train_config.json      ← run configuration
//
// Retention is bounded: after each save, snapshots older than
// the newest K are deleted, oldest first. A snapshot from a
// failed epoch may be partially written and is not trusted.

use anyhow::{Context, Result};
use burn::optim::Optimizer;
use burn::prelude::*;
use burn::record::{CompactRecorder, Recorder};
use burn::tensor::backend::AutodiffBackend;
use std::fs;
use std::path::PathBuf;

use crate::ml::engine::{RunContext, TrainObserver};
use crate::ml::model::VoxelUnet;

const MODEL_PREFIX: &str = "model_epoch_";
const OPTIM_PREFIX: &str = "optim_epoch_";

/// Owns the checkpoint directory and the retention policy.
pub struct CheckpointManager {
    dir: PathBuf,
    keep_last: usize,
}

impl CheckpointManager {
    /// Create the directory if it is absent. `keep_last` bounds
    /// how many epoch snapshots survive pruning (minimum 1).
    pub fn new(dir: impl Into<PathBuf>, keep_last: usize) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)
            .with_context(|| format!("cannot create checkpoint dir '{}'", dir.display()))?;
        Ok(Self {
            dir,
            keep_last: keep_last.max(1),
        })
    }

    /// Serialise model weights and optimizer state for `epoch`,
    /// update the latest-epoch pointer, then prune.
    pub fn save_epoch<B, O>(&self, model: &VoxelUnet<B>, optim: &O, epoch: usize) -> Result<()>
    where
        B: AutodiffBackend,
        O: Optimizer<VoxelUnet<B>, B>,
    {
        let recorder = CompactRecorder::new();

        let model_path = self.dir.join(format!("{MODEL_PREFIX}{epoch}"));
        recorder
            .record(model.clone().into_record(), model_path.clone())
            .with_context(|| format!("cannot write checkpoint '{}'", model_path.display()))?;

        let optim_path = self.dir.join(format!("{OPTIM_PREFIX}{epoch}"));
        recorder
            .record(optim.to_record(), optim_path.clone())
            .with_context(|| format!("cannot write optimizer state '{}'", optim_path.display()))?;

        let latest = self.dir.join("latest_epoch.json");
        fs::write(&latest, serde_json::to_string(&epoch)?)
            .with_context(|| "cannot write latest_epoch.json")?;

        self.prune()?;
        tracing::debug!("Saved checkpoint for epoch {epoch}");
        Ok(())
    }

    /// Restore model weights from the newest snapshot.
    pub fn load_latest_model<B: Backend>(
        &self,
        model: VoxelUnet<B>,
        device: &B::Device,
    ) -> Result<VoxelUnet<B>> {
        let epoch = self.latest_epoch()?;
        let path = self.dir.join(format!("{MODEL_PREFIX}{epoch}"));

        let record = CompactRecorder::new()
            .load(path.clone(), device)
            .with_context(|| format!("cannot load checkpoint '{}'", path.display()))?;

        tracing::info!("Loaded checkpoint from epoch {epoch}");
        Ok(model.load_record(record))
    }

    /// Persist the run configuration next to the snapshots so a
    /// checkpoint can be rebuilt into the same architecture.
    pub fn save_config<C: serde::Serialize>(&self, config: &C) -> Result<()> {
        let path = self.dir.join("train_config.json");
        fs::write(&path, serde_json::to_string_pretty(config)?)
            .with_context(|| format!("cannot write config to '{}'", path.display()))?;
        Ok(())
    }

    fn latest_epoch(&self) -> Result<usize> {
        let path = self.dir.join("latest_epoch.json");
        let raw = fs::read_to_string(&path)
            .with_context(|| "cannot find latest_epoch.json; has training run yet?")?;
        Ok(serde_json::from_str(&raw)?)
    }

    /// List the epochs that still have a model snapshot on disk,
    /// ascending.
    pub fn stored_epochs(&self) -> Result<Vec<usize>> {
        let mut epochs = Vec::new();
        for entry in fs::read_dir(&self.dir)
            .with_context(|| format!("cannot read checkpoint dir '{}'", self.dir.display()))?
        {
            let name = entry?.file_name();
            let name = name.to_string_lossy();
            if let Some(rest) = name.strip_prefix(MODEL_PREFIX) {
                if let Some(number) = rest.split('.').next() {
                    if let Ok(epoch) = number.parse::<usize>() {
                        epochs.push(epoch);
                    }
                }
            }
        }
        epochs.sort_unstable();
        epochs.dedup();
        Ok(epochs)
    }

    /// Delete every snapshot older than the newest `keep_last`.
    fn prune(&self) -> Result<()> {
        let epochs = self.stored_epochs()?;
        if epochs.len() <= self.keep_last {
            return Ok(());
        }

        for &epoch in &epochs[..epochs.len() - self.keep_last] {
            for prefix in [MODEL_PREFIX, OPTIM_PREFIX] {
                let path = self.dir.join(format!("{prefix}{epoch}.mpk.gz"));
                if path.exists() {
                    fs::remove_file(&path)
                        .with_context(|| format!("cannot evict '{}'", path.display()))?;
                }
            }
            tracing::debug!("Evicted checkpoint for epoch {epoch}");
        }
        Ok(())
    }
}

// ─── CheckpointObserver ───────────────────────────────────────────────────────

/// Writes a snapshot every `every_epochs` epochs (and always on
/// the final epoch) from the training engine's epoch event.
pub struct CheckpointObserver {
    manager: CheckpointManager,
    every_epochs: usize,
}

impl CheckpointObserver {
    pub fn new(manager: CheckpointManager, every_epochs: usize) -> Self {
        Self {
            manager,
            every_epochs: every_epochs.max(1),
        }
    }
}

impl<B, O> TrainObserver<B, O> for CheckpointObserver
where
    B: AutodiffBackend,
    O: Optimizer<VoxelUnet<B>, B>,
{
    fn epoch_completed(
        &mut self,
        ctx: &RunContext,
        model: &VoxelUnet<B>,
        optim: &O,
    ) -> Result<()> {
        if ctx.epoch % self.every_epochs == 0 || ctx.epoch == ctx.max_epochs {
            self.manager.save_epoch(model, optim, ctx.epoch)?;
        }
        Ok(())
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use crate::ml::model::VoxelUnetConfig;
    use burn::optim::AdamConfig;

    type TB = burn::backend::Autodiff<burn::backend::NdArray>;

    fn temp_dir(tag: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("voxelseg_ckpt_{tag}_{}", std::process::id()));
        std::fs::remove_dir_all(&dir).ok();
        dir
    }

    fn small_model(device: &crate::ml::CpuDevice) -> VoxelUnet<TB> {
        VoxelUnetConfig::new(1, 1, vec![2, 4], vec![2], 1).init(device)
    }

    #[test]
    fn test_retention_keeps_most_recent_k() {
        let dir = temp_dir("retention");
        let manager = CheckpointManager::new(&dir, 2).unwrap();

        let device = Default::default();
        let model = small_model(&device);
        let mut optim = AdamConfig::new().init();
        // Exercise the optimizer once so its state is non-trivial
        let input = burn::tensor::Tensor::<TB, 5>::ones([1, 1, 8, 8, 8], &device);
        let loss = crate::ml::loss::DiceLoss::new().forward(model.forward(input.clone()), input);
        let grads = burn::optim::GradientsParams::from_grads(loss.backward(), &model);
        let model = optim.step(1e-3, model, grads);

        for epoch in 1..=5 {
            manager.save_epoch(&model, &optim, epoch).unwrap();
        }

        assert_eq!(manager.stored_epochs().unwrap(), vec![4, 5]);
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_saved_model_loads_back() {
        let dir = temp_dir("reload");
        let manager = CheckpointManager::new(&dir, 3).unwrap();

        let device = Default::default();
        let model = small_model(&device);
        let optim = AdamConfig::new().init::<TB, VoxelUnet<TB>>();
        manager.save_epoch(&model, &optim, 1).unwrap();

        let restored = manager
            .load_latest_model::<TB>(small_model(&device), &device)
            .unwrap();

        // Same weights: identical output on identical input
        let input = burn::tensor::Tensor::<TB, 5>::ones([1, 1, 8, 8, 8], &device);
        let a: Vec<f32> = model.forward(input.clone()).into_data().to_vec().unwrap();
        let b: Vec<f32> = restored.forward(input).into_data().to_vec().unwrap();
        assert_eq!(a, b);
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_missing_checkpoint_is_an_error() {
        let dir = temp_dir("missing");
        let manager = CheckpointManager::new(&dir, 1).unwrap();
        let device = Default::default();
        assert!(manager
            .load_latest_model::<TB>(small_model(&device), &device)
            .is_err());
        std::fs::remove_dir_all(&dir).ok();
    }
}
