// ============================================================
// Layer 2 — GenerateUseCase
// ============================================================
// Writes a synthetic dataset to disk: N image/label pairs drawn
// by the generator and persisted through the volume store as
//   img_0.nii.gz / seg_0.nii.gz, img_1.nii.gz / seg_1.nii.gz, ...
//
// Pair correspondence is recovered later by lexicographically
// sorting the two listings, so the numeric suffixes of images
// and labels must line up.

use anyhow::{Context, Result};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::data::generator::{self, SyntheticVolumeConfig};
use crate::data::store;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerateConfig {
    pub out_dir: String,
    pub num_samples: usize,
    /// Cubic edge length of every generated volume
    pub vol_size: usize,
    pub num_objects: usize,
    pub num_classes: usize,
    pub noise_std: f32,
    pub seed: u64,
}

impl Default for GenerateConfig {
    fn default() -> Self {
        Self {
            out_dir: "data/volumes".to_string(),
            num_samples: 16,
            vol_size: 64,
            num_objects: 6,
            num_classes: 1,
            noise_std: 0.05,
            seed: 42,
        }
    }
}

pub struct GenerateUseCase {
    config: GenerateConfig,
}

impl GenerateUseCase {
    pub fn new(config: GenerateConfig) -> Self {
        Self { config }
    }

    /// Draw and persist every pair. Returns the written
    /// (image, label) path pairs in index order.
    pub fn execute(&self) -> Result<Vec<(PathBuf, PathBuf)>> {
        let cfg = &self.config;
        let out_dir = PathBuf::from(&cfg.out_dir);
        std::fs::create_dir_all(&out_dir)
            .with_context(|| format!("cannot create data dir '{}'", out_dir.display()))?;

        let vol_cfg = SyntheticVolumeConfig {
            shape: [cfg.vol_size, cfg.vol_size, cfg.vol_size],
            num_objects: cfg.num_objects,
            num_classes: cfg.num_classes,
            noise_std: cfg.noise_std,
            ..Default::default()
        };

        let mut rng = StdRng::seed_from_u64(cfg.seed);
        let mut written = Vec::with_capacity(cfg.num_samples);

        for index in 0..cfg.num_samples {
            let (image, label) = generator::generate_pair(&vol_cfg, &mut rng)?;

            let image_path = out_dir.join(format!("img_{index}.nii.gz"));
            let label_path = out_dir.join(format!("seg_{index}.nii.gz"));
            store::save(&image, &image_path)?;
            store::save(&label, &label_path)?;
            written.push((image_path, label_path));
        }

        tracing::info!(
            "Generated {} volume pairs in '{}'",
            written.len(),
            out_dir.display()
        );
        Ok(written)
    }
}
