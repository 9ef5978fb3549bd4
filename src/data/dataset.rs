// ============================================================
// Layer 4 — Paired Volume Dataset
// ============================================================
// Pairs image and label volumes and turns them into transformed
// samples behind burn's Dataset trait, so the DataLoader can
// call get(index) and len() on it.
//
// Volumes are read through the Volume Store once, at
// construction: an unreadable file fails the build step, and
// every structural invariant (equal list lengths, matching
// image/label shapes, crop fitting inside each volume) is
// checked before a loader ever starts iterating. get() then
// only re-applies in-memory transforms, so the random crop draws
// a fresh offset on every access.

use anyhow::{bail, Context, Result};
use burn::data::dataset::Dataset;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::data::store;
use crate::data::transforms::{RandSpatialCrop, TransformPipeline};
use crate::domain::volume::Volume;

/// One transformed sample, ready for batching.
/// Data is channel-first, flattened in row-major order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SegSample {
    pub image: Vec<f32>,
    pub label: Vec<f32>,
    /// [channels, x, y, z] of both tensors
    pub shape: [usize; 4],
}

pub struct PairedVolumeDataset {
    pairs: Vec<(Volume, Volume)>,
    image_transforms: TransformPipeline,
    label_transforms: TransformPipeline,
    /// When set, image and label are cropped with one shared
    /// offset after their pipelines ran. Keeping the offset
    /// shared is what keeps the pair spatially aligned.
    paired_crop: Option<RandSpatialCrop>,
}

impl PairedVolumeDataset {
    /// Load every pair through the Volume Store and validate the
    /// dataset invariants. Construction is the failure point for
    /// mismatched lists, unreadable files, and impossible crops.
    pub fn from_files(
        image_paths: &[PathBuf],
        label_paths: &[PathBuf],
        image_transforms: TransformPipeline,
        label_transforms: TransformPipeline,
        paired_crop: Option<RandSpatialCrop>,
    ) -> Result<Self> {
        if image_paths.len() != label_paths.len() {
            bail!(
                "image/label list length mismatch: {} images, {} labels",
                image_paths.len(),
                label_paths.len()
            );
        }

        let mut pairs = Vec::with_capacity(image_paths.len());
        for (img_path, lbl_path) in image_paths.iter().zip(label_paths) {
            let image = store::load(img_path)
                .with_context(|| format!("loading image '{}'", img_path.display()))?;
            let label = store::load(lbl_path)
                .with_context(|| format!("loading label '{}'", lbl_path.display()))?;
            pairs.push((image, label));
        }

        Self::from_volumes(pairs, image_transforms, label_transforms, paired_crop)
    }

    /// Build from volumes already in memory. Used directly by the
    /// tests and by `from_files` after loading.
    pub fn from_volumes(
        pairs: Vec<(Volume, Volume)>,
        image_transforms: TransformPipeline,
        label_transforms: TransformPipeline,
        paired_crop: Option<RandSpatialCrop>,
    ) -> Result<Self> {
        for (index, (image, label)) in pairs.iter().enumerate() {
            if !image.same_shape(label) {
                bail!(
                    "sample {index}: image shape {:?} does not match label shape {:?}",
                    image.shape(),
                    label.shape()
                );
            }
            if let Some(crop) = &paired_crop {
                let shape = image.shape();
                if crop.size().iter().zip(shape.iter()).any(|(c, s)| c > s) {
                    bail!(
                        "sample {index}: crop size {:?} exceeds volume shape {:?}",
                        crop.size(),
                        shape
                    );
                }
            }
        }

        Ok(Self {
            pairs,
            image_transforms,
            label_transforms,
            paired_crop,
        })
    }

    pub fn sample_count(&self) -> usize {
        self.pairs.len()
    }

    /// Apply both pipelines and, when configured, the shared-
    /// offset crop binding the pair's randomness together.
    fn transform_pair(&self, index: usize) -> Result<SegSample> {
        let (image, label) = &self.pairs[index];

        let mut image = self.image_transforms.apply(image.data.clone().into_dyn())?;
        let mut label = self.label_transforms.apply(label.data.clone().into_dyn())?;

        if let Some(crop) = &self.paired_crop {
            let spatial = spatial_of(&image)?;
            let offset = crop.sample_offset(spatial, &mut rand::thread_rng())?;
            image = crop.crop_at(&image, offset)?;
            label = crop.crop_at(&label, offset)?;
        }

        if image.shape() != label.shape() {
            bail!(
                "sample {index}: transformed image shape {:?} diverged from label shape {:?}",
                image.shape(),
                label.shape()
            );
        }
        if image.ndim() != 4 {
            bail!(
                "sample {index}: expected channel-first rank-4 output, got rank {}",
                image.ndim()
            );
        }

        let s = image.shape();
        let shape = [s[0], s[1], s[2], s[3]];
        Ok(SegSample {
            image: image.iter().cloned().collect(),
            label: label.iter().cloned().collect(),
            shape,
        })
    }
}

fn spatial_of(array: &ndarray::ArrayD<f32>) -> Result<[usize; 3]> {
    let shape = array.shape();
    match shape.len() {
        3 => Ok([shape[0], shape[1], shape[2]]),
        4 => Ok([shape[1], shape[2], shape[3]]),
        rank => bail!("expected rank-3 or rank-4 array, got rank {rank}"),
    }
}

impl Dataset<SegSample> for PairedVolumeDataset {
    fn get(&self, index: usize) -> Option<SegSample> {
        if index >= self.pairs.len() {
            return None;
        }
        match self.transform_pair(index) {
            Ok(sample) => Some(sample),
            // Transform failures at this point mean a construction
            // check was bypassed; surface loudly, then starve the
            // loader rather than fabricating data.
            Err(e) => {
                tracing::error!("sample {index} failed to transform: {e:#}");
                None
            }
        }
    }

    fn len(&self) -> usize {
        self.pairs.len()
    }
}
