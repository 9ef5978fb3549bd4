// ============================================================
// Layer 4 — Segmentation Batcher
// ============================================================
// Implements burn's Batcher trait to convert a Vec<SegSample>
// into backend tensors of shape [batch, channels, x, y, z].
//
// All samples in a batch carry the same shape: the train path
// crops to a fixed size and the validation path resizes to a
// fixed size, and the dataset enforces that before any loader
// runs. Stacking is therefore a flatten + reshape, with the
// voxel values copied unaltered.
//
// Reference: Burn Book §4 (Batcher)

use burn::data::dataloader::batcher::Batcher;
use burn::prelude::*;

use crate::data::dataset::SegSample;

/// A batch of image/label tensor pairs on the target device.
#[derive(Debug, Clone)]
pub struct SegBatch<B: Backend> {
    /// Input intensities — shape [batch, channels, x, y, z]
    pub images: Tensor<B, 5>,

    /// Target masks — same shape as `images`
    pub labels: Tensor<B, 5>,
}

/// Holds the device so tensors land where the engine runs.
#[derive(Clone, Debug)]
pub struct SegBatcher<B: Backend> {
    device: B::Device,
}

impl<B: Backend> SegBatcher<B> {
    pub fn new(device: B::Device) -> Self {
        Self { device }
    }
}

impl<B: Backend> Batcher<SegSample, SegBatch<B>> for SegBatcher<B> {
    fn batch(&self, items: Vec<SegSample>) -> SegBatch<B> {
        let batch_size = items.len();
        let [c, x, y, z] = items[0].shape;

        let image_flat: Vec<f32> = items.iter().flat_map(|s| s.image.iter().copied()).collect();
        let label_flat: Vec<f32> = items.iter().flat_map(|s| s.label.iter().copied()).collect();

        let images = Tensor::<B, 1>::from_floats(image_flat.as_slice(), &self.device)
            .reshape([batch_size, c, x, y, z]);
        let labels = Tensor::<B, 1>::from_floats(label_flat.as_slice(), &self.device)
            .reshape([batch_size, c, x, y, z]);

        SegBatch { images, labels }
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;

    type B = burn::backend::NdArray;

    #[test]
    fn test_batch_stacks_along_leading_dim() {
        let sample = |fill: f32| SegSample {
            image: vec![fill; 8],
            label: vec![1.0 - fill; 8],
            shape: [1, 2, 2, 2],
        };
        let batcher = SegBatcher::<B>::new(Default::default());
        let batch = batcher.batch(vec![sample(0.25), sample(0.75)]);
        assert_eq!(batch.images.dims(), [2, 1, 2, 2, 2]);
        assert_eq!(batch.labels.dims(), [2, 1, 2, 2, 2]);

        let values: Vec<f32> = batch.images.into_data().to_vec().unwrap();
        assert!(values[..8].iter().all(|&v| v == 0.25));
        assert!(values[8..].iter().all(|&v| v == 0.75));
    }
}
