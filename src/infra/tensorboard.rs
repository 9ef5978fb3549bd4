// ============================================================
// Layer 6 — TensorBoard Observers
// ============================================================
// Structured event-file logging for later visualisation. One
// SummaryWriter is shared behind a mutex so the scalar observer
// on the training engine and the image observer on the
// evaluation engine write into the same run directory.
//
// The image observer renders the first validation batch of each
// pass as a row of 2D slices along the z axis: input, label and
// thresholded prediction side by side per slice.

use anyhow::Result;
use burn::optim::Optimizer;
use burn::prelude::*;
use burn::tensor::activation::sigmoid;
use burn::tensor::backend::AutodiffBackend;
use std::path::Path;
use std::sync::{Arc, Mutex};
use tensorboard_rs::summary_writer::SummaryWriter;

use crate::data::batcher::SegBatch;
use crate::ml::engine::{EvalObserver, RunContext, TrainObserver};
use crate::ml::model::VoxelUnet;

/// Shared handle over one event-file writer.
#[derive(Clone)]
pub struct SummaryLogger {
    writer: Arc<Mutex<SummaryWriter>>,
}

impl SummaryLogger {
    pub fn new(log_dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(log_dir)?;
        Ok(Self {
            writer: Arc::new(Mutex::new(SummaryWriter::new(log_dir))),
        })
    }

    fn add_scalar(&self, tag: &str, value: f32, step: usize) {
        if let Ok(mut writer) = self.writer.lock() {
            writer.add_scalar(tag, value, step);
        }
    }

    fn add_image(&self, tag: &str, data: &Vec<u8>, dims: &Vec<usize>, step: usize) {
        if let Ok(mut writer) = self.writer.lock() {
            writer.add_image(tag, data, dims, step);
        }
    }

    pub fn flush(&self) {
        if let Ok(mut writer) = self.writer.lock() {
            writer.flush();
        }
    }
}

// ─── Scalar observer ──────────────────────────────────────────────────────────

/// Writes the training loss per iteration and the validation
/// mean Dice per pass.
pub struct ScalarObserver {
    logger: SummaryLogger,
}

impl ScalarObserver {
    pub fn new(logger: SummaryLogger) -> Self {
        Self { logger }
    }
}

impl<B, O> TrainObserver<B, O> for ScalarObserver
where
    B: AutodiffBackend,
    O: Optimizer<VoxelUnet<B>, B>,
{
    fn iteration_completed(&mut self, ctx: &RunContext, _model: &VoxelUnet<B>) -> Result<()> {
        self.logger
            .add_scalar("train/dice_loss", ctx.last_loss as f32, ctx.iteration);
        Ok(())
    }

    fn epoch_completed(
        &mut self,
        ctx: &RunContext,
        _model: &VoxelUnet<B>,
        _optim: &O,
    ) -> Result<()> {
        self.logger
            .add_scalar("train/epoch_loss", ctx.epoch_loss_mean() as f32, ctx.epoch);
        Ok(())
    }
}

impl<B: Backend> EvalObserver<B> for ScalarObserver {
    fn epoch_completed(&mut self, ctx: &RunContext) -> Result<()> {
        if let Some(metric) = ctx.metric {
            self.logger
                .add_scalar("val/mean_dice", metric as f32, ctx.display_epoch());
        }
        Ok(())
    }
}

// ─── Image observer ───────────────────────────────────────────────────────────

/// Renders input/label/prediction slices of the first batch of
/// each validation pass.
pub struct ImageObserver {
    logger: SummaryLogger,
    /// Number of evenly spaced z slices to render
    max_slices: usize,
}

impl ImageObserver {
    pub fn new(logger: SummaryLogger, max_slices: usize) -> Self {
        Self {
            logger,
            max_slices: max_slices.max(1),
        }
    }
}

impl<B: Backend> EvalObserver<B> for ImageObserver {
    fn iteration_completed(
        &mut self,
        ctx: &RunContext,
        batch: &SegBatch<B>,
        logits: &Tensor<B, 5>,
    ) -> Result<()> {
        // One representative batch per pass is enough
        if ctx.epoch_iteration != 1 {
            return Ok(());
        }

        let dims = batch.images.dims();
        let (x, y, z) = (dims[2], dims[3], dims[4]);

        let image = plane_values(&batch.images)?;
        let label = plane_values(&batch.labels)?;
        let pred = plane_values(&sigmoid(logits.clone()).greater_elem(0.5).float())?;

        let step = ctx.display_epoch();
        let slice_count = self.max_slices.min(z);
        for slice in 0..slice_count {
            let zi = slice * z / slice_count;
            let panel = render_panel(&[&image, &label, &pred], x, y, z, zi);
            let panel_dims: Vec<usize> = vec![3, y, 3 * x];
            self.logger
                .add_image(&format!("val/slice_{slice}"), &panel, &panel_dims, step);
        }
        Ok(())
    }
}

/// First sample, first channel of a [b, c, x, y, z] tensor as a
/// host vector in x-major order.
fn plane_values<B: Backend>(tensor: &Tensor<B, 5>) -> Result<Vec<f32>> {
    let dims = tensor.dims();
    let voxels = dims[2] * dims[3] * dims[4];
    let values: Vec<f32> = tensor
        .clone()
        .slice([0..1, 0..1, 0..dims[2], 0..dims[3], 0..dims[4]])
        .into_data()
        .to_vec()
        .map_err(|e| anyhow::anyhow!("cannot read tensor data: {e:?}"))?;
    Ok(values[..voxels].to_vec())
}

/// Compose the z-slice `zi` of each panel side by side into one
/// CHW u8 image (grey replicated over three channels).
fn render_panel(panels: &[&Vec<f32>], x: usize, y: usize, z: usize, zi: usize) -> Vec<u8> {
    let width = panels.len() * x;
    let mut out = vec![0u8; 3 * y * width];

    for (p, values) in panels.iter().enumerate() {
        let min = values.iter().cloned().fold(f32::INFINITY, f32::min);
        let max = values.iter().cloned().fold(f32::NEG_INFINITY, f32::max);
        let range = (max - min).max(f32::EPSILON);

        for row in 0..y {
            for col in 0..x {
                // Tensor layout is [x, y, z] row-major
                let v = values[(col * y + row) * z + zi];
                let grey = (((v - min) / range) * 255.0) as u8;
                let px = row * width + p * x + col;
                for ch in 0..3 {
                    out[ch * y * width + px] = grey;
                }
            }
        }
    }
    out
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_panel_normalises_to_u8() {
        let values: Vec<f32> = (0..2 * 2 * 2).map(|v| v as f32).collect();
        let out = render_panel(&[&values], 2, 2, 2, 0);
        assert_eq!(out.len(), 3 * 2 * 2);
        assert!(out.iter().any(|&v| v == 0));
        assert!(out.iter().any(|&v| v > 200));
    }

    #[test]
    fn test_scalar_events_land_in_log_dir() {
        let dir = std::env::temp_dir().join(format!("voxelseg_tb_{}", std::process::id()));
        std::fs::remove_dir_all(&dir).ok();

        let logger = SummaryLogger::new(&dir).unwrap();
        logger.add_scalar("test/value", 1.0, 1);
        logger.flush();

        let entries: Vec<_> = std::fs::read_dir(&dir).unwrap().collect();
        assert!(!entries.is_empty());
        std::fs::remove_dir_all(&dir).ok();
    }
}
