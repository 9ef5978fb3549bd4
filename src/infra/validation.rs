// ============================================================
// Layer 6 — Validation Observer
// ============================================================
// Bridges the two engines: on a configurable epoch cadence it
// freezes the training model with `model.valid()` and hands it
// to the evaluation engine, which scores the validation loader
// on the inner (non-autodiff) backend. The training engine
// itself never learns that validation exists.
//
// The evaluator's observers see the training epoch through the
// run context's global epoch, and the per-epoch CSV row is
// written here because this is the one place that holds both
// the epoch's training loss and its validation score.

use anyhow::Result;
use burn::data::dataloader::DataLoader;
use burn::module::AutodiffModule;
use burn::optim::Optimizer;
use burn::tensor::backend::AutodiffBackend;
use std::sync::Arc;

use crate::data::batcher::SegBatch;
use crate::infra::metrics::{EpochMetrics, MetricsLogger};
use crate::ml::engine::{EvalEngine, RunContext, TrainObserver};
use crate::ml::model::VoxelUnet;

pub struct ValidationObserver<B: AutodiffBackend> {
    engine: EvalEngine<B::InnerBackend>,
    loader: Arc<dyn DataLoader<SegBatch<B::InnerBackend>>>,
    /// Run validation every this many training epochs
    interval: usize,
    metrics_logger: Option<MetricsLogger>,
    best_dice: f64,
}

impl<B: AutodiffBackend> ValidationObserver<B> {
    pub fn new(
        engine: EvalEngine<B::InnerBackend>,
        loader: Arc<dyn DataLoader<SegBatch<B::InnerBackend>>>,
        interval: usize,
        metrics_logger: Option<MetricsLogger>,
    ) -> Self {
        Self {
            engine,
            loader,
            interval: interval.max(1),
            metrics_logger,
            best_dice: f64::NEG_INFINITY,
        }
    }
}

impl<B, O> TrainObserver<B, O> for ValidationObserver<B>
where
    B: AutodiffBackend,
    O: Optimizer<VoxelUnet<B>, B>,
{
    fn epoch_completed(
        &mut self,
        ctx: &RunContext,
        model: &VoxelUnet<B>,
        _optim: &O,
    ) -> Result<()> {
        if ctx.epoch % self.interval != 0 {
            return Ok(());
        }

        let frozen = model.valid();
        let mean_dice = self.engine.run(&frozen, &self.loader, ctx.epoch)?;

        let row = EpochMetrics::new(ctx.epoch, ctx.epoch_loss_mean(), mean_dice);
        if row.is_improvement(self.best_dice) {
            self.best_dice = mean_dice;
            tracing::info!("New best mean dice {:.4} at epoch {}", mean_dice, ctx.epoch);
        }
        if let Some(logger) = &self.metrics_logger {
            logger.log(&row)?;
        }
        Ok(())
    }
}
