// ============================================================
// Layer 6 — Console Stats Observer
// ============================================================
// Human-readable progress lines on the tracing stream. One
// instance can sit on the training engine (loss per iteration,
// summary per epoch) and another on the evaluation engine,
// where it reports the training engine's epoch taken from the
// run context rather than the evaluator's own counter, which
// restarts every pass.

use anyhow::Result;
use burn::optim::Optimizer;
use burn::prelude::*;
use burn::tensor::backend::AutodiffBackend;

use crate::data::batcher::SegBatch;
use crate::ml::engine::{EvalObserver, RunContext, TrainObserver};
use crate::ml::model::VoxelUnet;

/// Emits a line every `log_every` iterations plus one per epoch.
pub struct ConsoleStatsObserver {
    log_every: usize,
}

impl ConsoleStatsObserver {
    pub fn new(log_every: usize) -> Self {
        Self {
            log_every: log_every.max(1),
        }
    }
}

impl<B, O> TrainObserver<B, O> for ConsoleStatsObserver
where
    B: AutodiffBackend,
    O: Optimizer<VoxelUnet<B>, B>,
{
    fn iteration_completed(&mut self, ctx: &RunContext, _model: &VoxelUnet<B>) -> Result<()> {
        if ctx.iteration % self.log_every == 0 {
            tracing::info!(
                "epoch {:>3} iter {:>5} | loss={:.4}",
                ctx.epoch,
                ctx.iteration,
                ctx.last_loss,
            );
        }
        Ok(())
    }

    fn epoch_completed(
        &mut self,
        ctx: &RunContext,
        _model: &VoxelUnet<B>,
        _optim: &O,
    ) -> Result<()> {
        tracing::info!(
            "epoch {:>3}/{} finished | mean_loss={:.4}",
            ctx.epoch,
            ctx.max_epochs,
            ctx.epoch_loss_mean(),
        );
        Ok(())
    }
}

impl<B: Backend> EvalObserver<B> for ConsoleStatsObserver {
    fn iteration_completed(
        &mut self,
        ctx: &RunContext,
        _batch: &SegBatch<B>,
        _logits: &Tensor<B, 5>,
    ) -> Result<()> {
        tracing::debug!(
            "validation batch {:>3} | dice={:.4}",
            ctx.epoch_iteration,
            ctx.last_loss,
        );
        Ok(())
    }

    fn epoch_completed(&mut self, ctx: &RunContext) -> Result<()> {
        tracing::info!(
            "validation @ epoch {:>3} | mean_dice={:.4}",
            ctx.display_epoch(),
            ctx.metric.unwrap_or(f64::NAN),
        );
        Ok(())
    }
}
