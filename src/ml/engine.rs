// ============================================================
// Layer 5 — Training and Evaluation Engines
// ============================================================
// The training engine owns the forward/loss/backward/step cycle
// and nothing else: validation, checkpointing, and logging all
// live behind the observer traits below and are invoked through
// lifecycle events. Observers run synchronously, in attach
// order, before the next batch starts; an error from any of
// them fails the run and propagates to the caller. The engine
// performs no retries.
//
// Observers receive an explicit read-only RunContext carrying
// the calling engine's counters (and, for a delegate evaluation
// run, the training engine's epoch), so no observer needs to
// capture engine internals.

use anyhow::Result;
use burn::data::dataloader::DataLoader;
use burn::optim::{GradientsParams, Optimizer};
use burn::prelude::*;
use burn::tensor::backend::AutodiffBackend;
use std::sync::Arc;

use crate::data::batcher::SegBatch;
use crate::ml::loss::{DiceLoss, MeanDice};
use crate::ml::model::VoxelUnet;

// ─── Run state ────────────────────────────────────────────────────────────────

/// Lifecycle of a single engine run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineStatus {
    Idle,
    Running,
    Completed,
    Failed,
}

/// Read-only view of the engine's progress, handed to every
/// observer callback at event time.
#[derive(Debug, Clone)]
pub struct RunContext {
    /// Where the engine currently is in its lifecycle
    pub status: EngineStatus,

    /// 1-based epoch of the engine firing the event
    pub epoch: usize,
    pub max_epochs: usize,

    /// Iterations completed since the run started
    pub iteration: usize,

    /// Iterations completed within the current epoch
    pub epoch_iteration: usize,

    /// Most recent per-iteration value: the training loss, or
    /// the batch metric during an evaluation pass
    pub last_loss: f64,

    /// Accumulated metric for an evaluation pass, set before the
    /// evaluation epoch event fires
    pub metric: Option<f64>,

    /// Epoch counter of a delegating engine. An evaluation run
    /// triggered at training epoch N reports N here while its
    /// own `epoch` field restarts at 1 every pass.
    pub global_epoch: Option<usize>,

    loss_sum: f64,
}

impl RunContext {
    fn new(max_epochs: usize) -> Self {
        Self {
            status: EngineStatus::Idle,
            epoch: 0,
            max_epochs,
            iteration: 0,
            epoch_iteration: 0,
            last_loss: f64::NAN,
            metric: None,
            global_epoch: None,
            loss_sum: 0.0,
        }
    }

    fn begin_epoch(&mut self, epoch: usize) {
        self.epoch = epoch;
        self.epoch_iteration = 0;
        self.loss_sum = 0.0;
    }

    fn advance(&mut self, loss: f64) {
        self.iteration += 1;
        self.epoch_iteration += 1;
        self.last_loss = loss;
        self.loss_sum += loss;
    }

    /// Mean loss across the current epoch so far.
    pub fn epoch_loss_mean(&self) -> f64 {
        if self.epoch_iteration == 0 {
            return f64::NAN;
        }
        self.loss_sum / self.epoch_iteration as f64
    }

    /// The epoch number an observer should report: the delegate
    /// engine's epoch when present, this engine's otherwise.
    pub fn display_epoch(&self) -> usize {
        self.global_epoch.unwrap_or(self.epoch)
    }
}

// ─── Observer traits ──────────────────────────────────────────────────────────

/// Callback attached to the training engine. Both methods are
/// invoked synchronously on the engine's thread.
pub trait TrainObserver<B, O>
where
    B: AutodiffBackend,
    O: Optimizer<VoxelUnet<B>, B>,
{
    fn iteration_completed(&mut self, ctx: &RunContext, model: &VoxelUnet<B>) -> Result<()> {
        let _ = (ctx, model);
        Ok(())
    }

    fn epoch_completed(
        &mut self,
        ctx: &RunContext,
        model: &VoxelUnet<B>,
        optim: &O,
    ) -> Result<()> {
        let _ = (ctx, model, optim);
        Ok(())
    }
}

/// Callback attached to the evaluation engine.
pub trait EvalObserver<B: Backend> {
    /// Fired after each validation batch with the raw model
    /// output, so image loggers can render predictions.
    fn iteration_completed(
        &mut self,
        ctx: &RunContext,
        batch: &SegBatch<B>,
        logits: &Tensor<B, 5>,
    ) -> Result<()> {
        let _ = (ctx, batch, logits);
        Ok(())
    }

    /// Fired once per evaluation pass with `ctx.metric` set.
    fn epoch_completed(&mut self, ctx: &RunContext) -> Result<()> {
        let _ = ctx;
        Ok(())
    }
}

// ─── Training engine ──────────────────────────────────────────────────────────

/// Outcome of a completed training run.
pub struct TrainReport<B: AutodiffBackend> {
    pub model: VoxelUnet<B>,
    pub status: EngineStatus,
    pub epochs_run: usize,
    pub iterations: usize,
    pub final_loss: f64,
}

pub struct TrainEngine<B, O>
where
    B: AutodiffBackend,
    O: Optimizer<VoxelUnet<B>, B>,
{
    model: VoxelUnet<B>,
    optim: O,
    criterion: DiceLoss,
    learning_rate: f64,
    observers: Vec<Box<dyn TrainObserver<B, O>>>,
}

impl<B, O> TrainEngine<B, O>
where
    B: AutodiffBackend,
    O: Optimizer<VoxelUnet<B>, B>,
{
    pub fn new(model: VoxelUnet<B>, optim: O, criterion: DiceLoss, learning_rate: f64) -> Self {
        Self {
            model,
            optim,
            criterion,
            learning_rate,
            observers: Vec::new(),
        }
    }

    /// Observers fire in attach order.
    pub fn attach(&mut self, observer: Box<dyn TrainObserver<B, O>>) {
        self.observers.push(observer);
    }

    /// Drive the full run: Idle → Running, then per batch
    /// forward / loss / backward / step and the iteration event,
    /// per epoch the epoch event, finishing in Completed. Any
    /// error — pipeline or observer — moves the run to Failed
    /// and returns it to the caller unretried.
    pub fn run(
        self,
        loader: &Arc<dyn DataLoader<SegBatch<B>>>,
        max_epochs: usize,
    ) -> Result<TrainReport<B>> {
        let Self {
            model,
            optim,
            criterion,
            learning_rate,
            mut observers,
        } = self;

        let mut ctx = RunContext::new(max_epochs);
        ctx.status = EngineStatus::Running;
        tracing::info!("Training engine running for {max_epochs} epochs");

        match Self::drive(
            model,
            optim,
            &criterion,
            learning_rate,
            &mut observers,
            loader,
            &mut ctx,
        ) {
            Ok(model) => {
                ctx.status = EngineStatus::Completed;
                tracing::info!("Training complete after {} iterations", ctx.iteration);
                Ok(TrainReport {
                    model,
                    status: ctx.status,
                    epochs_run: max_epochs,
                    iterations: ctx.iteration,
                    final_loss: ctx.last_loss,
                })
            }
            Err(e) => {
                ctx.status = EngineStatus::Failed;
                tracing::error!(
                    "Training failed at epoch {} iteration {}: {e:#}",
                    ctx.epoch,
                    ctx.iteration,
                );
                Err(e)
            }
        }
    }

    fn drive(
        mut model: VoxelUnet<B>,
        mut optim: O,
        criterion: &DiceLoss,
        learning_rate: f64,
        observers: &mut [Box<dyn TrainObserver<B, O>>],
        loader: &Arc<dyn DataLoader<SegBatch<B>>>,
        ctx: &mut RunContext,
    ) -> Result<VoxelUnet<B>> {
        for epoch in 1..=ctx.max_epochs {
            ctx.begin_epoch(epoch);

            for batch in loader.iter() {
                let logits = model.forward(batch.images);
                let loss = criterion.forward(logits, batch.labels);
                let loss_value: f64 = loss.clone().into_scalar().elem();

                let grads = loss.backward();
                let grads = GradientsParams::from_grads(grads, &model);
                model = optim.step(learning_rate, model, grads);

                ctx.advance(loss_value);
                for observer in observers.iter_mut() {
                    observer.iteration_completed(ctx, &model)?;
                }
            }

            for observer in observers.iter_mut() {
                observer.epoch_completed(ctx, &model, &optim)?;
            }
            tracing::info!(
                "Epoch {:>3}/{} | train_loss={:.4}",
                epoch,
                ctx.max_epochs,
                ctx.epoch_loss_mean(),
            );
        }

        Ok(model)
    }
}

// ─── Evaluation engine ────────────────────────────────────────────────────────

/// Forward-only counterpart of the training engine: freezes the
/// supplied model, accumulates Mean Dice over the full loader,
/// and fires its own iteration/epoch events. Invoked by a
/// training-engine observer on an epoch cadence rather than on
/// a schedule of its own.
pub struct EvalEngine<B: Backend> {
    metric: MeanDice,
    observers: Vec<Box<dyn EvalObserver<B>>>,
}

impl<B: Backend> EvalEngine<B> {
    pub fn new(metric: MeanDice) -> Self {
        Self {
            metric,
            observers: Vec::new(),
        }
    }

    pub fn attach(&mut self, observer: Box<dyn EvalObserver<B>>) {
        self.observers.push(observer);
    }

    /// One full pass over the validation loader. The metric is
    /// reset at the start, so each invocation scores only its
    /// own pass. `global_epoch` is the delegating engine's epoch
    /// counter, surfaced to observers through the context.
    pub fn run(
        &mut self,
        model: &VoxelUnet<B>,
        loader: &Arc<dyn DataLoader<SegBatch<B>>>,
        global_epoch: usize,
    ) -> Result<f64> {
        self.metric.reset();

        let mut ctx = RunContext::new(1);
        ctx.status = EngineStatus::Running;
        ctx.global_epoch = Some(global_epoch);
        ctx.begin_epoch(1);

        match self.drive(model, loader, &mut ctx) {
            Ok(mean) => {
                ctx.status = EngineStatus::Completed;
                Ok(mean)
            }
            Err(e) => {
                ctx.status = EngineStatus::Failed;
                tracing::error!("Evaluation failed at batch {}: {e:#}", ctx.epoch_iteration);
                Err(e)
            }
        }
    }

    fn drive(
        &mut self,
        model: &VoxelUnet<B>,
        loader: &Arc<dyn DataLoader<SegBatch<B>>>,
        ctx: &mut RunContext,
    ) -> Result<f64> {
        for batch in loader.iter() {
            let logits = model.forward(batch.images.clone());
            let batch_dice = self.metric.update(logits.clone(), batch.labels.clone());

            ctx.advance(batch_dice);
            for observer in self.observers.iter_mut() {
                observer.iteration_completed(ctx, &batch, &logits)?;
            }
        }

        let mean = self.metric.value();
        ctx.metric = Some(mean);
        for observer in self.observers.iter_mut() {
            observer.epoch_completed(ctx)?;
        }

        Ok(mean)
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::batcher::SegBatcher;
    use crate::data::dataset::{PairedVolumeDataset, SegSample};
    use crate::data::transforms::{AddChannel, TransformPipeline};
    use crate::domain::volume::Volume;
    use crate::ml::model::VoxelUnetConfig;
    use burn::data::dataloader::DataLoaderBuilder;
    use burn::data::dataset::Dataset;
    use burn::optim::AdamConfig;
    use ndarray::Array3;

    type TB = burn::backend::Autodiff<burn::backend::NdArray>;

    fn tiny_dataset(count: usize, extent: usize) -> PairedVolumeDataset {
        let pairs = (0..count)
            .map(|i| {
                let image = Array3::from_elem((extent, extent, extent), i as f32);
                let label = Array3::from_elem((extent, extent, extent), (i % 2) as f32);
                (
                    Volume::with_identity_affine(image),
                    Volume::with_identity_affine(label),
                )
            })
            .collect();
        PairedVolumeDataset::from_volumes(
            pairs,
            TransformPipeline::new(vec![Box::new(AddChannel)]),
            TransformPipeline::new(vec![Box::new(AddChannel)]),
            None,
        )
        .unwrap()
    }

    /// Records every iteration loss it observes.
    struct RecordingObserver {
        losses: std::rc::Rc<std::cell::RefCell<Vec<f64>>>,
        epochs: std::rc::Rc<std::cell::RefCell<Vec<usize>>>,
    }

    impl<B, O> TrainObserver<B, O> for RecordingObserver
    where
        B: AutodiffBackend,
        O: Optimizer<VoxelUnet<B>, B>,
    {
        fn iteration_completed(&mut self, ctx: &RunContext, _model: &VoxelUnet<B>) -> Result<()> {
            assert_eq!(ctx.status, EngineStatus::Running);
            self.losses.borrow_mut().push(ctx.last_loss);
            Ok(())
        }

        fn epoch_completed(
            &mut self,
            ctx: &RunContext,
            _model: &VoxelUnet<B>,
            _optim: &O,
        ) -> Result<()> {
            self.epochs.borrow_mut().push(ctx.epoch);
            Ok(())
        }
    }

    #[test]
    fn test_run_completes_with_finite_losses() {
        let device = Default::default();
        let dataset = tiny_dataset(4, 8);

        let loader = DataLoaderBuilder::new(SegBatcher::<TB>::new(device))
            .batch_size(2)
            .num_workers(1)
            .build(dataset);

        let device = Default::default();
        let model = VoxelUnetConfig::new(1, 1, vec![2, 4], vec![2], 1).init::<TB>(&device);
        let optim = AdamConfig::new().init();
        let mut engine = TrainEngine::new(model, optim, DiceLoss::new(), 1e-3);

        let losses = std::rc::Rc::new(std::cell::RefCell::new(Vec::new()));
        let epochs = std::rc::Rc::new(std::cell::RefCell::new(Vec::new()));
        engine.attach(Box::new(RecordingObserver {
            losses: losses.clone(),
            epochs: epochs.clone(),
        }));

        let report = engine.run(&loader, 2).unwrap();
        assert_eq!(report.status, EngineStatus::Completed);
        assert_eq!(report.epochs_run, 2);
        // 4 samples, batch 2, 2 epochs
        assert_eq!(report.iterations, 4);
        assert_eq!(losses.borrow().len(), 4);
        assert!(losses.borrow().iter().all(|l| l.is_finite()));
        assert_eq!(*epochs.borrow(), vec![1, 2]);
    }

    #[test]
    fn test_observer_error_fails_the_run() {
        struct FailingObserver;
        impl<B, O> TrainObserver<B, O> for FailingObserver
        where
            B: AutodiffBackend,
            O: Optimizer<VoxelUnet<B>, B>,
        {
            fn iteration_completed(
                &mut self,
                _ctx: &RunContext,
                _model: &VoxelUnet<B>,
            ) -> Result<()> {
                anyhow::bail!("observer exploded")
            }
        }

        let device = Default::default();
        let loader = DataLoaderBuilder::new(SegBatcher::<TB>::new(device))
            .batch_size(2)
            .num_workers(1)
            .build(tiny_dataset(2, 8));

        let device = Default::default();
        let model = VoxelUnetConfig::new(1, 1, vec![2, 4], vec![2], 1).init::<TB>(&device);
        let mut engine = TrainEngine::new(model, AdamConfig::new().init(), DiceLoss::new(), 1e-3);
        engine.attach(Box::new(FailingObserver));

        assert!(engine.run(&loader, 1).is_err());
    }

    #[test]
    fn test_shuffled_loader_covers_every_index_each_pass() {
        // Sample i carries the constant voxel value i, so the
        // indices of a pass can be read back from its batches.
        let device: burn::backend::ndarray::NdArrayDevice = Default::default();
        let dataset = tiny_dataset(10, 4);
        assert_eq!(dataset.len(), 10);

        let loader = DataLoaderBuilder::new(SegBatcher::<burn::backend::NdArray>::new(device))
            .batch_size(3)
            .shuffle(42)
            .num_workers(1)
            .build(dataset);

        for _pass in 0..2 {
            let mut seen: Vec<usize> = Vec::new();
            for batch in loader.iter() {
                let dims = batch.images.dims();
                let values: Vec<f32> = batch.images.into_data().to_vec().unwrap();
                let voxels_per_sample: usize = dims[1] * dims[2] * dims[3] * dims[4];
                for s in 0..dims[0] {
                    seen.push(values[s * voxels_per_sample] as usize);
                }
            }
            seen.sort_unstable();
            assert_eq!(seen, (0..10).collect::<Vec<_>>());
        }
    }

    #[test]
    fn test_eval_engine_scores_and_resets() {
        let device: burn::backend::ndarray::NdArrayDevice = Default::default();
        let loader = DataLoaderBuilder::new(SegBatcher::<burn::backend::NdArray>::new(device))
            .batch_size(2)
            .num_workers(1)
            .build(tiny_dataset(4, 8));

        let device = Default::default();
        let model = VoxelUnetConfig::new(1, 1, vec![2, 4], vec![2], 1)
            .init::<burn::backend::NdArray>(&device);
        let mut engine = EvalEngine::new(MeanDice::new());

        let first = engine.run(&model, &loader, 1).unwrap();
        let second = engine.run(&model, &loader, 2).unwrap();
        // Same frozen model, same data: the second pass must not
        // drag history along from the first.
        assert!((first - second).abs() < 1e-9);
    }

    #[test]
    fn test_batcher_shapes_survive_dataset_round_trip() {
        let dataset = tiny_dataset(3, 4);
        let sample: SegSample = dataset.get(0).unwrap();
        assert_eq!(sample.shape, [1, 4, 4, 4]);
    }
}
