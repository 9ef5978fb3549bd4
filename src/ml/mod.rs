// ============================================================
// Layer 5 — ML Layer (Burn)
// ============================================================
// All burn-specific training code lives here: the model
// architecture, the loss/metric pair, and the engines that
// drive batches through them.
//
//   model.rs  — VoxelUnet, a 3D residual encoder-decoder with
//               skip connections and a raw-logit head
//
//   loss.rs   — differentiable Dice loss for optimisation and
//               the thresholded Mean-Dice metric for validation
//
//   engine.rs — the event-driven training engine, the forward-
//               only evaluation engine, their observer traits,
//               and the RunContext observers read from
//
// The backend is fixed here once; everything else is generic
// over it the way the trainer isolates its backend choice.
//
// Reference: Burn Book §3 (Building Blocks), §5 (Training)

/// 3D residual UNet architecture
pub mod model;

/// Dice loss and Mean-Dice metric
pub mod loss;

/// Training/evaluation engines and observer traits
pub mod engine;

/// Backend used for optimisation: autodiff over CPU ndarray
pub type TrainBackend = burn::backend::Autodiff<burn::backend::NdArray>;

/// Backend used for frozen-parameter evaluation
pub type EvalBackend = burn::backend::NdArray;

/// Device both backends run on
pub type CpuDevice = burn::backend::ndarray::NdArrayDevice;
