// ============================================================
// Layer 6 — Infrastructure Layer
// ============================================================
// Cross-cutting concerns attached to the engines as observers:
//
//   checkpoint.rs  — snapshot writer with bounded retention,
//                    built on burn's CompactRecorder
//
//   stats.rs       — human-readable progress lines
//
//   metrics.rs     — per-epoch CSV record of loss and Dice
//
//   tensorboard.rs — scalar and image event files for
//                    visualisation
//
//   validation.rs  — runs the evaluation engine from a training
//                    epoch event on a configurable cadence
//
// None of these are referenced by the engines themselves; they
// are wired in by the application layer at setup time.

/// Checkpoint snapshots with FIFO retention
pub mod checkpoint;

/// Console logging observer
pub mod stats;

/// CSV epoch metrics
pub mod metrics;

/// TensorBoard scalar/image observers
pub mod tensorboard;

/// Cadenced validation bridge between the engines
pub mod validation;
