// ============================================================
// Layer 4 — Data Pipeline
// ============================================================
// Everything between raw NIfTI files and GPU-ready batches.
//
// The pipeline flows in this order:
//
//   SyntheticVolumeConfig
//       │
//       ▼
//   generator          → draws paired image/label volumes
//       │
//       ▼
//   store              → persists/reads them as NIfTI-1 files
//       │
//       ▼
//   transforms         → intensity scaling, channel insertion,
//       │                cropping/resizing per sample
//       ▼
//   PairedVolumeDataset → implements burn's Dataset trait
//       │
//       ▼
//   SegBatcher         → stacks samples into tensor batches
//       │
//       ▼
//   DataLoader         → feeds batches to the engines
//
// Each module is responsible for exactly one step.

/// Draws synthetic sphere volumes with noise
pub mod generator;

/// NIfTI-1 save/load with affine round-trip
pub mod store;

/// Volume-to-volume transform pipeline
pub mod transforms;

/// Paired image/label dataset behind burn's Dataset trait
pub mod dataset;

/// Implements burn's Batcher trait to create tensor batches
pub mod batcher;

/// Shuffles and splits sample pairs into train/validation sets
pub mod splitter;
