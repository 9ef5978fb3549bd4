// ============================================================
// Layer 2 — Application Layer
// ============================================================
// Use cases that sequence the lower layers end to end. The CLI
// constructs these from parsed arguments; nothing here touches
// clap, and nothing below this layer knows the workflow order.

/// Writes a synthetic dataset to disk
pub mod generate_use_case;

/// Runs the full training workflow
pub mod train_use_case;
