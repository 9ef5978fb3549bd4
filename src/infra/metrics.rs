// ============================================================
// Layer 6 — Epoch Metrics Logger
// ============================================================
// Appends one CSV row per validated epoch so a run leaves a
// plottable record behind.
//
// Example output:
//   epoch,train_loss,mean_dice
//   2,0.412394,0.581203
//   4,0.268551,0.702148

use anyhow::Result;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::PathBuf;
use serde::{Deserialize, Serialize};

/// One row of metrics for a validated epoch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EpochMetrics {
    pub epoch: usize,

    /// Mean Dice loss over the epoch's training batches
    pub train_loss: f64,

    /// Mean Dice score over the validation pass
    pub mean_dice: f64,
}

impl EpochMetrics {
    pub fn new(epoch: usize, train_loss: f64, mean_dice: f64) -> Self {
        Self {
            epoch,
            train_loss,
            mean_dice,
        }
    }

    /// True when this epoch beat the previous best score.
    pub fn is_improvement(&self, best_dice: f64) -> bool {
        self.mean_dice > best_dice
    }
}

/// Appends epoch metrics to `metrics.csv` in the given dir.
pub struct MetricsLogger {
    csv_path: PathBuf,
}

impl MetricsLogger {
    /// Writes the CSV header only when the file is new, so a
    /// resumed run keeps appending to the same log.
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;

        let csv_path = dir.join("metrics.csv");
        if !csv_path.exists() {
            let mut f = fs::File::create(&csv_path)?;
            writeln!(f, "epoch,train_loss,mean_dice")?;
        }

        Ok(Self { csv_path })
    }

    pub fn log(&self, m: &EpochMetrics) -> Result<()> {
        let mut f = OpenOptions::new().append(true).open(&self.csv_path)?;
        writeln!(f, "{},{:.6},{:.6}", m.epoch, m.train_loss, m.mean_dice)?;
        Ok(())
    }

    pub fn csv_path(&self) -> &PathBuf {
        &self.csv_path
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_improvement() {
        let m = EpochMetrics::new(2, 0.4, 0.6);
        assert!(m.is_improvement(0.5));
        assert!(!m.is_improvement(0.7));
    }

    #[test]
    fn test_rows_append_under_one_header() {
        let dir = std::env::temp_dir().join(format!("voxelseg_metrics_{}", std::process::id()));
        std::fs::remove_dir_all(&dir).ok();

        let logger = MetricsLogger::new(&dir).unwrap();
        logger.log(&EpochMetrics::new(1, 0.9, 0.1)).unwrap();
        logger.log(&EpochMetrics::new(2, 0.5, 0.4)).unwrap();

        let contents = std::fs::read_to_string(logger.csv_path()).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], "epoch,train_loss,mean_dice");
        assert!(lines[2].starts_with("2,"));
        std::fs::remove_dir_all(&dir).ok();
    }
}
