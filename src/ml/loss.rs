// ============================================================
// Layer 5 — Dice Loss and Mean-Dice Metric
// ============================================================
// Overlap scoring for segmentation. The loss is differentiable
// with respect to raw logits and drives the optimizer; the
// metric binarises first and accumulates a running mean across
// an evaluation pass.
//
// Both use the smoothed Dice ratio
//     (2 * |P ∩ T| + s) / (|P| + |T| + s)
// where the constant s keeps an empty prediction against an
// empty target at ratio 1 instead of 0/0.

use burn::prelude::*;
use burn::tensor::activation::sigmoid;

pub const DEFAULT_SMOOTH: f64 = 1e-5;

// ─── DiceLoss ─────────────────────────────────────────────────────────────────

/// Soft Dice loss over raw logits: `1 - dice(sigmoid(logits), target)`,
/// computed per sample and averaged over the batch.
#[derive(Debug, Clone)]
pub struct DiceLoss {
    /// Smoothing constant applied to numerator and denominator
    pub smooth: f64,

    /// Map logits through a sigmoid before the overlap. Disable
    /// only when the input is already a probability map.
    pub apply_sigmoid: bool,
}

impl Default for DiceLoss {
    fn default() -> Self {
        Self {
            smooth: DEFAULT_SMOOTH,
            apply_sigmoid: true,
        }
    }
}

impl DiceLoss {
    pub fn new() -> Self {
        Self::default()
    }

    /// logits, targets: [batch, channels, x, y, z]
    /// returns a scalar tensor (shape [1])
    pub fn forward<B: Backend>(
        &self,
        logits: Tensor<B, 5>,
        targets: Tensor<B, 5>,
    ) -> Tensor<B, 1> {
        let predictions = if self.apply_sigmoid {
            sigmoid(logits)
        } else {
            logits
        };
        let dice = dice_per_sample(predictions, targets, self.smooth);
        (dice.ones_like() - dice).mean()
    }
}

// ─── MeanDice ─────────────────────────────────────────────────────────────────

/// Running mean of the hard Dice score, reset at the start of
/// each evaluation pass. Predictions are sigmoid-activated and
/// thresholded before the overlap.
#[derive(Debug, Clone)]
pub struct MeanDice {
    smooth: f64,
    threshold: f32,
    sum: f64,
    count: usize,
}

impl Default for MeanDice {
    fn default() -> Self {
        Self {
            smooth: DEFAULT_SMOOTH,
            threshold: 0.5,
            sum: 0.0,
            count: 0,
        }
    }
}

impl MeanDice {
    pub fn new() -> Self {
        Self::default()
    }

    /// Forget everything from the previous pass.
    pub fn reset(&mut self) {
        self.sum = 0.0;
        self.count = 0;
    }

    /// Fold one batch into the running mean and return that
    /// batch's own mean Dice.
    pub fn update<B: Backend>(&mut self, logits: Tensor<B, 5>, targets: Tensor<B, 5>) -> f64 {
        let batch = logits.dims()[0];
        let predictions = sigmoid(logits).greater_elem(self.threshold).float();
        let dice = dice_per_sample(predictions, targets, self.smooth);
        let batch_mean: f64 = dice.mean().into_scalar().elem();

        self.sum += batch_mean * batch as f64;
        self.count += batch;
        batch_mean
    }

    /// Mean over every sample seen since the last reset.
    pub fn value(&self) -> f64 {
        if self.count == 0 {
            return 0.0;
        }
        self.sum / self.count as f64
    }
}

/// Smoothed Dice ratio per sample: [batch, 1].
fn dice_per_sample<B: Backend>(
    predictions: Tensor<B, 5>,
    targets: Tensor<B, 5>,
    smooth: f64,
) -> Tensor<B, 2> {
    let p = predictions.flatten::<2>(1, 4);
    let t = targets.flatten::<2>(1, 4);

    let intersection = (p.clone() * t.clone()).sum_dim(1);
    let denominator = p.sum_dim(1) + t.sum_dim(1);

    (intersection * 2.0 + smooth) / (denominator + smooth)
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;

    type B = burn::backend::NdArray;

    fn device() -> <B as Backend>::Device {
        Default::default()
    }

    #[test]
    fn test_loss_near_zero_on_identical_masks() {
        // All-ones prediction fed as probabilities (sigmoid off)
        // against an all-ones target: overlap is perfect, so the
        // loss collapses to within smoothing/size of zero.
        let ones = Tensor::<B, 5>::ones([1, 1, 4, 4, 4], &device());
        let loss = DiceLoss {
            apply_sigmoid: false,
            ..DiceLoss::new()
        };
        let value: f64 = loss.forward(ones.clone(), ones).into_scalar().elem();
        assert!(value.abs() < 1e-4, "loss was {value}");
    }

    #[test]
    fn test_loss_near_one_on_disjoint_masks() {
        let device = device();
        let pred = Tensor::<B, 5>::ones([1, 1, 2, 2, 2], &device);
        let target = Tensor::<B, 5>::zeros([1, 1, 2, 2, 2], &device);
        let loss = DiceLoss {
            apply_sigmoid: false,
            ..DiceLoss::new()
        };
        let value: f64 = loss.forward(pred, target).into_scalar().elem();
        assert!((value - 1.0).abs() < 1e-4, "loss was {value}");
    }

    #[test]
    fn test_loss_is_batch_mean() {
        let device = device();
        // Sample 0 matches its target, sample 1 is disjoint:
        // the batch loss sits halfway.
        let pred = Tensor::<B, 5>::ones([2, 1, 2, 2, 2], &device);
        let target = Tensor::cat(
            vec![
                Tensor::<B, 5>::ones([1, 1, 2, 2, 2], &device),
                Tensor::<B, 5>::zeros([1, 1, 2, 2, 2], &device),
            ],
            0,
        );
        let loss = DiceLoss {
            apply_sigmoid: false,
            ..DiceLoss::new()
        };
        let value: f64 = loss.forward(pred, target).into_scalar().elem();
        assert!((value - 0.5).abs() < 1e-3, "loss was {value}");
    }

    #[test]
    fn test_metric_full_overlap_scores_one() {
        let device = device();
        // Large positive logits sigmoid to ~1 and clear the
        // threshold everywhere.
        let logits = Tensor::<B, 5>::ones([1, 1, 4, 4, 4], &device) * 10.0;
        let target = Tensor::<B, 5>::ones([1, 1, 4, 4, 4], &device);
        let mut metric = MeanDice::new();
        metric.update(logits, target);
        assert!((metric.value() - 1.0).abs() < 1e-4);
    }

    #[test]
    fn test_metric_disjoint_scores_zero() {
        let device = device();
        let logits = Tensor::<B, 5>::ones([1, 1, 4, 4, 4], &device) * 10.0;
        let target = Tensor::<B, 5>::zeros([1, 1, 4, 4, 4], &device);
        let mut metric = MeanDice::new();
        metric.update(logits, target);
        assert!(metric.value() < 1e-3);
    }

    #[test]
    fn test_metric_reset_clears_accumulator() {
        let device = device();
        let logits = Tensor::<B, 5>::ones([1, 1, 2, 2, 2], &device) * 10.0;
        let target = Tensor::<B, 5>::ones([1, 1, 2, 2, 2], &device);
        let mut metric = MeanDice::new();
        metric.update(logits, target);
        assert!(metric.value() > 0.9);
        metric.reset();
        assert_eq!(metric.value(), 0.0);
    }
}
