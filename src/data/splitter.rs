// ============================================================
// Layer 4 — Train/Validation Splitter
// ============================================================
// Shuffles sample pairs and cuts them into a training set and a
// validation set. Takes the RNG as a parameter so the split is
// reproducible under the workflow's configured seed.

use rand::seq::SliceRandom;
use rand::Rng;

/// Shuffle `items` and split them into (train, validation).
///
/// `train_fraction` is the proportion kept for training, e.g.
/// 0.8 keeps 80%. The fraction is clamped so tiny datasets never
/// panic; with fraction 1.0 the validation set is empty.
pub fn split_train_val<T, R: Rng>(
    mut items: Vec<T>,
    train_fraction: f64,
    rng: &mut R,
) -> (Vec<T>, Vec<T>) {
    items.shuffle(rng);

    let total = items.len();
    let split_at = ((total as f64) * train_fraction).round() as usize;
    let split_at = split_at.min(total);

    let val = items.split_off(split_at);

    tracing::debug!(
        "Dataset split: {} training, {} validation",
        items.len(),
        val.len(),
    );

    (items, val)
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_correct_split_sizes() {
        let items: Vec<usize> = (0..100).collect();
        let mut rng = StdRng::seed_from_u64(1);
        let (train, val) = split_train_val(items, 0.8, &mut rng);
        assert_eq!(train.len(), 80);
        assert_eq!(val.len(), 20);
    }

    #[test]
    fn test_all_items_preserved() {
        let items: Vec<usize> = (0..50).collect();
        let mut rng = StdRng::seed_from_u64(2);
        let (mut train, val) = split_train_val(items, 0.7, &mut rng);
        train.extend(val);
        train.sort_unstable();
        assert_eq!(train, (0..50).collect::<Vec<_>>());
    }

    #[test]
    fn test_empty_dataset() {
        let items: Vec<usize> = Vec::new();
        let mut rng = StdRng::seed_from_u64(3);
        let (train, val) = split_train_val(items, 0.8, &mut rng);
        assert!(train.is_empty());
        assert!(val.is_empty());
    }

    #[test]
    fn test_full_training_split() {
        let items: Vec<usize> = (0..10).collect();
        let mut rng = StdRng::seed_from_u64(4);
        let (train, val) = split_train_val(items, 1.0, &mut rng);
        assert_eq!(train.len(), 10);
        assert!(val.is_empty());
    }
}
