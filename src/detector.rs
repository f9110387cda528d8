// Change detection between consecutive weights.

use tracing::warn;

/// Minimum absolute difference (kg) that counts as a new weight.
pub const DEFAULT_THRESHOLD: f64 = 20.0;

/// Whether `new` is a reportable change from `old`.
///
/// A missing previous weight always counts as a change. The comparison is
/// strict, so a difference of exactly `threshold` is not a change.
pub fn has_changed(new: f64, old: Option<f64>, threshold: f64) -> bool {
    let Some(old) = old else {
        return true;
    };

    let diff = (new - old).abs();
    if diff.is_nan() {
        warn!("Weight comparison failed for {} and {}", new, old);
        return new != old;
    }
    diff > threshold
}

/// Remembers the last accepted weight.
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeDetector {
    threshold: f64,
    last: Option<f64>,
}

impl ChangeDetector {
    pub fn new(threshold: f64) -> Self {
        ChangeDetector {
            threshold,
            last: None,
        }
    }

    /// Returns `true` and records `weight` when it differs enough from the
    /// last accepted weight; otherwise leaves the state untouched.
    pub fn observe(&mut self, weight: f64) -> bool {
        let changed = has_changed(weight, self.last, self.threshold);
        if changed {
            self.last = Some(weight);
        }
        changed
    }

    pub fn last(&self) -> Option<f64> {
        self.last
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }
}

impl Default for ChangeDetector {
    fn default() -> Self {
        Self::new(DEFAULT_THRESHOLD)
    }
}
