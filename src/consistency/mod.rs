// DANS : src/consistency/mod.rs

pub mod cross_source;
pub mod validator;

pub use cross_source::{CrossDexMap, CrossSourceReconciler};
pub use validator::ConsistencyValidator;

use crate::state::PoolKey;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// `|cached - fresh| / cached`. Vaut 0 si les deux sont nuls, +inf si seul `cached` l'est.
pub fn relative_difference(cached: f64, fresh: f64) -> f64 {
    if cached == 0.0 {
        if fresh == 0.0 { 0.0 } else { f64::INFINITY }
    } else {
        ((cached - fresh) / cached).abs()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldDiff {
    pub cached: f64,
    pub fresh: f64,
    pub relative_difference: f64,
    pub threshold: f64,
    pub exceeded: bool,
}

impl FieldDiff {
    pub fn compute(cached: f64, fresh: f64, threshold: f64) -> Self {
        let relative_difference = relative_difference(cached, fresh);
        Self { cached, fresh, relative_difference, threshold, exceeded: relative_difference > threshold }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldDiffs {
    pub price: FieldDiff,
    pub volume: FieldDiff,
    pub liquidity: FieldDiff,
}

impl FieldDiffs {
    pub fn any_exceeded(&self) -> bool {
        self.price.exceeded || self.volume.exceeded || self.liquidity.exceeded
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsistencyEvent {
    pub timestamp: DateTime<Utc>,
    pub pool_key: PoolKey,
    pub pool_address: String,
    pub field_diffs: FieldDiffs,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn relative_difference_edge_cases() {
        assert_eq!(relative_difference(0.0, 0.0), 0.0);
        assert!(relative_difference(0.0, 1.0).is_infinite());
        assert_eq!(relative_difference(100.0, 90.0), 0.1);
        assert_eq!(relative_difference(100.0, 110.0), 0.1);
    }

    #[test]
    fn threshold_is_strict() {
        assert!(!FieldDiff::compute(100.0, 105.0, 0.05).exceeded);
        assert!(FieldDiff::compute(100.0, 106.0, 0.05).exceeded);
    }
}
