use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Percent tolerance a metric may differ between sources before it counts as a conflict.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToleranceTable {
    default_pct: f64,
    per_metric: BTreeMap<String, f64>,
}

impl Default for ToleranceTable {
    fn default() -> Self {
        Self::standard()
    }
}

impl ToleranceTable {
    pub const DEFAULT_PCT: f64 = 10.0;

    /// Empty table; every metric gets `default_pct`.
    pub fn new(default_pct: f64) -> Self {
        Self {
            default_pct,
            per_metric: BTreeMap::new(),
        }
    }

    /// ROE 10%, PER 15%, revenue 5%, everything else 10%.
    pub fn standard() -> Self {
        Self::new(Self::DEFAULT_PCT)
            .with_metric("roe", 10.0)
            .with_metric("per", 15.0)
            .with_metric("revenue", 5.0)
    }

    pub fn with_metric(mut self, metric: &str, pct: f64) -> Self {
        self.set(metric, pct);
        self
    }

    pub fn set(&mut self, metric: &str, pct: f64) {
        self.per_metric.insert(normalize(metric), pct);
    }

    pub fn set_default_pct(&mut self, pct: f64) {
        self.default_pct = pct;
    }

    pub fn default_pct(&self) -> f64 {
        self.default_pct
    }

    /// Tolerance for `metric`, matched case-insensitively.
    pub fn get(&self, metric: &str) -> f64 {
        self.per_metric
            .get(&normalize(metric))
            .copied()
            .unwrap_or(self.default_pct)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.per_metric
            .iter()
            .map(|(metric, pct)| (metric.as_str(), *pct))
    }
}

pub(crate) fn normalize(metric: &str) -> String {
    metric.trim().to_ascii_lowercase()
}
