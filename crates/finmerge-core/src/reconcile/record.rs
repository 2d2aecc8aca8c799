use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::strategy::ReconciliationStrategy;
use crate::Symbol;

/// Audit entry for one metric reconciled between two sources.
///
/// `diff_pct` is `None` when either input was not finite. Such inputs are
/// kept as given, and JSON writes them as `null`, so those records do not
/// deserialize back.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconciliationRecord {
    pub metric_name: String,
    pub value_a: f64,
    pub value_b: f64,
    pub diff_pct: Option<f64>,
    pub tolerance_pct: f64,
    pub within_tolerance: bool,
    pub strategy_used: ReconciliationStrategy,
    pub reconciled_value: Option<f64>,
    pub reason: String,
}

impl ReconciliationRecord {
    /// Reconciled value with two decimals, or `N/A` when none was produced.
    pub fn display_value(&self) -> String {
        display(self.reconciled_value)
    }

    pub fn is_usable(&self) -> bool {
        self.reconciled_value.is_some()
    }
}

/// One symbol's fields after merging both sources.
///
/// For each metric `m` the record holds `m` and `m_reconciled` (the merged
/// value) plus `m_a` and `m_b` (the inputs). `None` marks a missing or
/// flagged value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MergedRecord {
    pub symbol: Symbol,
    pub fields: BTreeMap<String, Option<f64>>,
}

impl MergedRecord {
    pub fn new(symbol: Symbol) -> Self {
        Self {
            symbol,
            fields: BTreeMap::new(),
        }
    }

    pub fn get(&self, field: &str) -> Option<f64> {
        self.fields.get(field).copied().flatten()
    }

    pub fn contains(&self, field: &str) -> bool {
        self.fields.contains_key(field)
    }

    pub fn display(&self, field: &str) -> String {
        display(self.get(field))
    }

    pub(crate) fn insert_metric(
        &mut self,
        metric: &str,
        merged: Option<f64>,
        a: Option<f64>,
        b: Option<f64>,
    ) {
        self.fields.insert(metric.to_owned(), merged);
        self.fields.insert(format!("{metric}_reconciled"), merged);
        self.fields.insert(format!("{metric}_a"), a);
        self.fields.insert(format!("{metric}_b"), b);
    }
}

fn display(value: Option<f64>) -> String {
    value.map_or_else(|| String::from("N/A"), |value| format!("{value:.2}"))
}
