//! Cross-source metric reconciliation.
//!
//! | Type | Description |
//! |------|-------------|
//! | [`Reconciliator`] | Tolerance check plus strategy dispatch, no hidden state |
//! | [`ReconciliationStrategy`] | Closed set of conflict-resolution policies |
//! | [`ToleranceTable`] | Per-metric percent tolerances |
//! | [`ReconciliationRecord`] | Audit entry produced for every reconciled metric |
//! | [`MergedRecord`] | Per-symbol merged fields |

mod metric;
mod record;
mod strategy;
mod tolerance;

use std::collections::BTreeMap;

use tracing::debug;

pub use metric::{MetricKind, MetricObservation};
pub use record::{MergedRecord, ReconciliationRecord};
pub use strategy::ReconciliationStrategy;
pub use tolerance::ToleranceTable;

use crate::Symbol;

/// Floor for the mean in the percent-difference denominator.
const MIN_DENOMINATOR: f64 = 1e-9;

/// Resolves disagreements between two providers' values for the same metric.
#[derive(Debug, Clone, PartialEq)]
pub struct Reconciliator {
    tolerances: ToleranceTable,
    blend_weight_a: f64,
    default_strategy: ReconciliationStrategy,
}

impl Default for Reconciliator {
    fn default() -> Self {
        Self::new(ToleranceTable::standard())
    }
}

impl Reconciliator {
    pub const DEFAULT_BLEND_WEIGHT_A: f64 = 0.7;

    pub fn new(tolerances: ToleranceTable) -> Self {
        Self {
            tolerances,
            blend_weight_a: Self::DEFAULT_BLEND_WEIGHT_A,
            default_strategy: ReconciliationStrategy::default(),
        }
    }

    /// Weight given to source A by [`ReconciliationStrategy::WeightedBlend`], clamped to `[0, 1]`.
    pub fn with_blend_weight(mut self, weight_a: f64) -> Self {
        self.blend_weight_a = if weight_a.is_finite() {
            weight_a.clamp(0.0, 1.0)
        } else {
            Self::DEFAULT_BLEND_WEIGHT_A
        };
        self
    }

    pub fn with_default_strategy(mut self, strategy: ReconciliationStrategy) -> Self {
        self.default_strategy = strategy;
        self
    }

    pub fn tolerances(&self) -> &ToleranceTable {
        &self.tolerances
    }

    pub fn blend_weight_a(&self) -> f64 {
        self.blend_weight_a
    }

    pub fn default_strategy(&self) -> ReconciliationStrategy {
        self.default_strategy
    }

    /// Merge two values of `metric`.
    ///
    /// Values within the metric's tolerance always resolve to the mean;
    /// otherwise `strategy` decides. The returned record carries the inputs,
    /// the difference and the reason either way.
    pub fn reconcile(
        &self,
        metric: &str,
        value_a: f64,
        value_b: f64,
        strategy: ReconciliationStrategy,
    ) -> (Option<f64>, ReconciliationRecord) {
        let tolerance_pct = self.tolerances.get(metric);

        if !value_a.is_finite() || !value_b.is_finite() {
            let record = ReconciliationRecord {
                metric_name: metric.to_owned(),
                value_a,
                value_b,
                diff_pct: None,
                tolerance_pct,
                within_tolerance: false,
                strategy_used: strategy,
                reconciled_value: None,
                reason: String::from("an input is not a finite number; no value produced"),
            };
            return (None, record);
        }

        let diff_pct = diff_pct(value_a, value_b);
        let within_tolerance = diff_pct <= tolerance_pct;

        let (reconciled_value, reason) = if within_tolerance {
            (
                Some(strategy::mean(value_a, value_b)),
                format!(
                    "difference {diff_pct:.2}% within {tolerance_pct:.2}% tolerance; took the mean"
                ),
            )
        } else {
            let resolution = strategy.resolve(
                MetricKind::classify(metric),
                value_a,
                value_b,
                self.blend_weight_a,
            );
            (
                resolution.value,
                format!(
                    "difference {diff_pct:.2}% exceeds {tolerance_pct:.2}% tolerance; {} {}",
                    strategy, resolution.rationale
                ),
            )
        };

        let record = ReconciliationRecord {
            metric_name: metric.to_owned(),
            value_a,
            value_b,
            diff_pct: Some(diff_pct),
            tolerance_pct,
            within_tolerance,
            strategy_used: strategy,
            reconciled_value,
            reason,
        };
        (reconciled_value, record)
    }

    /// [`Self::reconcile`] with the configured default strategy.
    pub fn reconcile_default(
        &self,
        metric: &str,
        value_a: f64,
        value_b: f64,
    ) -> (Option<f64>, ReconciliationRecord) {
        self.reconcile(metric, value_a, value_b, self.default_strategy)
    }

    /// Reconcile every metric in two observation sets for one symbol.
    ///
    /// Metric names match case-insensitively. Duplicate names within one set
    /// keep the most recently collected value; non-finite values count as
    /// missing. A metric seen on one side only is copied through without a
    /// [`ReconciliationRecord`].
    pub fn reconcile_record(
        &self,
        symbol: &Symbol,
        observations_a: &[MetricObservation],
        observations_b: &[MetricObservation],
        strategy: ReconciliationStrategy,
    ) -> (MergedRecord, Vec<ReconciliationRecord>) {
        let latest_a = latest_by_metric(observations_a);
        let latest_b = latest_by_metric(observations_b);

        let mut merged = MergedRecord::new(symbol.clone());
        let mut records = Vec::new();

        let mut metrics: Vec<&String> = latest_a.keys().chain(latest_b.keys()).collect();
        metrics.sort();
        metrics.dedup();

        for metric in metrics {
            let a = latest_a.get(metric).copied();
            let b = latest_b.get(metric).copied();
            match (a, b) {
                (Some(a), Some(b)) => {
                    let (value, record) = self.reconcile(metric, a, b, strategy);
                    merged.insert_metric(metric, value, Some(a), Some(b));
                    records.push(record);
                }
                (only_a, only_b) => {
                    merged.insert_metric(metric, only_a.or(only_b), only_a, only_b);
                }
            }
        }

        debug!(
            %symbol,
            reconciled = records.len(),
            out_of_tolerance = records.iter().filter(|r| !r.within_tolerance).count(),
            "reconciled record"
        );
        (merged, records)
    }
}

/// `|a - b| / max(|mean|, 1e-9) * 100`, saturating at `f64::MAX` for finite inputs.
pub fn diff_pct(a: f64, b: f64) -> f64 {
    let denominator = strategy::mean(a, b).abs().max(MIN_DENOMINATOR);
    let spread = (a / 2.0 - b / 2.0).abs() * 2.0;
    (spread / denominator * 100.0).min(f64::MAX)
}

fn latest_by_metric(observations: &[MetricObservation]) -> BTreeMap<String, f64> {
    let mut latest: BTreeMap<String, &MetricObservation> = BTreeMap::new();
    for observation in observations.iter().filter(|o| o.value.is_finite()) {
        let key = tolerance::normalize(&observation.metric_name);
        match latest.get(&key) {
            Some(current) if current.collected_at > observation.collected_at => {}
            _ => {
                latest.insert(key, observation);
            }
        }
    }
    latest
        .into_iter()
        .map(|(metric, observation)| (metric, observation.value))
        .collect()
}
