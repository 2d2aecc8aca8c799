//! Behavior tests for cross-source reconciliation.

use finmerge_core::{
    MetricObservation, ProviderId, ReconciliationRecord, ReconciliationStrategy, Reconciliator,
    Symbol, ToleranceTable, UtcDateTime,
};
use proptest::prelude::*;

fn at(offset_secs: i64) -> UtcDateTime {
    UtcDateTime::from_unix_seconds(1_704_067_200 + offset_secs).expect("valid timestamp")
}

fn observation(metric: &str, source: ProviderId, value: f64) -> MetricObservation {
    MetricObservation::new(metric, source, value, at(0))
}

// =============================================================================
// Disagreement scenarios
// =============================================================================

#[test]
fn conservative_roe_disagreement_takes_the_lower_value() {
    // Given: Providers disagreeing wildly on ROE
    let reconciliator = Reconciliator::default();

    // When: Reconciled conservatively
    let (value, record) =
        reconciliator.reconcile("roe", 12.0, 138.58, ReconciliationStrategy::Conservative);

    // Then: The lower (less optimistic) value wins
    assert_eq!(value, Some(12.0));
    assert_eq!(record.reconciled_value, Some(12.0));
    assert!(!record.within_tolerance);
    assert_eq!(record.tolerance_pct, 10.0);
    assert!(record.diff_pct.is_some_and(|diff| diff > 100.0));
    assert!(record.reason.contains("lower"), "reason={}", record.reason);
}

#[test]
fn conservative_debt_ratio_disagreement_takes_the_higher_value() {
    // Given: Providers disagreeing on a risk metric
    let reconciliator = Reconciliator::default();

    // When: Reconciled conservatively
    let (value, record) =
        reconciliator.reconcile("debt_ratio", 150.0, 883.1, ReconciliationStrategy::Conservative);

    // Then: The higher (riskier) value wins
    assert_eq!(value, Some(883.1));
    assert!(!record.within_tolerance);
    assert_eq!(record.strategy_used, ReconciliationStrategy::Conservative);
}

#[test]
fn values_within_tolerance_always_resolve_to_the_mean() {
    // Given: PER values 10% apart, inside PER's 15% tolerance
    let reconciliator = Reconciliator::default();

    for strategy in ReconciliationStrategy::ALL {
        // When: Reconciled with any strategy
        let (value, record) = reconciliator.reconcile("per", 10.5, 9.5, strategy);

        // Then: The mean is used and the record says so
        assert_eq!(value, Some(10.0), "{strategy}");
        assert!(record.within_tolerance);
        assert_eq!(record.tolerance_pct, 15.0);
    }
}

#[test]
fn each_strategy_resolves_an_out_of_tolerance_pair() {
    let reconciliator = Reconciliator::default();
    let expected = [
        (ReconciliationStrategy::PreferA, Some(100.0)),
        (ReconciliationStrategy::PreferB, Some(200.0)),
        (ReconciliationStrategy::Average, Some(150.0)),
        (ReconciliationStrategy::Conservative, Some(150.0)),
        (ReconciliationStrategy::WeightedBlend, Some(130.0)),
        (ReconciliationStrategy::FlagAndSkip, None),
    ];

    for (strategy, want) in expected {
        // Given/When: An unclassified metric 66% apart
        let (value, record) = reconciliator.reconcile("eps", 100.0, 200.0, strategy);

        // Then: The strategy's documented pick is returned and recorded
        match (value, want) {
            (Some(got), Some(want)) => assert!((got - want).abs() < 1e-9, "{strategy}: {got}"),
            (got, want) => assert_eq!(got, want, "{strategy}"),
        }
        assert_eq!(record.reconciled_value, value);
        assert_eq!((record.value_a, record.value_b), (100.0, 200.0));
    }
}

#[test]
fn flagged_metrics_render_as_not_available() {
    let (value, record) = Reconciliator::default().reconcile(
        "revenue",
        1_000.0,
        1_200.0,
        ReconciliationStrategy::FlagAndSkip,
    );

    assert_eq!(value, None);
    assert_eq!(record.display_value(), "N/A");
    assert!(record.reason.contains("flag_and_skip"));
}

#[test]
fn configured_tolerances_and_weights_are_applied() {
    // Given: A stricter revenue tolerance and an even blend
    let reconciliator = Reconciliator::new(ToleranceTable::standard().with_metric("revenue", 1.0))
        .with_blend_weight(0.5);

    // When: Revenue differs by about 2%
    let (value, record) =
        reconciliator.reconcile("Revenue", 100.0, 102.0, ReconciliationStrategy::WeightedBlend);

    // Then: The pair is out of tolerance and blended 50/50
    assert!(!record.within_tolerance);
    assert_eq!(value, Some(101.0));
}

// =============================================================================
// Whole-record reconciliation
// =============================================================================

#[test]
fn reconcile_record_merges_every_metric_and_keeps_the_inputs() {
    // Given: Observations from both providers for one symbol
    let symbol = Symbol::parse("005930").expect("valid");
    let brokerage = vec![
        observation("roe", ProviderId::Kis, 12.0),
        observation("per", ProviderId::Kis, 10.0),
        observation("pbr", ProviderId::Kis, 1.2),
    ];
    let disclosure = vec![
        observation("ROE", ProviderId::Dart, 138.58),
        observation("per", ProviderId::Dart, 10.5),
        observation("revenue", ProviderId::Dart, 258_935.0),
    ];

    // When: The record is reconciled conservatively
    let (merged, records) = Reconciliator::default().reconcile_record(
        &symbol,
        &brokerage,
        &disclosure,
        ReconciliationStrategy::Conservative,
    );

    // Then: Only metrics seen by both sources produce audit records
    let names: Vec<_> = records.iter().map(|r| r.metric_name.as_str()).collect();
    assert_eq!(names, ["per", "roe"]);

    // And: Merged fields carry the reconciled value and both inputs
    assert_eq!(merged.symbol, symbol);
    assert_eq!(merged.get("roe"), Some(12.0));
    assert_eq!(merged.get("roe_reconciled"), Some(12.0));
    assert_eq!(merged.get("roe_a"), Some(12.0));
    assert_eq!(merged.get("roe_b"), Some(138.58));
    assert_eq!(merged.get("per"), Some(10.25));

    // And: One-sided metrics pass through with the missing side empty
    assert_eq!(merged.get("pbr"), Some(1.2));
    assert!(merged.contains("pbr_b"));
    assert_eq!(merged.get("pbr_b"), None);
    assert_eq!(merged.get("revenue_reconciled"), Some(258_935.0));
    assert_eq!(merged.display("revenue_a"), "N/A");
}

#[test]
fn reconcile_record_uses_the_latest_observation_per_metric() {
    let symbol = Symbol::parse("000660").expect("valid");
    let stale_then_fresh = vec![
        MetricObservation::new("per", ProviderId::Kis, 30.0, at(0)),
        MetricObservation::new("per", ProviderId::Kis, 10.0, at(3_600)),
    ];
    let other = vec![MetricObservation::new("per", ProviderId::Dart, 10.0, at(60))];

    let (merged, records) = Reconciliator::default().reconcile_record(
        &symbol,
        &stale_then_fresh,
        &other,
        ReconciliationStrategy::PreferA,
    );

    assert_eq!(merged.get("per_a"), Some(10.0));
    assert!(records[0].within_tolerance);
}

#[test]
fn records_serialize_for_audit() {
    let (_, record) = Reconciliator::default().reconcile(
        "roe",
        12.0,
        138.58,
        ReconciliationStrategy::Conservative,
    );

    let json = serde_json::to_value(&record).expect("serializable");

    assert_eq!(json["strategy_used"], "conservative");
    assert_eq!(json["within_tolerance"], false);
    assert_eq!(json["reconciled_value"], 12.0);
}

#[test]
fn extreme_values_reconcile_and_round_trip_through_json() {
    // Given: Equal values near the top of the f64 range
    let reconciliator = Reconciliator::default();

    // When: They are averaged
    let (equal, equal_record) =
        reconciliator.reconcile("eps", 1e308, 1e308, ReconciliationStrategy::Average);

    // Then: The value comes back unchanged rather than overflowing
    assert_eq!(equal, Some(1e308));
    assert!(equal_record.within_tolerance);

    // And: Opposite extremes still produce a finite, serializable audit record
    let (opposite, record) =
        reconciliator.reconcile("eps", 1e308, -1e308, ReconciliationStrategy::Average);
    assert_eq!(opposite, Some(0.0));
    assert_eq!(record.diff_pct, Some(f64::MAX));
    let json = serde_json::to_string(&record).expect("serializable");
    let restored: ReconciliationRecord = serde_json::from_str(&json).expect("deserializable");
    assert_eq!((restored.value_a, restored.value_b), (1e308, -1e308));
    assert_eq!(restored.reconciled_value, Some(0.0));
    assert!(restored
        .diff_pct
        .is_some_and(|diff| diff.is_finite() && diff >= f64::MAX * (1.0 - 1e-12)));
    assert_eq!(restored.reason, record.reason);
}

#[test]
fn non_finite_inputs_leave_the_difference_empty() {
    let (value, record) = Reconciliator::default().reconcile(
        "roe",
        f64::INFINITY,
        12.0,
        ReconciliationStrategy::PreferB,
    );

    assert_eq!(value, None);
    assert_eq!(record.diff_pct, None);
    assert!(serde_json::to_value(&record).expect("serializable")["diff_pct"].is_null());
}

// =============================================================================
// Properties
// =============================================================================

fn any_strategy() -> impl Strategy<Value = ReconciliationStrategy> {
    prop::sample::select(ReconciliationStrategy::ALL.to_vec())
}

fn any_metric() -> impl Strategy<Value = &'static str> {
    prop::sample::select(vec![
        "roe",
        "per",
        "revenue",
        "debt_ratio",
        "pbr",
        "eps",
        "dividend_yield",
    ])
}

fn any_finite() -> impl Strategy<Value = f64> {
    prop::num::f64::NORMAL | prop::num::f64::SUBNORMAL | prop::num::f64::ZERO
}

proptest! {
    #[test]
    fn reconciling_equal_values_returns_the_value(
        metric in any_metric(),
        value in any_finite(),
        strategy in any_strategy(),
    ) {
        let (reconciled, record) =
            Reconciliator::default().reconcile(metric, value, value, strategy);

        prop_assert_eq!(reconciled, Some(value));
        prop_assert!(record.within_tolerance);
        prop_assert_eq!(record.diff_pct, Some(0.0));
    }

    #[test]
    fn reconcile_is_deterministic(
        metric in any_metric(),
        a in any_finite(),
        b in any_finite(),
        strategy in any_strategy(),
    ) {
        let reconciliator = Reconciliator::default();

        let first = reconciliator.reconcile(metric, a, b, strategy);
        let second = reconciliator.reconcile(metric, a, b, strategy);

        prop_assert_eq!(first, second);
    }

    #[test]
    fn reconciled_values_stay_between_the_inputs(
        metric in any_metric(),
        a in -1.0e6..1.0e6_f64,
        b in -1.0e6..1.0e6_f64,
        strategy in any_strategy(),
    ) {
        let (reconciled, record) = Reconciliator::default().reconcile(metric, a, b, strategy);

        prop_assert!(record.diff_pct.is_some_and(|diff| diff >= 0.0));
        if let Some(value) = reconciled {
            let slack = 1e-9 * a.abs().max(b.abs()).max(1.0);
            prop_assert!(value >= a.min(b) - slack && value <= a.max(b) + slack);
        } else {
            prop_assert_eq!(strategy, ReconciliationStrategy::FlagAndSkip);
            prop_assert!(!record.within_tolerance);
        }
    }
}
