use serde::{Deserialize, Serialize};

use crate::{ProviderId, UtcDateTime};

/// Which direction is the pessimistic read of a metric.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MetricKind {
    /// Higher is better (revenue, ROE, operating income): conservative takes the lower value.
    Profitability,
    /// Higher is worse (debt ratio, PER, PBR): conservative takes the higher value.
    Risk,
    Unclassified,
}

const PROFITABILITY: &[&str] = &[
    "revenue",
    "roe",
    "operating_income",
    "net_income",
    "roa",
    "operating_margin",
];

const RISK: &[&str] = &["debt_ratio", "per", "pbr"];

impl MetricKind {
    pub fn classify(metric: &str) -> Self {
        let metric = super::tolerance::normalize(metric);
        if PROFITABILITY.contains(&metric.as_str()) {
            Self::Profitability
        } else if RISK.contains(&metric.as_str()) {
            Self::Risk
        } else {
            Self::Unclassified
        }
    }
}

/// One provider's value for one metric of one symbol.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricObservation {
    pub metric_name: String,
    pub source: ProviderId,
    pub value: f64,
    pub collected_at: UtcDateTime,
}

impl MetricObservation {
    pub fn new(
        metric_name: impl Into<String>,
        source: ProviderId,
        value: f64,
        collected_at: UtcDateTime,
    ) -> Self {
        Self {
            metric_name: metric_name.into(),
            source,
            value,
            collected_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_known_metrics() {
        assert_eq!(MetricKind::classify("ROE"), MetricKind::Profitability);
        assert_eq!(MetricKind::classify("operating_income"), MetricKind::Profitability);
        assert_eq!(MetricKind::classify("debt_ratio"), MetricKind::Risk);
        assert_eq!(MetricKind::classify("PBR"), MetricKind::Risk);
        assert_eq!(MetricKind::classify("dividend_yield"), MetricKind::Unclassified);
    }
}
