use std::fmt::{Display, Formatter};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::metric::MetricKind;
use crate::ValidationError;

/// How to resolve two values that disagree beyond tolerance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReconciliationStrategy {
    PreferA,
    PreferB,
    Average,
    /// Pessimistic pick per [`MetricKind`].
    #[default]
    Conservative,
    WeightedBlend,
    /// Decline to produce a value.
    FlagAndSkip,
}

/// Value picked by a strategy and the wording for the audit reason.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Resolution {
    pub value: Option<f64>,
    pub rationale: String,
}

impl ReconciliationStrategy {
    pub const ALL: [Self; 6] = [
        Self::PreferA,
        Self::PreferB,
        Self::Average,
        Self::Conservative,
        Self::WeightedBlend,
        Self::FlagAndSkip,
    ];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::PreferA => "prefer_a",
            Self::PreferB => "prefer_b",
            Self::Average => "average",
            Self::Conservative => "conservative",
            Self::WeightedBlend => "weighted_blend",
            Self::FlagAndSkip => "flag_and_skip",
        }
    }

    pub(crate) fn resolve(self, kind: MetricKind, a: f64, b: f64, weight_a: f64) -> Resolution {
        match self {
            Self::PreferA => prefer_a(a),
            Self::PreferB => prefer_b(b),
            Self::Average => average(a, b),
            Self::Conservative => conservative(kind, a, b),
            Self::WeightedBlend => weighted_blend(a, b, weight_a),
            Self::FlagAndSkip => flag_and_skip(),
        }
    }
}

/// Midpoint of `a` and `b` that stays finite for any finite inputs.
pub(crate) fn mean(a: f64, b: f64) -> f64 {
    if a.is_sign_negative() == b.is_sign_negative() {
        a + (b - a) / 2.0
    } else {
        (a + b) / 2.0
    }
}

/// `a` moved toward `b` by `weight_b`, finite for finite inputs and weights in `[0, 1]`.
fn blend(a: f64, b: f64, weight_b: f64) -> f64 {
    if a.is_sign_negative() == b.is_sign_negative() {
        a + (b - a) * weight_b
    } else {
        a * (1.0 - weight_b) + b * weight_b
    }
}

fn prefer_a(a: f64) -> Resolution {
    Resolution {
        value: Some(a),
        rationale: String::from("took source A"),
    }
}

fn prefer_b(b: f64) -> Resolution {
    Resolution {
        value: Some(b),
        rationale: String::from("took source B"),
    }
}

fn average(a: f64, b: f64) -> Resolution {
    Resolution {
        value: Some(mean(a, b)),
        rationale: String::from("took the mean"),
    }
}

fn conservative(kind: MetricKind, a: f64, b: f64) -> Resolution {
    let (value, rationale) = match kind {
        MetricKind::Profitability => (a.min(b), "took the lower value of a profitability metric"),
        MetricKind::Risk => (a.max(b), "took the higher value of a risk metric"),
        MetricKind::Unclassified => (mean(a, b), "metric is unclassified, took the mean"),
    };
    Resolution {
        value: Some(value),
        rationale: String::from(rationale),
    }
}

fn weighted_blend(a: f64, b: f64, weight_a: f64) -> Resolution {
    let weight_b = 1.0 - weight_a;
    Resolution {
        value: Some(blend(a, b, weight_b)),
        rationale: format!("blended {:.0}% A with {:.0}% B", weight_a * 100.0, weight_b * 100.0),
    }
}

fn flag_and_skip() -> Resolution {
    Resolution {
        value: None,
        rationale: String::from("flagged as unusable"),
    }
}

impl Display for ReconciliationStrategy {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReconciliationStrategy {
    type Err = ValidationError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim().to_ascii_lowercase().replace('-', "_");
        Self::ALL
            .into_iter()
            .find(|strategy| strategy.as_str() == normalized)
            .ok_or_else(|| ValidationError::InvalidStrategy {
                value: value.to_owned(),
            })
    }
}
