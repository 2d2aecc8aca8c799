use std::fmt::{Display, Formatter};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::ValidationError;

/// Upstream data providers.
///
/// `Kis` is the brokerage OpenAPI (prices, valuation ratios; bearer-token
/// auth). `Dart` is the regulatory-disclosure API (financial statements,
/// corporate-code registry; API-key query parameter).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderId {
    Kis,
    Dart,
}

impl ProviderId {
    pub const ALL: [Self; 2] = [Self::Kis, Self::Dart];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Kis => "kis",
            Self::Dart => "dart",
        }
    }
}

impl Display for ProviderId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderId {
    type Err = ValidationError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "kis" => Ok(Self::Kis),
            "dart" => Ok(Self::Dart),
            other => Err(ValidationError::InvalidSource {
                value: other.to_owned(),
            }),
        }
    }
}
