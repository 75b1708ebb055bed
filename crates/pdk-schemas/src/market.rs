//! Market-data contract types. Ingestion adapters and regime detection live
//! outside this workspace; these are the shapes they feed the core.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Data quality tier attached to every bar.
///
/// `Universe` rows exist for symbol-screening only and are refused by the
/// analytical-store backtest loader.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QualityTier {
    /// Clean, validated bar suitable for backtests.
    Validated,
    /// Delayed/unvalidated feed; usable live, suspect for research.
    Delayed,
    /// Screening-universe bar; never valid backtest input.
    Universe,
}

impl QualityTier {
    pub fn as_str(self) -> &'static str {
        match self {
            QualityTier::Validated => "validated",
            QualityTier::Delayed => "delayed",
            QualityTier::Universe => "universe",
        }
    }

    pub fn backtest_safe(self) -> bool {
        !matches!(self, QualityTier::Universe)
    }
}

/// One OHLCV bar. Prices are micros.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bar {
    pub symbol: String,
    pub ts: DateTime<Utc>,
    pub open_micros: i64,
    pub high_micros: i64,
    pub low_micros: i64,
    pub close_micros: i64,
    pub volume: i64,
    pub tier: QualityTier,
}

/// Detected market regime. Detection math is an external collaborator; the
/// core only routes it to strategies and the broadcast bus.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MarketRegime {
    Trending,
    Choppy,
    Volatile,
    Unknown,
}

impl Default for MarketRegime {
    fn default() -> Self {
        MarketRegime::Unknown
    }
}
