// =============================================================================
// Shared types used across the Deriv Pulse backend
// =============================================================================

use serde::{Deserialize, Serialize};

use crate::error::ApiError;

/// A single OHLC candle as returned by the Deriv ticks_history call.
///
/// Epochs are provider-ordered (ascending) and never re-sorted locally;
/// all four prices are finite by the time a `Candle` is constructed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Candle {
    pub epoch: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
}

/// A candle zipped with its EMA values, one per configured period.
///
/// `None` means the EMA has insufficient lookback at that index and
/// serializes as JSON `null`, which is what the chart frontend expects.
#[derive(Debug, Clone, Serialize)]
pub struct EnrichedCandle {
    pub epoch: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub ema20: Option<f64>,
    pub ema50: Option<f64>,
    pub ema100: Option<f64>,
    pub ema200: Option<f64>,
}

/// Whether the dashboard is looking at minute, hourly, or daily candles.
///
/// This is the full set of timeframes exposed to callers; anything else is
/// rejected at parse time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Timeframe {
    M1,
    H1,
    D1,
}

impl Timeframe {
    /// Parse a timeframe label (`"1m"`, `"1h"`, `"1d"`).
    pub fn parse(label: &str) -> Result<Self, ApiError> {
        match label {
            "1m" => Ok(Self::M1),
            "1h" => Ok(Self::H1),
            "1d" => Ok(Self::D1),
            other => Err(ApiError::UnsupportedTimeframe(other.to_string())),
        }
    }

    /// Deriv's native granularity unit: candle interval length in seconds.
    pub fn granularity_secs(self) -> u32 {
        match self {
            Self::M1 => 60,
            Self::H1 => 3600,
            Self::D1 => 86400,
        }
    }

    /// The finer supporting timeframe fetched alongside this one for
    /// multi-timeframe analysis, with the candle count to request.
    ///
    /// Daily analysis reads hourly candles to see how the day is forming;
    /// hourly reads 1m. The 1m timeframe has nothing finer to lean on.
    pub fn support(self) -> Option<(Timeframe, u32)> {
        match self {
            Self::D1 => Some((Self::H1, 48)),
            Self::H1 => Some((Self::M1, 120)),
            Self::M1 => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::M1 => "1m",
            Self::H1 => "1h",
            Self::D1 => "1d",
        }
    }
}

impl std::fmt::Display for Timeframe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
