// =============================================================================
// Exponential Moving Average (EMA)
// =============================================================================
//
// EMA gives more weight to recent prices, making it more responsive to new
// information than the Simple Moving Average (SMA).
//
// Formula:
//   alpha = 2 / (period + 1)
//   EMA_t = close_t * alpha + EMA_{t-1} * (1 - alpha)
//
// The first EMA value (at index `period - 1`) is seeded with the SMA of the
// first `period` closes.
// =============================================================================

use crate::error::ApiError;

/// Compute the EMA series for `values` with look-back `period`.
///
/// The output has the same length as the input. Positions `0..period-1`
/// are `None` (insufficient lookback); position `period - 1` carries the
/// SMA seed; later positions follow the EMA recurrence. When the input is
/// shorter than `period` the whole output is `None`.
///
/// # Edge cases
/// - `period == 0` => `ApiError::InvalidPeriod`
/// - empty input => empty output (not an error)
pub fn compute_ema_series(values: &[f64], period: usize) -> Result<Vec<Option<f64>>, ApiError> {
    if period == 0 {
        return Err(ApiError::InvalidPeriod(period));
    }
    if values.is_empty() {
        return Ok(Vec::new());
    }

    let mut out: Vec<Option<f64>> = vec![None; values.len()];
    if values.len() < period {
        return Ok(out);
    }

    let alpha = 2.0 / (period as f64 + 1.0);

    // Seed: SMA of the first `period` values.
    let seed = values[..period].iter().sum::<f64>() / period as f64;
    out[period - 1] = Some(seed);

    let mut prev = seed;
    for (i, &v) in values.iter().enumerate().skip(period) {
        prev = v * alpha + prev * (1.0 - alpha);
        out[i] = Some(prev);
    }

    Ok(out)
}
