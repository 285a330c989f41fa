// =============================================================================
// Technical Indicators Module
// =============================================================================
//
// Pure, side-effect-free indicator math. Outputs are index-aligned with the
// input series so callers can zip them straight onto candles; positions
// without enough lookback are `None` rather than being dropped.

pub mod ema;

pub use ema::compute_ema_series;
