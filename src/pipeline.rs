// =============================================================================
// Pipeline Orchestrator — fetch, enrich, and narrate candle series
// =============================================================================
//
// Thin composition layer over the quote client, the indicator engine, and
// the LLM collaborator. Owns no state; every call is a self-contained
// request/response cycle.
// =============================================================================

use serde::Serialize;
use tracing::{debug, info};

use crate::deriv::DerivClient;
use crate::error::ApiError;
use crate::indicators::compute_ema_series;
use crate::llm::{build_system_prompt, build_user_context, LlmClient};
use crate::types::{Candle, EnrichedCandle, Timeframe};

/// The enriched-candle response for a single symbol/timeframe query.
#[derive(Debug, Serialize)]
pub struct CandleView {
    pub symbol: String,
    pub timeframe: String,
    pub granularity: u32,
    pub candles: Vec<EnrichedCandle>,
}

/// Primary candle series plus the optional finer-grained supporting series
/// handed to the narrative generator.
#[derive(Debug)]
pub struct AnalysisContext {
    pub primary: Vec<Candle>,
    pub support: Option<Vec<Candle>>,
}

/// Fetch candles for `symbol` at `timeframe` and layer the configured EMA
/// series on top.
pub async fn build_candle_view(
    client: &DerivClient,
    symbol: &str,
    timeframe: Timeframe,
    count: u32,
) -> Result<CandleView, ApiError> {
    let granularity = timeframe.granularity_secs();
    let candles = client.fetch_candles(symbol, granularity, count).await?;
    let enriched = enrich_candles(&candles)?;

    debug!(symbol, %timeframe, count = enriched.len(), "candle view built");
    Ok(CandleView {
        symbol: symbol.to_string(),
        timeframe: timeframe.to_string(),
        granularity,
        candles: enriched,
    })
}

/// Zip each candle with its per-period EMA values by index. The four
/// periods (20/50/100/200) are each computed independently from the raw
/// closes, never derived from one another.
fn enrich_candles(candles: &[Candle]) -> Result<Vec<EnrichedCandle>, ApiError> {
    let closes: Vec<f64> = candles.iter().map(|c| c.close).collect();

    let ema20 = compute_ema_series(&closes, 20)?;
    let ema50 = compute_ema_series(&closes, 50)?;
    let ema100 = compute_ema_series(&closes, 100)?;
    let ema200 = compute_ema_series(&closes, 200)?;

    Ok(candles
        .iter()
        .enumerate()
        .map(|(i, c)| EnrichedCandle {
            epoch: c.epoch,
            open: c.open,
            high: c.high,
            low: c.low,
            close: c.close,
            ema20: ema20[i],
            ema50: ema50[i],
            ema100: ema100[i],
            ema200: ema200[i],
        })
        .collect())
}

/// Fetch the primary series and, per the fixed pairing rule, a finer
/// supporting series. Either fetch failing aborts the whole operation.
pub async fn build_analysis_context(
    client: &DerivClient,
    symbol: &str,
    timeframe: Timeframe,
    count: u32,
) -> Result<AnalysisContext, ApiError> {
    fetch_context_series(timeframe, count, |granularity, n| {
        client.fetch_candles(symbol, granularity, n)
    })
    .await
}

/// Dual-fetch driver with the fetch itself injected: primary first, then —
/// when the timeframe pairs with a finer one — the supporting series.
/// Fetches are sequential; the first failure aborts.
async fn fetch_context_series<F, Fut>(
    timeframe: Timeframe,
    count: u32,
    mut fetch: F,
) -> Result<AnalysisContext, ApiError>
where
    F: FnMut(u32, u32) -> Fut,
    Fut: std::future::Future<Output = Result<Vec<Candle>, ApiError>>,
{
    let primary = fetch(timeframe.granularity_secs(), count).await?;

    let support = match timeframe.support() {
        Some((support_tf, support_count)) => {
            Some(fetch(support_tf.granularity_secs(), support_count).await?)
        }
        None => None,
    };

    Ok(AnalysisContext { primary, support })
}

/// Full narrative pipeline: dual-timeframe context in, free text out.
pub async fn analyze_market(
    client: &DerivClient,
    llm: &LlmClient,
    symbol: &str,
    timeframe: Timeframe,
    count: u32,
) -> Result<String, ApiError> {
    let context = build_analysis_context(client, symbol, timeframe, count).await?;

    let system_prompt = build_system_prompt(timeframe);
    let user_context = build_user_context(
        symbol,
        timeframe,
        &context.primary,
        context.support.as_deref(),
    );

    let narrative = llm.generate(&system_prompt, &user_context).await?;
    info!(symbol, %timeframe, "market analysis generated");
    Ok(narrative)
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    fn candles(closes: &[f64]) -> Vec<Candle> {
        closes
            .iter()
            .enumerate()
            .map(|(i, &close)| Candle {
                epoch: 1_700_000_000 + i as i64 * 60,
                open: close,
                high: close + 0.5,
                low: close - 0.5,
                close,
            })
            .collect()
    }

    #[test]
    fn enrichment_preserves_length_and_order() {
        let input = candles(&(1..=250).map(|x| x as f64).collect::<Vec<_>>());
        let enriched = enrich_candles(&input).unwrap();

        assert_eq!(enriched.len(), input.len());
        for (raw, out) in input.iter().zip(&enriched) {
            assert_eq!(raw.epoch, out.epoch);
            assert!((raw.close - out.close).abs() < f64::EPSILON);
        }
    }

    #[test]
    fn ema_columns_become_available_at_their_own_periods() {
        let input = candles(&(1..=250).map(|x| x as f64).collect::<Vec<_>>());
        let enriched = enrich_candles(&input).unwrap();

        // Each column turns on at index period-1, independently of the others.
        assert!(enriched[18].ema20.is_none());
        assert!(enriched[19].ema20.is_some());
        assert!(enriched[48].ema50.is_none());
        assert!(enriched[49].ema50.is_some());
        assert!(enriched[98].ema100.is_none());
        assert!(enriched[99].ema100.is_some());
        assert!(enriched[198].ema200.is_none());
        assert!(enriched[199].ema200.is_some());
    }

    #[test]
    fn ema_columns_are_independent() {
        // On a flat series every available EMA equals the price, whatever the
        // period; a short series only unlocks the shorter periods.
        let input = candles(&vec![42.0; 60]);
        let enriched = enrich_candles(&input).unwrap();

        let last = enriched.last().unwrap();
        assert!((last.ema20.unwrap() - 42.0).abs() < 1e-9);
        assert!((last.ema50.unwrap() - 42.0).abs() < 1e-9);
        assert!(last.ema100.is_none());
        assert!(last.ema200.is_none());
    }

    #[test]
    fn enrichment_of_empty_series_is_empty() {
        let enriched = enrich_candles(&[]).unwrap();
        assert!(enriched.is_empty());
    }

    // ---- analysis context dispatch -----------------------------------------

    #[tokio::test]
    async fn daily_context_fetches_hourly_support() {
        let requests = std::cell::RefCell::new(Vec::new());
        let context = fetch_context_series(Timeframe::D1, 90, |granularity, n| {
            requests.borrow_mut().push((granularity, n));
            async move { Ok(candles(&[1.0; 4])) }
        })
        .await
        .unwrap();

        assert_eq!(*requests.borrow(), vec![(86400, 90), (3600, 48)]);
        assert!(context.support.is_some());
    }

    #[tokio::test]
    async fn hourly_context_fetches_minute_support() {
        let requests = std::cell::RefCell::new(Vec::new());
        fetch_context_series(Timeframe::H1, 200, |granularity, n| {
            requests.borrow_mut().push((granularity, n));
            async move { Ok(candles(&[1.0; 4])) }
        })
        .await
        .unwrap();

        assert_eq!(*requests.borrow(), vec![(3600, 200), (60, 120)]);
    }

    #[tokio::test]
    async fn minute_context_has_no_support_fetch() {
        let requests = std::cell::RefCell::new(Vec::new());
        let context = fetch_context_series(Timeframe::M1, 200, |granularity, n| {
            requests.borrow_mut().push((granularity, n));
            async move { Ok(candles(&[1.0; 4])) }
        })
        .await
        .unwrap();

        assert_eq!(*requests.borrow(), vec![(60, 200)]);
        assert!(context.support.is_none());
    }

    #[tokio::test]
    async fn support_fetch_failure_aborts_the_context() {
        let calls = std::cell::Cell::new(0u32);
        let result = fetch_context_series(Timeframe::D1, 90, |_granularity, _n| {
            let n = calls.get();
            calls.set(n + 1);
            async move {
                if n == 0 {
                    Ok(candles(&[1.0; 4]))
                } else {
                    Err(ApiError::QuoteFetch("no candles returned from Deriv".into()))
                }
            }
        })
        .await;

        assert!(matches!(result, Err(ApiError::QuoteFetch(_))));
        assert_eq!(calls.get(), 2);
    }

    #[tokio::test]
    async fn primary_fetch_failure_skips_the_support_fetch() {
        let calls = std::cell::Cell::new(0u32);
        let result = fetch_context_series(Timeframe::D1, 90, |_granularity, _n| {
            calls.set(calls.get() + 1);
            async { Err(ApiError::QuoteFetch("connect failed".into())) }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn candle_view_serializes_unavailable_ema_as_null() {
        let input = candles(&(1..=25).map(|x| x as f64).collect::<Vec<_>>());
        let view = CandleView {
            symbol: "BOOM500".to_string(),
            timeframe: "1m".to_string(),
            granularity: 60,
            candles: enrich_candles(&input).unwrap(),
        };
        let json = serde_json::to_value(&view).unwrap();
        assert_eq!(json["candles"][0]["ema20"], serde_json::Value::Null);
        assert!(json["candles"][19]["ema20"].is_f64());
        assert_eq!(json["granularity"], 60);
    }
}
