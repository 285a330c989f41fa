// =============================================================================
// Deriv Quote Session Client — WebSocket candle history with bounded retry
// =============================================================================
//
// Each fetch is a self-contained session: connect, optionally authorize,
// send one ticks_history request, read one reply, close. Nothing is pooled
// or reused across calls; a failed attempt always starts over with a fresh
// connection.
//
// Faults carry a Transient/Fatal tag and the retry driver inspects the tag:
// network errors, timeouts, and empty results are retried with linear
// backoff; a rejected authorization or a malformed payload aborts the call
// immediately.
// =============================================================================

use std::future::Future;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde::Serialize;
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, instrument, warn};

use crate::config::Settings;
use crate::error::ApiError;
use crate::types::Candle;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Connection establishment bound.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
/// Bound for the authorize send and its reply.
const AUTH_TIMEOUT: Duration = Duration::from_secs(10);
/// Bound for sending the history request.
const SEND_TIMEOUT: Duration = Duration::from_secs(10);
/// Bound for the history reply. Longer than the send bounds — the provider
/// computes the series server-side.
const RESPONSE_TIMEOUT: Duration = Duration::from_secs(15);
/// Base backoff delay; attempt `n` waits `n * BASE_RETRY_DELAY`.
const BASE_RETRY_DELAY: Duration = Duration::from_millis(500);
/// Default number of retries after the first attempt.
const DEFAULT_RETRIES: u32 = 2;

// =============================================================================
// Fault tag
// =============================================================================

/// A single-attempt failure, tagged by whether a retry can help.
#[derive(Debug)]
pub(crate) enum FetchFailure {
    /// Network error, timeout, dropped connection, or an empty/errored
    /// history reply — another attempt may succeed.
    Transient(String),
    /// Authorization rejected or the payload violates the provider
    /// contract — retrying would fail the same way.
    Fatal(String),
}

// =============================================================================
// Wire types
// =============================================================================

/// Outbound ticks_history request. Field names are wire-exact.
#[derive(Debug, Serialize)]
struct HistoryRequest<'a> {
    ticks_history: &'a str,
    style: &'a str,
    granularity: u32,
    count: u32,
    end: &'a str,
}

// =============================================================================
// Client
// =============================================================================

/// Deriv WebSocket API client.
///
/// Holds only immutable configuration; concurrent fetches are independent
/// and each owns its connection for the duration of the call.
#[derive(Clone)]
pub struct DerivClient {
    endpoint: String,
    app_id: u32,
    token: Option<String>,
    retries: u32,
    base_delay: Duration,
}

impl DerivClient {
    /// Create a new `DerivClient`.
    ///
    /// # Arguments
    /// * `endpoint` — WebSocket endpoint, e.g. `wss://ws.binaryws.com/websockets/v3`
    /// * `app_id`   — Deriv application identifier, appended to the URL
    /// * `token`    — optional API token; when set, every session authorizes
    ///                before requesting history
    pub fn new(endpoint: impl Into<String>, app_id: u32, token: Option<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            app_id,
            token,
            retries: DEFAULT_RETRIES,
            base_delay: BASE_RETRY_DELAY,
        }
    }

    pub fn from_settings(settings: &Settings) -> Self {
        Self::new(
            settings.deriv_endpoint.clone(),
            settings.deriv_app_id,
            settings.deriv_token.clone(),
        )
    }

    fn ws_url(&self) -> String {
        format!("{}?app_id={}", self.endpoint, self.app_id)
    }

    /// Fetch `count` historical candles for `symbol` at `granularity`
    /// seconds per bar, retrying transient failures.
    ///
    /// Candles come back in provider order. Deriv documents the series as
    /// ascending by epoch; an out-of-order pair is logged but not re-sorted
    /// so that upstream data problems stay visible.
    #[instrument(skip(self), name = "deriv::fetch_candles")]
    pub async fn fetch_candles(
        &self,
        symbol: &str,
        granularity: u32,
        count: u32,
    ) -> Result<Vec<Candle>, ApiError> {
        // The request does not vary between attempts; an encode failure here
        // is our fault, not the provider's.
        let request = HistoryRequest {
            ticks_history: symbol,
            style: "candles",
            granularity,
            count,
            end: "latest",
        };
        let payload = serde_json::to_string(&request)
            .map_err(|e| ApiError::Internal(format!("failed to encode history request: {e}")))?;

        let candles = fetch_with_retry(self.retries, self.base_delay, |_attempt| {
            self.attempt_fetch(symbol, &payload)
        })
        .await?;

        if let Some(pair) = candles.windows(2).find(|w| w[1].epoch < w[0].epoch) {
            warn!(
                symbol,
                prev_epoch = pair[0].epoch,
                next_epoch = pair[1].epoch,
                "Deriv returned candles out of epoch order"
            );
        }

        debug!(symbol, granularity, count = candles.len(), "candles fetched");
        Ok(candles)
    }

    /// One full connect → authorize → request → receive → close cycle.
    async fn attempt_fetch(&self, symbol: &str, payload: &str) -> Result<Vec<Candle>, FetchFailure> {
        let url = self.ws_url();
        debug!(symbol, "connecting to Deriv WebSocket");

        let connected = timeout(CONNECT_TIMEOUT, connect_async(&url))
            .await
            .map_err(|_| FetchFailure::Transient("connect timed out".to_string()))?;
        let (mut ws, _response) =
            connected.map_err(|e| FetchFailure::Transient(format!("connect failed: {e}")))?;

        let result = self.run_session(&mut ws, payload).await;

        // Close frame on every exit path, success or failure; the stream is
        // dropped right after regardless.
        let _ = ws.close(None).await;

        result
    }

    /// The message exchange on an established connection.
    async fn run_session(
        &self,
        ws: &mut WsStream,
        payload: &str,
    ) -> Result<Vec<Candle>, FetchFailure> {
        if let Some(token) = &self.token {
            authorize(ws, token).await?;
        }

        send_text(ws, payload.to_string(), SEND_TIMEOUT, "history request").await?;
        let reply = recv_text(ws, RESPONSE_TIMEOUT, "history response").await?;

        parse_history_response(&reply)
    }
}

impl std::fmt::Debug for DerivClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DerivClient")
            .field("endpoint", &self.endpoint)
            .field("app_id", &self.app_id)
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

// =============================================================================
// Retry driver
// =============================================================================

/// Run `attempt` up to `retries + 1` times with linear backoff between
/// attempts. A `Fatal` failure propagates immediately; exhausting the
/// budget wraps the last transient cause.
async fn fetch_with_retry<F, Fut>(
    retries: u32,
    base_delay: Duration,
    mut attempt: F,
) -> Result<Vec<Candle>, ApiError>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<Vec<Candle>, FetchFailure>>,
{
    let mut last_transient = String::new();

    for n in 0..=retries {
        if n > 0 {
            tokio::time::sleep(base_delay * n).await;
        }
        match attempt(n).await {
            Ok(candles) => return Ok(candles),
            Err(FetchFailure::Fatal(msg)) => return Err(ApiError::QuoteFetch(msg)),
            Err(FetchFailure::Transient(msg)) => {
                warn!(attempt = n + 1, error = %msg, "transient quote fetch failure");
                last_transient = msg;
            }
        }
    }

    Err(ApiError::QuoteFetch(format!(
        "Deriv connection failed after {} attempts: {last_transient}",
        retries + 1
    )))
}

// =============================================================================
// Session steps
// =============================================================================

/// Send the authorize message and check its reply.
///
/// A rejection is a configuration fault, not a network hiccup, so it is
/// tagged `Fatal` and never retried.
async fn authorize(ws: &mut WsStream, token: &str) -> Result<(), FetchFailure> {
    let msg = serde_json::json!({ "authorize": token }).to_string();
    send_text(ws, msg, AUTH_TIMEOUT, "authorize request").await?;

    let reply = recv_text(ws, AUTH_TIMEOUT, "authorize reply").await?;
    let value: Value = serde_json::from_str(&reply)
        .map_err(|e| FetchFailure::Fatal(format!("authorize reply is not valid JSON: {e}")))?;

    if let Some(err) = value.get("error") {
        let detail = err
            .get("message")
            .and_then(|m| m.as_str())
            .unwrap_or("Authorization failed");
        return Err(FetchFailure::Fatal(format!("authorization rejected: {detail}")));
    }

    debug!("Deriv session authorized");
    Ok(())
}

/// Send a text frame within `wait`, tagging timeouts and write errors as
/// transient.
async fn send_text(
    ws: &mut WsStream,
    text: String,
    wait: Duration,
    what: &str,
) -> Result<(), FetchFailure> {
    timeout(wait, ws.send(Message::Text(text)))
        .await
        .map_err(|_| FetchFailure::Transient(format!("timed out sending {what}")))?
        .map_err(|e| FetchFailure::Transient(format!("failed to send {what}: {e}")))
}

/// Wait up to `wait` for the next text frame, skipping ping/pong/binary
/// frames. Stream end, close frames, read errors, and timeouts are all
/// transient.
async fn recv_text(ws: &mut WsStream, wait: Duration, what: &str) -> Result<String, FetchFailure> {
    let next_text = async {
        loop {
            match ws.next().await {
                Some(Ok(Message::Text(text))) => return Ok(text),
                Some(Ok(Message::Close(_))) | None => {
                    return Err(FetchFailure::Transient(format!(
                        "connection closed while waiting for {what}"
                    )));
                }
                Some(Ok(_)) => continue,
                Some(Err(e)) => {
                    return Err(FetchFailure::Transient(format!(
                        "read error while waiting for {what}: {e}"
                    )));
                }
            }
        }
    };

    timeout(wait, next_text)
        .await
        .map_err(|_| FetchFailure::Transient(format!("timed out waiting for {what}")))?
}

// =============================================================================
// Response parsing
// =============================================================================

/// Parse a ticks_history reply into candles.
///
/// A payload-level `error` object and a missing or empty `candles` array
/// are transient (instrument-not-found and off-hours conditions show up
/// this way and may clear on retry). Structural problems — invalid JSON,
/// missing epoch, non-numeric or non-finite prices — are fatal contract
/// violations.
fn parse_history_response(text: &str) -> Result<Vec<Candle>, FetchFailure> {
    let root: Value = serde_json::from_str(text)
        .map_err(|e| FetchFailure::Fatal(format!("history response is not valid JSON: {e}")))?;

    if let Some(err) = root.get("error") {
        let detail = err
            .get("message")
            .and_then(|m| m.as_str())
            .unwrap_or("Deriv API error");
        return Err(FetchFailure::Transient(detail.to_string()));
    }

    let raw = match root.get("candles").and_then(Value::as_array) {
        Some(arr) if !arr.is_empty() => arr,
        _ => {
            return Err(FetchFailure::Transient(
                "no candles returned from Deriv".to_string(),
            ));
        }
    };

    let mut candles = Vec::with_capacity(raw.len());
    for entry in raw {
        let epoch = entry
            .get("epoch")
            .and_then(Value::as_i64)
            .ok_or_else(|| FetchFailure::Fatal("candle entry missing integer epoch".to_string()))?;

        let open = parse_price(entry, "open")?;
        let high = parse_price(entry, "high")?;
        let low = parse_price(entry, "low")?;
        let close = parse_price(entry, "close")?;

        candles.push(Candle {
            epoch,
            open,
            high,
            low,
            close,
        });
    }

    Ok(candles)
}

/// Coerce a price field that may arrive as a JSON number or string.
fn parse_price(entry: &Value, field: &str) -> Result<f64, FetchFailure> {
    let val = entry
        .get(field)
        .ok_or_else(|| FetchFailure::Fatal(format!("candle entry missing field '{field}'")))?;

    let num = if let Some(s) = val.as_str() {
        s.parse::<f64>()
            .map_err(|_| FetchFailure::Fatal(format!("failed to parse {field} '{s}' as f64")))?
    } else if let Some(n) = val.as_f64() {
        n
    } else {
        return Err(FetchFailure::Fatal(format!(
            "candle field '{field}' has unexpected JSON type"
        )));
    };

    if !num.is_finite() {
        return Err(FetchFailure::Fatal(format!(
            "candle field '{field}' is not finite"
        )));
    }
    Ok(num)
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn sample_candles(n: usize) -> Vec<Candle> {
        (0..n)
            .map(|i| Candle {
                epoch: 1_700_000_000 + i as i64 * 60,
                open: 100.0,
                high: 101.0,
                low: 99.0,
                close: 100.5,
            })
            .collect()
    }

    // ---- request encoding --------------------------------------------------

    #[test]
    fn history_request_wire_fields() {
        let req = HistoryRequest {
            ticks_history: "BOOM500",
            style: "candles",
            granularity: 60,
            count: 200,
            end: "latest",
        };
        let json: Value = serde_json::to_value(&req).unwrap();
        assert_eq!(json["ticks_history"], "BOOM500");
        assert_eq!(json["style"], "candles");
        assert_eq!(json["granularity"], 60);
        assert_eq!(json["count"], 200);
        assert_eq!(json["end"], "latest");
    }

    #[test]
    fn ws_url_includes_app_id() {
        let client = DerivClient::new("wss://ws.binaryws.com/websockets/v3", 1089, None);
        assert_eq!(
            client.ws_url(),
            "wss://ws.binaryws.com/websockets/v3?app_id=1089"
        );
    }

    // ---- response parsing --------------------------------------------------

    #[test]
    fn parse_history_ok() {
        let json = r#"{
            "candles": [
                { "epoch": 1700000000, "open": 100.0, "high": 101.5, "low": 99.5, "close": 101.0 },
                { "epoch": 1700000060, "open": 101.0, "high": 102.0, "low": 100.5, "close": 101.8 }
            ]
        }"#;
        let candles = parse_history_response(json).expect("should parse");
        assert_eq!(candles.len(), 2);
        assert_eq!(candles[0].epoch, 1_700_000_000);
        assert!((candles[1].close - 101.8).abs() < f64::EPSILON);
    }

    #[test]
    fn parse_history_string_prices() {
        // Deriv occasionally serializes prices as strings.
        let json = r#"{
            "candles": [
                { "epoch": 1700000000, "open": "100.0", "high": "101.5", "low": "99.5", "close": "101.0" }
            ]
        }"#;
        let candles = parse_history_response(json).expect("should parse");
        assert!((candles[0].open - 100.0).abs() < f64::EPSILON);
    }

    #[test]
    fn parse_history_error_payload_is_transient() {
        let json = r#"{ "error": { "code": "MarketIsClosed", "message": "Market is closed." } }"#;
        match parse_history_response(json) {
            Err(FetchFailure::Transient(msg)) => assert_eq!(msg, "Market is closed."),
            other => panic!("expected transient failure, got {other:?}"),
        }
    }

    #[test]
    fn parse_history_empty_candles_is_transient() {
        for json in [r#"{ "candles": [] }"#, r#"{ "msg_type": "ticks_history" }"#] {
            match parse_history_response(json) {
                Err(FetchFailure::Transient(msg)) => {
                    assert!(msg.contains("no candles"), "unexpected message: {msg}")
                }
                other => panic!("expected transient failure, got {other:?}"),
            }
        }
    }

    #[test]
    fn parse_history_missing_epoch_is_fatal() {
        let json = r#"{ "candles": [ { "open": 1.0, "high": 1.0, "low": 1.0, "close": 1.0 } ] }"#;
        assert!(matches!(
            parse_history_response(json),
            Err(FetchFailure::Fatal(_))
        ));
    }

    #[test]
    fn parse_history_non_finite_price_is_fatal() {
        let json = r#"{ "candles": [ { "epoch": 1, "open": "NaN", "high": 1.0, "low": 1.0, "close": 1.0 } ] }"#;
        assert!(matches!(
            parse_history_response(json),
            Err(FetchFailure::Fatal(_))
        ));
    }

    #[test]
    fn parse_history_invalid_json_is_fatal() {
        assert!(matches!(
            parse_history_response("not json"),
            Err(FetchFailure::Fatal(_))
        ));
    }

    // ---- retry driver ------------------------------------------------------

    #[tokio::test]
    async fn retry_recovers_from_transient_failures() {
        let calls = AtomicU32::new(0);
        let result = fetch_with_retry(2, Duration::from_millis(1), |_| {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(FetchFailure::Transient("connection reset".to_string()))
                } else {
                    Ok(sample_candles(3))
                }
            }
        })
        .await;

        assert_eq!(result.unwrap().len(), 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn fatal_failure_is_never_retried() {
        let calls = AtomicU32::new(0);
        let result = fetch_with_retry(2, Duration::from_millis(1), |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(FetchFailure::Fatal("authorization rejected: bad token".to_string())) }
        })
        .await;

        assert!(matches!(result, Err(ApiError::QuoteFetch(ref msg)) if msg.contains("rejected")));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn exhausted_retries_wrap_last_transient_cause() {
        let calls = AtomicU32::new(0);
        let result = fetch_with_retry(2, Duration::from_millis(1), |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(FetchFailure::Transient("no candles returned from Deriv".to_string())) }
        })
        .await;

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        match result {
            Err(ApiError::QuoteFetch(msg)) => {
                assert!(msg.contains("after 3 attempts"), "unexpected message: {msg}");
                assert!(msg.contains("no candles returned"), "unexpected message: {msg}");
            }
            other => panic!("expected QuoteFetch error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn success_on_first_attempt_does_not_retry() {
        let calls = AtomicU32::new(0);
        let result = fetch_with_retry(2, Duration::from_millis(1), |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Ok(sample_candles(1)) }
        })
        .await;

        assert!(result.is_ok());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
