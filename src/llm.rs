// =============================================================================
// LLM Collaborator — market narrative via an OpenAI-compatible chat endpoint
// =============================================================================
//
// The core hands this module a dual-timeframe candle context and gets back
// free text. Failures carry the provider's status/detail and are not
// retried here; the API key never appears in logs.
// =============================================================================

use serde_json::{json, Value};
use tracing::{debug, instrument};

use crate::config::Settings;
use crate::error::ApiError;
use crate::types::{Candle, Timeframe};

/// How many trailing primary closes are shown to the model.
const PRIMARY_CLOSE_WINDOW: usize = 120;
/// How many trailing supporting closes are shown to the model.
const SUPPORT_CLOSE_WINDOW: usize = 60;

const BIAS_RULE: &str = "Instrument bias: Boom 500 = longs only; Crash 500 = shorts only. If bias violates, say 'No setup: bias mismatch' and stop.\n";

/// Chat-completions client for the configured text-generation provider.
#[derive(Clone)]
pub struct LlmClient {
    api_url: Option<String>,
    api_key: Option<String>,
    model: String,
    http: reqwest::Client,
}

impl LlmClient {
    pub fn from_settings(settings: &Settings) -> Self {
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(60))
            .build()
            .expect("failed to build reqwest client");

        Self {
            api_url: settings.llm_api_url.clone(),
            api_key: settings.llm_api_key.clone(),
            model: settings.llm_model.clone(),
            http,
        }
    }

    /// Call the chat-completions endpoint with a system instruction and a
    /// user context, returning the generated narrative.
    ///
    /// When no API key or URL is configured this degrades to a fixed notice
    /// instead of failing, so the dashboard stays usable without a key.
    #[instrument(skip(self, system_prompt, user_context), name = "llm::generate")]
    pub async fn generate(
        &self,
        system_prompt: &str,
        user_context: &str,
    ) -> Result<String, ApiError> {
        let (api_url, api_key) = match (&self.api_url, &self.api_key) {
            (Some(url), Some(key)) => (url, key),
            _ => {
                return Ok(
                    "LLM API not configured. Provide LLM_API_URL and LLM_API_KEY to enable analysis."
                        .to_string(),
                );
            }
        };

        let body = json!({
            "model": self.model,
            "messages": [
                { "role": "system", "content": system_prompt },
                { "role": "user", "content": user_context },
            ],
            "temperature": 0.6,
            "max_tokens": 800,
            "top_p": 0.95,
            "stream": false,
        });

        let resp = self
            .http
            .post(api_url)
            .bearer_auth(api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| ApiError::Llm(format!("request failed: {e}")))?;

        let status = resp.status();
        if !status.is_success() {
            let detail = resp.text().await.unwrap_or_default();
            return Err(ApiError::Llm(format!("{status}: {detail}")));
        }

        let completion: Value = resp
            .json()
            .await
            .map_err(|e| ApiError::Llm(format!("failed to parse completion: {e}")))?;

        match extract_content(&completion) {
            Some(text) => {
                debug!(chars = text.len(), "narrative generated");
                Ok(text)
            }
            None => Err(ApiError::Llm(
                "completion contained no message content".to_string(),
            )),
        }
    }
}

impl std::fmt::Debug for LlmClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LlmClient")
            .field("api_url", &self.api_url)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("model", &self.model)
            .finish()
    }
}

/// Pull `choices[0].message.content` out of a chat-completions reply.
fn extract_content(completion: &Value) -> Option<String> {
    let content = completion
        .get("choices")?
        .as_array()?
        .first()?
        .get("message")?
        .get("content")?
        .as_str()?
        .trim();
    if content.is_empty() {
        None
    } else {
        Some(content.to_string())
    }
}

// =============================================================================
// Prompt construction
// =============================================================================

/// Build the timeframe-specific system instruction.
///
/// Each timeframe gets its own analysis process: daily projections are
/// validated against hourly structure, hourly against 1m micro-structure,
/// and 1m stands alone.
pub fn build_system_prompt(timeframe: Timeframe) -> String {
    match timeframe {
        Timeframe::D1 => format!(
            "You are a disciplined daily timeframe trading analyst. Follow ALL rules, keep output under 200 words.\n\
            {BIAS_RULE}\
            Daily Analysis Process:\n\
            1) Daily candle projection: Predict how the current daily candle will close (red/green). Check trend vs EMAs (20/50/100/200), momentum, exhaustion signs (very large/small candles at trend extremes), climax patterns.\n\
            2) Hourly validation: Use the provided hourly candles to see HOW the daily move was constructed. Look for: exhaustion in hourly structure, thrust-fade patterns, stalls, failed breakouts, retests of key levels, EMA relationship changes.\n\
            3) Key risks: Note any contradictions between daily bias and hourly structure.\n\
            Output: Bias check; daily projection (bullish/bearish close); hourly evidence (supporting/contradicting); key risks."
        ),
        Timeframe::H1 => format!(
            "You are a disciplined hourly timeframe trading analyst. Follow ALL rules, keep output under 200 words.\n\
            {BIAS_RULE}\
            Hourly Analysis Process:\n\
            1) Hourly candle projection: Predict the next 1-2 hourly candles. Check trend vs EMAs (20/50/100/200), momentum, exhaustion signs, pattern formations (engulfing, pin bars, hammers, double tops/bottoms).\n\
            2) 1-minute validation: Use the provided 1m candles to see HOW the current hourly candle is forming. Look for: micro-structure exhaustion, thrust-fade on 1m, rejections at levels, momentum shifts, failed follow-through.\n\
            3) POI (optional): If bias aligns and structure is favorable, suggest a reasonable 1m entry zone; otherwise state 'No clear POI'.\n\
            Output: Bias check; hourly projection; 1m micro-structure evidence; POI or 'No clear POI'; key risks."
        ),
        Timeframe::M1 => format!(
            "You are a disciplined intraday 1-minute trading analyst. Follow ALL rules, keep output under 180 words.\n\
            {BIAS_RULE}\
            1-Minute Analysis Process (only if context is favorable):\n\
            1) Micro-structure: Read recent 1m candles for pattern formations (hammer, engulfing, pin bar, double top/bottom, climax candles). Check trend vs EMAs (20/50/100/200).\n\
            2) Momentum: Is price extending the trend or showing reversal signs (exhaustion wicks, failed follow-through, rejection candles)?\n\
            3) POI: If bias aligns and structure is clear, suggest a specific 1m entry zone; otherwise state 'No clear POI' or 'Wait for better context'.\n\
            Output: Bias check; micro-structure read; momentum assessment; POI or wait signal; key risks."
        ),
    }
}

/// Build the user message: trailing close-price windows plus last closes for
/// the primary series and, when present, the supporting series.
pub fn build_user_context(
    symbol: &str,
    timeframe: Timeframe,
    primary: &[Candle],
    support: Option<&[Candle]>,
) -> String {
    let closes = trailing_closes(primary, PRIMARY_CLOSE_WINDOW);
    let last_close = closes
        .last()
        .map(|c| c.to_string())
        .unwrap_or_else(|| "N/A".to_string());

    let mut context = format!(
        "Symbol: {symbol}\nPrimary timeframe: {timeframe}\n\
        Primary closes (last {}): {closes:?}\nPrimary last close: {last_close}",
        closes.len()
    );

    if let Some(support) = support {
        let support_closes = trailing_closes(support, SUPPORT_CLOSE_WINDOW);
        let support_last = support_closes
            .last()
            .map(|c| c.to_string())
            .unwrap_or_else(|| "N/A".to_string());
        let label = match timeframe {
            Timeframe::D1 => "Hourly",
            _ => "1-minute",
        };
        context.push_str(&format!(
            "\n{label} support candles (last {}): {support_closes:?}\n{label} last close: {support_last}",
            support_closes.len()
        ));
    }

    context
}

fn trailing_closes(candles: &[Candle], window: usize) -> Vec<f64> {
    let start = candles.len().saturating_sub(window);
    candles[start..].iter().map(|c| c.close).collect()
}
