// =============================================================================
// Settings — process configuration read once at startup
// =============================================================================
//
// All tunables come from the environment (a `.env` file is loaded in main
// before this runs). The resulting value is immutable and passed into the
// client constructors; core logic never reads the environment directly.
// =============================================================================

use tracing::info;

/// Deriv WebSocket endpoint used when `DERIV_API_ENDPOINT` is unset.
const DEFAULT_DERIV_ENDPOINT: &str = "wss://ws.binaryws.com/websockets/v3";
/// Deriv's public demo application id.
const DEFAULT_APP_ID: u32 = 1089;
const DEFAULT_LLM_MODEL: &str = "gpt-4o-mini";
const DEFAULT_BIND_ADDR: &str = "0.0.0.0:8000";

#[derive(Debug, Clone)]
pub struct Settings {
    pub deriv_app_id: u32,
    pub deriv_endpoint: String,
    /// Optional API token; when present every quote session authorizes first.
    pub deriv_token: Option<String>,
    /// Chat-completions endpoint of the text-generation provider.
    pub llm_api_url: Option<String>,
    pub llm_api_key: Option<String>,
    pub llm_model: String,
    pub cors_allow_origins: Vec<String>,
    pub bind_addr: String,
}

impl Settings {
    /// Read settings from the process environment, falling back to defaults.
    pub fn from_env() -> Self {
        let settings = Self {
            deriv_app_id: env_parsed("DERIV_APP_ID", DEFAULT_APP_ID),
            deriv_endpoint: std::env::var("DERIV_API_ENDPOINT")
                .unwrap_or_else(|_| DEFAULT_DERIV_ENDPOINT.to_string()),
            deriv_token: env_non_empty("DERIV_TOKEN"),
            llm_api_url: env_non_empty("LLM_API_URL"),
            llm_api_key: env_non_empty("LLM_API_KEY"),
            llm_model: std::env::var("LLM_MODEL")
                .unwrap_or_else(|_| DEFAULT_LLM_MODEL.to_string()),
            cors_allow_origins: parse_origins(
                &std::env::var("CORS_ALLOW_ORIGINS").unwrap_or_else(|_| "*".to_string()),
            ),
            bind_addr: std::env::var("BIND_ADDR")
                .unwrap_or_else(|_| DEFAULT_BIND_ADDR.to_string()),
        };

        info!(
            app_id = settings.deriv_app_id,
            endpoint = %settings.deriv_endpoint,
            authorized = settings.deriv_token.is_some(),
            llm_configured = settings.llm_api_key.is_some(),
            "settings loaded"
        );
        settings
    }
}

/// Read an env var and parse it, falling back to `default` when missing or
/// unparseable.
fn env_parsed<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

/// Read an env var, treating an empty or whitespace-only value as unset.
fn env_non_empty(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Split a comma-separated origin list, dropping empty entries.
fn parse_origins(raw: &str) -> Vec<String> {
    let origins: Vec<String> = raw
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect();
    if origins.is_empty() {
        vec!["*".to_string()]
    } else {
        origins
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn origins_split_and_trim() {
        let origins = parse_origins("http://localhost:5173, http://127.0.0.1:5173");
        assert_eq!(
            origins,
            vec!["http://localhost:5173", "http://127.0.0.1:5173"]
        );
    }

    #[test]
    fn origins_wildcard_passthrough() {
        assert_eq!(parse_origins("*"), vec!["*"]);
    }

    #[test]
    fn origins_empty_falls_back_to_wildcard() {
        assert_eq!(parse_origins(""), vec!["*"]);
        assert_eq!(parse_origins(" , "), vec!["*"]);
    }
}
