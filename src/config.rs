//! Process configuration ("Configuration"): a single source read
//! once at startup from environment variables.
//!
//! Grounded on `examples/original_source/scheduling/config.py`'s
//! environment-variable-with-defaults style, translated into a plain struct
//! loaded once in `main`. Optional integrations that are absent log a
//! warning rather than failing startup ("Configuration absent");
//! only a missing LLM API key for a configured provider that requires one
//! is a hard failure.
use std::env;

#[derive(Debug, Clone)]
pub struct Config {
    pub llm_provider: String,
    pub llm_api_key: Option<String>,
    pub model: String,
    pub stt_model_path: Option<String>,
    pub tts_voice: String,
    pub tts_engine: String,
    pub telephony_account_sid: Option<String>,
    pub telephony_auth_token: Option<String>,
    pub calendar_credentials_path: Option<String>,
    pub calendar_id: Option<String>,
    pub calendar_timezone: String,
    pub search_service_url: Option<String>,
    pub admin_api_key: Option<String>,
    pub host: String,
    pub port: u16,
    pub webrtc_port: u16,
    pub admin_port: u16,
    pub debug_flag: bool,
    pub ice_servers_fallback_json: Option<String>,
    pub workflow_dir: String,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("provider '{0}' requires an LLM API key (set LLM_API_KEY)")]
    MissingLlmApiKey(String),
    #[error("PORT, WEBRTC_PORT, and ADMIN_PORT must all be distinct (got {0})")]
    DuplicatePorts(u16),
}

fn env_var(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.is_empty())
}

fn env_var_or(key: &str, default: &str) -> String {
    env_var(key).unwrap_or_else(|| default.to_string())
}

fn env_flag(key: &str) -> bool {
    matches!(env_var(key).as_deref(), Some("1") | Some("true") | Some("TRUE"))
}

impl Config {
    /// Loads configuration from the process environment, warning on missing
    /// optional integrations and hard-failing only when the configured LLM
    /// provider has no API key.
    pub fn from_env() -> Result<Self, ConfigError> {
        let llm_provider = env_var_or("LLM_PROVIDER", "openai");
        let llm_api_key = env_var("LLM_API_KEY");
        if llm_provider != "local" && llm_api_key.is_none() {
            return Err(ConfigError::MissingLlmApiKey(llm_provider));
        }

        let telephony_account_sid = env_var("TELEPHONY_ACCOUNT_SID");
        let telephony_auth_token = env_var("TELEPHONY_AUTH_TOKEN");
        if telephony_account_sid.is_none() || telephony_auth_token.is_none() {
            tracing::warn!("telephony credentials not configured; NAT traversal will fall back to static ICE servers");
        }

        let search_service_url = env_var("SEARCH_SERVICE_URL");
        if search_service_url.is_none() {
            tracing::warn!("SEARCH_SERVICE_URL not configured; apartment_search tool calls will fail");
        }

        let calendar_id = env_var("CALENDAR_ID");
        if calendar_id.is_none() {
            tracing::warn!("CALENDAR_ID not configured; calendar tool calls will fail");
        }

        let admin_api_key = env_var("ADMIN_API_KEY");
        let debug_flag = env_flag("DEBUG_FLAG");
        if admin_api_key.is_none() && !debug_flag {
            tracing::warn!("ADMIN_API_KEY not configured and DEBUG_FLAG is unset; admin surface will be closed");
        }

        let port = env_var("PORT").and_then(|v| v.parse().ok()).unwrap_or(8080);
        let webrtc_port = env_var("WEBRTC_PORT").and_then(|v| v.parse().ok()).unwrap_or(8082);
        let admin_port = env_var("ADMIN_PORT").and_then(|v| v.parse().ok()).unwrap_or(8081);
        if port == webrtc_port || port == admin_port || webrtc_port == admin_port {
            let duplicate = if port == webrtc_port || port == admin_port { port } else { webrtc_port };
            return Err(ConfigError::DuplicatePorts(duplicate));
        }

        Ok(Self {
            llm_provider,
            llm_api_key,
            model: env_var_or("LLM_MODEL", "gpt-4o-mini"),
            stt_model_path: env_var("STT_MODEL_PATH"),
            tts_voice: env_var_or("TTS_VOICE", "default"),
            tts_engine: env_var_or("TTS_ENGINE", "default"),
            telephony_account_sid,
            telephony_auth_token,
            calendar_credentials_path: env_var("CALENDAR_CREDENTIALS_PATH"),
            calendar_id,
            calendar_timezone: env_var_or("CALENDAR_TIMEZONE", "America/New_York"),
            search_service_url,
            admin_api_key,
            host: env_var_or("HOST", "0.0.0.0"),
            port,
            webrtc_port,
            admin_port,
            debug_flag,
            ice_servers_fallback_json: env_var("ICE_SERVERS_FALLBACK_JSON"),
            workflow_dir: env_var_or("WORKFLOW_DIR", "./workflows"),
        })
    }
}
