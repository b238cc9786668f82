//! Environment-driven configuration.
//!
//! All knobs are read once at startup into a [`Settings`] value that gets
//! passed into the router and worker constructors. Nothing in this crate
//! reads the process environment after boot.

use std::path::PathBuf;
use std::time::Duration;

/// Placeholder secret shipped in `.env.example`; flagged at startup.
const PLACEHOLDER_SECRET: &str = "CHANGE_ME";

/// Bus channels the orchestrator fans out to WebSocket clients.
pub const SUBSCRIBE_CHANNELS: [&str; 6] = [
    "transcripts",
    "intents",
    "components",
    "insights",
    "design_specs",
    "service_status",
];

/// Bus channel names used by publishers.
pub const TRANSCRIPTS_CHANNEL: &str = "transcripts";
pub const INTENTS_CHANNEL: &str = "intents";
pub const DESIGN_SPECS_CHANNEL: &str = "design_specs";
pub const COMPONENTS_CHANNEL: &str = "components";
pub const INSIGHTS_CHANNEL: &str = "insights";

/// Which speech-to-text backend the transcription pool talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SttProvider {
    OpenAi,
    Deepgram,
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub redis_url: String,

    pub jwt_secret_key: String,
    pub jwt_algorithm: String,
    pub jwt_access_token_expire_minutes: i64,

    pub websocket_max_queue_size: usize,
    pub websocket_heartbeat_interval_s: f64,

    pub stt_provider: SttProvider,
    pub openai_api_key: Option<String>,
    pub deepgram_api_key: Option<String>,
    pub whisper_model_name: String,
    pub whisper_max_buffered_chunks: usize,
    /// Cadence for the incremental-partial extension. Parsed and carried so
    /// the pipeline can adopt it without a config change; the shipped
    /// emission path is final-only.
    pub whisper_partial_result_interval_s: f64,

    pub vad_threshold: f32,
    pub vad_min_silence_duration_ms: u32,
    pub vad_min_speech_duration_ms: u32,
    pub vad_window_size_samples: usize,
    pub audio_sample_rate: u32,

    pub mappings_file_path: PathBuf,
    pub enable_hot_reload: bool,
    pub file_watch_interval_seconds: f64,

    pub confidence_threshold: f64,

    pub stt_service_ws_url: String,
    pub server_port: u16,
    pub enable_metrics: bool,
}

impl Settings {
    /// Read settings from the process environment.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read settings through an injected lookup. Tests pass a map here so
    /// they never mutate the process environment.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let stt_provider = match lookup("STT_PROVIDER").as_deref() {
            Some("deepgram") => SttProvider::Deepgram,
            Some("openai") | None => SttProvider::OpenAi,
            Some(other) => {
                tracing::warn!(provider = other, "Unknown STT_PROVIDER, using openai");
                SttProvider::OpenAi
            }
        };

        Self {
            redis_url: lookup("REDIS_URL")
                .unwrap_or_else(|| "redis://localhost:6379/0".to_string()),

            jwt_secret_key: lookup("JWT_SECRET_KEY")
                .unwrap_or_else(|| "!!CHANGE_ME_TO_A_STRONG_RANDOM_SECRET_KEY!!".to_string()),
            jwt_algorithm: lookup("JWT_ALGORITHM").unwrap_or_else(|| "HS256".to_string()),
            jwt_access_token_expire_minutes: parse_or(
                &lookup,
                "JWT_ACCESS_TOKEN_EXPIRE_MINUTES",
                60 * 24 * 7,
            ),

            websocket_max_queue_size: parse_or(&lookup, "WEBSOCKET_MAX_QUEUE_SIZE", 100),
            websocket_heartbeat_interval_s: parse_or(
                &lookup,
                "WEBSOCKET_HEARTBEAT_INTERVAL_S",
                25.0,
            ),

            stt_provider,
            openai_api_key: lookup("OPENAI_API_KEY").filter(|v| !v.is_empty()),
            deepgram_api_key: lookup("DEEPGRAM_API_KEY").filter(|v| !v.is_empty()),
            whisper_model_name: lookup("WHISPER_MODEL_NAME")
                .unwrap_or_else(|| "whisper-1".to_string()),
            whisper_max_buffered_chunks: parse_or(&lookup, "WHISPER_MAX_BUFFERED_CHUNKS", 4),
            whisper_partial_result_interval_s: parse_or(
                &lookup,
                "WHISPER_PARTIAL_RESULT_INTERVAL_S",
                0.4,
            ),

            vad_threshold: parse_or(&lookup, "VAD_THRESHOLD", 0.6),
            vad_min_silence_duration_ms: parse_or(&lookup, "VAD_MIN_SILENCE_DURATION_MS", 350),
            vad_min_speech_duration_ms: parse_or(&lookup, "VAD_MIN_SPEECH_DURATION_MS", 100),
            vad_window_size_samples: parse_or(&lookup, "VAD_WINDOW_SIZE_SAMPLES", 512),
            audio_sample_rate: parse_or(&lookup, "AUDIO_SAMPLE_RATE", 16_000),

            mappings_file_path: PathBuf::from(
                lookup("MAPPINGS_FILE_PATH").unwrap_or_else(|| "data/mappings.json".to_string()),
            ),
            enable_hot_reload: lookup("ENABLE_HOT_RELOAD")
                .map(|v| truthy(&v))
                .unwrap_or(true),
            file_watch_interval_seconds: parse_or(&lookup, "FILE_WATCH_INTERVAL_SECONDS", 2.0),

            confidence_threshold: parse_or(&lookup, "CONFIDENCE_THRESHOLD", 0.75),

            stt_service_ws_url: lookup("STT_SERVICE_WS_URL")
                .unwrap_or_else(|| "ws://127.0.0.1:8000/v1/stream".to_string()),
            server_port: parse_or(&lookup, "SERVER_PORT", 8000),
            enable_metrics: lookup("ENABLE_METRICS").map(|v| truthy(&v)).unwrap_or(false),
        }
    }

    /// True when the JWT secret is missing or still the shipped placeholder.
    /// The service keeps running in that state but logs it as critical.
    pub fn jwt_secret_is_placeholder(&self) -> bool {
        self.jwt_secret_key.is_empty() || self.jwt_secret_key.contains(PLACEHOLDER_SECRET)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs_f64(self.websocket_heartbeat_interval_s.max(0.1))
    }

    /// Receiver read timeout: heartbeat interval plus a 5 s grace.
    pub fn receive_timeout(&self) -> Duration {
        self.heartbeat_interval() + Duration::from_secs(5)
    }

    pub fn watch_interval(&self) -> Duration {
        Duration::from_secs_f64(self.file_watch_interval_seconds.max(0.1))
    }
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> T
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr + Copy,
{
    match lookup(key) {
        Some(raw) => match raw.trim().parse() {
            Ok(value) => value,
            Err(_) => {
                tracing::warn!(key, raw, "Unparseable setting, using default");
                default
            }
        },
        None => default,
    }
}

pub fn truthy(value: &str) -> bool {
    matches!(value, "1" | "true" | "TRUE" | "yes" | "YES")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn settings_from(pairs: &[(&str, &str)]) -> Settings {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Settings::from_lookup(|key| map.get(key).cloned())
    }

    #[test]
    fn defaults_apply_when_unset() {
        let settings = settings_from(&[]);
        assert_eq!(settings.websocket_max_queue_size, 100);
        assert_eq!(settings.vad_window_size_samples, 512);
        assert_eq!(settings.audio_sample_rate, 16_000);
        assert_eq!(settings.stt_provider, SttProvider::OpenAi);
        assert!(settings.enable_hot_reload);
        assert!(settings.jwt_secret_is_placeholder());
    }

    #[test]
    fn values_override_defaults() {
        let settings = settings_from(&[
            ("WEBSOCKET_MAX_QUEUE_SIZE", "5"),
            ("VAD_THRESHOLD", "0.8"),
            ("STT_PROVIDER", "deepgram"),
            ("JWT_SECRET_KEY", "testsecret"),
            ("ENABLE_HOT_RELOAD", "false"),
        ]);
        assert_eq!(settings.websocket_max_queue_size, 5);
        assert!((settings.vad_threshold - 0.8).abs() < f32::EPSILON);
        assert_eq!(settings.stt_provider, SttProvider::Deepgram);
        assert!(!settings.jwt_secret_is_placeholder());
        assert!(!settings.enable_hot_reload);
    }

    #[test]
    fn unparseable_value_falls_back() {
        let settings = settings_from(&[("WEBSOCKET_MAX_QUEUE_SIZE", "lots")]);
        assert_eq!(settings.websocket_max_queue_size, 100);
    }

    #[test]
    fn receive_timeout_adds_grace() {
        let settings = settings_from(&[("WEBSOCKET_HEARTBEAT_INTERVAL_S", "10")]);
        assert_eq!(settings.receive_timeout(), Duration::from_secs(15));
    }
}
