//! Transcription providers.
//!
//! A provider turns one PCM speech segment into a transcription record.
//! Remote providers get the segment wrapped in a minimal WAV container.
//! Selection happens once at startup from configuration.

use std::io::Cursor;
use std::sync::Arc;

use serde::Deserialize;
use tracing::debug;

use crate::config::{Settings, SttProvider};

const OPENAI_TRANSCRIPTIONS_URL: &str = "https://api.openai.com/v1/audio/transcriptions";
const DEEPGRAM_LISTEN_URL: &str = "https://api.deepgram.com/v1/listen";

/// One transcribed segment.
#[derive(Debug, Clone)]
pub struct Transcription {
    pub text: String,
    /// Seconds of audio covered by this segment.
    pub duration: f64,
    pub language: Option<String>,
    /// `exp(avg_logprob)` of the first provider segment, when reported.
    pub confidence: Option<f64>,
}

#[async_trait::async_trait]
pub trait TranscriptionProvider: Send + Sync {
    async fn transcribe(&self, pcm: &[u8], language: Option<&str>)
        -> anyhow::Result<Transcription>;
}

/// Choose a provider from configuration. Missing credentials are a startup
/// error, not a runtime surprise.
pub fn provider_from_settings(
    settings: &Settings,
) -> anyhow::Result<Arc<dyn TranscriptionProvider>> {
    match settings.stt_provider {
        SttProvider::OpenAi => {
            let api_key = settings
                .openai_api_key
                .clone()
                .ok_or_else(|| anyhow::anyhow!("OPENAI_API_KEY must be set for STT_PROVIDER=openai"))?;
            Ok(Arc::new(OpenAiProvider::new(
                api_key,
                settings.whisper_model_name.clone(),
                settings.audio_sample_rate,
            )))
        }
        SttProvider::Deepgram => {
            let api_key = settings.deepgram_api_key.clone().ok_or_else(|| {
                anyhow::anyhow!("DEEPGRAM_API_KEY must be set for STT_PROVIDER=deepgram")
            })?;
            Ok(Arc::new(DeepgramProvider::new(
                api_key,
                settings.audio_sample_rate,
            )))
        }
    }
}

/// Wrap raw 16-bit mono PCM in a WAV container.
pub fn wrap_wav(pcm: &[u8], sample_rate: u32) -> anyhow::Result<Vec<u8>> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut cursor = Cursor::new(Vec::new());
    {
        let mut writer = hound::WavWriter::new(&mut cursor, spec)?;
        for pair in pcm.chunks_exact(2) {
            writer.write_sample(i16::from_le_bytes([pair[0], pair[1]]))?;
        }
        writer.finalize()?;
    }
    Ok(cursor.into_inner())
}

/// Seconds of audio in a 16-bit mono PCM buffer.
pub fn pcm_duration_s(pcm: &[u8], sample_rate: u32) -> f64 {
    pcm.len() as f64 / (sample_rate as f64 * 2.0)
}

/// Average log-probability to a `[0, 1]` confidence, 4 decimal places.
pub fn confidence_from_logprob(avg_logprob: f64) -> f64 {
    (avg_logprob.exp() * 10_000.0).round() / 10_000.0
}

// MARK: - OpenAI

pub struct OpenAiProvider {
    http: reqwest::Client,
    api_key: String,
    model: String,
    sample_rate: u32,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct VerboseTranscription {
    text: String,
    #[serde(default)]
    language: Option<String>,
    #[serde(default)]
    duration: Option<f64>,
    #[serde(default)]
    segments: Option<Vec<VerboseSegment>>,
}

#[derive(Debug, Deserialize)]
struct VerboseSegment {
    #[serde(default)]
    avg_logprob: Option<f64>,
}

impl OpenAiProvider {
    pub fn new(api_key: String, model: String, sample_rate: u32) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_key,
            model,
            sample_rate,
            base_url: OPENAI_TRANSCRIPTIONS_URL.to_string(),
        }
    }
}

#[async_trait::async_trait]
impl TranscriptionProvider for OpenAiProvider {
    async fn transcribe(
        &self,
        pcm: &[u8],
        language: Option<&str>,
    ) -> anyhow::Result<Transcription> {
        if pcm.is_empty() {
            anyhow::bail!("empty audio segment");
        }
        let wav = wrap_wav(pcm, self.sample_rate)?;
        debug!(bytes = wav.len(), model = self.model, "Submitting segment to Whisper API");

        let file = reqwest::multipart::Part::bytes(wav)
            .file_name("audio.wav")
            .mime_str("audio/wav")?;
        let mut form = reqwest::multipart::Form::new()
            .part("file", file)
            .text("model", self.model.clone())
            .text("response_format", "verbose_json");
        if let Some(language) = language {
            form = form.text("language", language.to_string());
        }

        let response = self
            .http
            .post(&self.base_url)
            .bearer_auth(&self.api_key)
            .multipart(form)
            .send()
            .await?
            .error_for_status()?;
        let body: VerboseTranscription = response.json().await?;

        let confidence = body
            .segments
            .as_ref()
            .and_then(|segments| segments.first())
            .and_then(|segment| segment.avg_logprob)
            .map(confidence_from_logprob);

        Ok(Transcription {
            text: body.text,
            duration: body
                .duration
                .unwrap_or_else(|| pcm_duration_s(pcm, self.sample_rate)),
            language: body.language,
            confidence,
        })
    }
}

// MARK: - Deepgram

pub struct DeepgramProvider {
    http: reqwest::Client,
    api_key: String,
    sample_rate: u32,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct DeepgramResponse {
    #[serde(default)]
    results: Option<DeepgramResults>,
    #[serde(default)]
    duration: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct DeepgramResults {
    #[serde(default)]
    channels: Vec<DeepgramChannel>,
}

#[derive(Debug, Deserialize)]
struct DeepgramChannel {
    #[serde(default)]
    alternatives: Vec<DeepgramAlternative>,
}

#[derive(Debug, Deserialize)]
struct DeepgramAlternative {
    #[serde(default)]
    transcript: String,
}

impl DeepgramProvider {
    pub fn new(api_key: String, sample_rate: u32) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_key,
            sample_rate,
            base_url: DEEPGRAM_LISTEN_URL.to_string(),
        }
    }
}

#[async_trait::async_trait]
impl TranscriptionProvider for DeepgramProvider {
    async fn transcribe(
        &self,
        pcm: &[u8],
        language: Option<&str>,
    ) -> anyhow::Result<Transcription> {
        if pcm.is_empty() {
            anyhow::bail!("empty audio segment");
        }
        let wav = wrap_wav(pcm, self.sample_rate)?;

        let mut request = self
            .http
            .post(&self.base_url)
            .header("Authorization", format!("Token {}", self.api_key))
            .header("Content-Type", "audio/wav")
            .query(&[("model", "nova")]);
        if let Some(language) = language {
            request = request.query(&[("language", language)]);
        }

        let response = request.body(wav).send().await?.error_for_status()?;
        let body: DeepgramResponse = response.json().await?;

        let text = body
            .results
            .and_then(|r| r.channels.into_iter().next())
            .and_then(|c| c.alternatives.into_iter().next())
            .map(|a| a.transcript)
            .unwrap_or_default();

        Ok(Transcription {
            text,
            duration: body
                .duration
                .unwrap_or_else(|| pcm_duration_s(pcm, self.sample_rate)),
            language: language.map(str::to_string),
            confidence: None,
        })
    }
}
