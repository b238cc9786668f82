//! Voice-activity segmentation over a 16-bit mono PCM stream.
//!
//! The segmenter is sans-io: callers feed raw byte chunks with `push` and
//! collect finalized speech segments; `flush` drains whatever is in flight
//! when the stream ends. The probability model behind the state machine is a
//! seam (`SpeechDetector`) so an RMS-energy detector and a neural detector
//! are interchangeable.

use tracing::debug;

/// Produces a speech probability for one fixed-size analysis window.
pub trait SpeechDetector: Send {
    /// Probability in `[0, 1]` that the window contains speech.
    fn speech_prob(&mut self, window: &[f32]) -> f32;

    /// Drop any internal state (hidden states, smoothing, ...).
    fn reset(&mut self);
}

/// RMS-energy detector. The probability is a smooth squash of the window's
/// RMS against a noise floor: silence scores 0, RMS at the floor scores 0.5,
/// loud speech approaches 1.
#[derive(Debug, Clone)]
pub struct EnergyDetector {
    noise_floor: f32,
}

impl EnergyDetector {
    pub fn new(noise_floor: f32) -> Self {
        Self { noise_floor }
    }

    fn rms(window: &[f32]) -> f32 {
        if window.is_empty() {
            return 0.0;
        }
        let sum_sq: f32 = window.iter().map(|s| s * s).sum();
        (sum_sq / window.len() as f32).sqrt()
    }
}

impl Default for EnergyDetector {
    fn default() -> Self {
        Self::new(0.02)
    }
}

impl SpeechDetector for EnergyDetector {
    fn speech_prob(&mut self, window: &[f32]) -> f32 {
        let rms = Self::rms(window);
        rms / (rms + self.noise_floor)
    }

    fn reset(&mut self) {}
}

#[derive(Debug, Clone, Copy)]
pub struct VadConfig {
    pub sample_rate: u32,
    pub window_size_samples: usize,
    pub threshold: f32,
    pub min_silence_ms: u32,
    pub min_speech_ms: u32,
}

impl VadConfig {
    pub fn from_settings(settings: &crate::config::Settings) -> Self {
        Self {
            sample_rate: settings.audio_sample_rate,
            window_size_samples: settings.vad_window_size_samples,
            threshold: settings.vad_threshold,
            min_silence_ms: settings.vad_min_silence_duration_ms,
            min_speech_ms: settings.vad_min_speech_duration_ms,
        }
    }
}

/// A finalized stretch of speech. `bytes` is contiguous sample-aligned PCM.
#[derive(Debug, Clone)]
pub struct SpeechSegment {
    pub bytes: Vec<u8>,
    pub is_final: bool,
}

impl SpeechSegment {
    pub fn duration_ms(&self, sample_rate: u32) -> f64 {
        self.bytes.len() as f64 / (sample_rate as f64 * 2.0) * 1000.0
    }
}

enum VadState {
    Idle,
    Speaking,
}

/// The Idle/Speaking state machine from the streaming STT core.
///
/// Silent windows right after speech are appended to the buffer (trailing
/// silence helps the transcriber) while the silence counter runs; once it
/// reaches `min_silence_ms` the buffer is emitted as a final segment if it
/// clears the minimum speech duration, and discarded otherwise.
pub struct VadSegmenter {
    detector: Box<dyn SpeechDetector>,
    config: VadConfig,
    /// Raw bytes not yet carved into analysis windows. A trailing sub-window
    /// remainder (including an odd final byte) is dropped at end of stream.
    pending: Vec<u8>,
    speech_frames: Vec<u8>,
    state: VadState,
    silence_ms: f64,
}

impl VadSegmenter {
    pub fn new(config: VadConfig, detector: Box<dyn SpeechDetector>) -> Self {
        Self {
            detector,
            config,
            pending: Vec::new(),
            speech_frames: Vec::new(),
            state: VadState::Idle,
            silence_ms: 0.0,
        }
    }

    fn window_bytes(&self) -> usize {
        self.config.window_size_samples * 2
    }

    fn window_duration_ms(&self) -> f64 {
        self.config.window_size_samples as f64 / self.config.sample_rate as f64 * 1000.0
    }

    /// Feed a chunk of the stream; returns every segment finalized by it.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<SpeechSegment> {
        let mut finalized = Vec::new();
        if chunk.is_empty() {
            return finalized;
        }
        self.pending.extend_from_slice(chunk);

        while self.pending.len() >= self.window_bytes() {
            let window: Vec<u8> = self.pending.drain(..self.window_bytes()).collect();
            let samples = samples_from_le_bytes(&window);
            let prob = self.detector.speech_prob(&samples);

            if prob >= self.config.threshold {
                if matches!(self.state, VadState::Idle) {
                    debug!(prob, "Speech started");
                    self.state = VadState::Speaking;
                    self.speech_frames.clear();
                }
                self.speech_frames.extend_from_slice(&window);
                self.silence_ms = 0.0;
            } else if matches!(self.state, VadState::Speaking) {
                self.speech_frames.extend_from_slice(&window);
                self.silence_ms += self.window_duration_ms();

                if self.silence_ms >= self.config.min_silence_ms as f64 {
                    if let Some(segment) = self.take_segment() {
                        finalized.push(segment);
                    }
                    self.state = VadState::Idle;
                    self.silence_ms = 0.0;
                }
            }
        }
        finalized
    }

    /// End of stream: emit in-flight speech as a final segment, subject to
    /// the same minimum-duration filter. Resets the segmenter.
    pub fn flush(&mut self) -> Option<SpeechSegment> {
        let segment = if matches!(self.state, VadState::Speaking) {
            self.take_segment()
        } else {
            None
        };
        self.reset();
        segment
    }

    pub fn reset(&mut self) {
        self.pending.clear();
        self.speech_frames.clear();
        self.state = VadState::Idle;
        self.silence_ms = 0.0;
        self.detector.reset();
    }

    fn take_segment(&mut self) -> Option<SpeechSegment> {
        let bytes = std::mem::take(&mut self.speech_frames);
        if bytes.is_empty() {
            return None;
        }
        let duration_ms = bytes.len() as f64 / (self.config.sample_rate as f64 * 2.0) * 1000.0;
        if duration_ms < self.config.min_speech_ms as f64 {
            debug!(duration_ms, "Dropping short speech segment");
            return None;
        }
        Some(SpeechSegment {
            bytes,
            is_final: true,
        })
    }
}

fn samples_from_le_bytes(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]) as f32 / i16::MAX as f32)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> VadConfig {
        VadConfig {
            sample_rate: 16_000,
            window_size_samples: 160, // 10 ms windows
            threshold: 0.6,
            min_silence_ms: 30,
            min_speech_ms: 20,
        }
    }

    fn segmenter() -> VadSegmenter {
        VadSegmenter::new(config(), Box::<EnergyDetector>::default())
    }

    fn pcm(amplitude: i16, samples: usize) -> Vec<u8> {
        std::iter::repeat(amplitude.to_le_bytes())
            .take(samples)
            .flatten()
            .collect()
    }

    fn speech(ms: usize) -> Vec<u8> {
        pcm(16_000, 16 * ms)
    }

    fn silence(ms: usize) -> Vec<u8> {
        pcm(0, 16 * ms)
    }

    #[test]
    fn energy_detector_scores_extremes() {
        let mut detector = EnergyDetector::default();
        assert!(detector.speech_prob(&[0.0; 160]) < 0.01);
        assert!(detector.speech_prob(&[0.5; 160]) > 0.9);
        assert_eq!(detector.speech_prob(&[]), 0.0);
    }

    #[test]
    fn silence_only_yields_nothing() {
        let mut seg = segmenter();
        assert!(seg.push(&silence(200)).is_empty());
        assert!(seg.flush().is_none());
    }

    #[test]
    fn empty_chunk_yields_nothing() {
        let mut seg = segmenter();
        assert!(seg.push(&[]).is_empty());
        assert!(seg.flush().is_none());
    }

    #[test]
    fn speech_then_silence_finalizes_one_segment() {
        let mut seg = segmenter();
        assert!(seg.push(&speech(100)).is_empty());
        let finalized = seg.push(&silence(60));
        assert_eq!(finalized.len(), 1);
        assert!(finalized[0].is_final);
        // Buffer holds the speech plus the silence windows counted toward
        // the threshold.
        let duration = finalized[0].duration_ms(16_000);
        assert!(duration >= 100.0, "duration={duration}");
        // Nothing further: stream went idle.
        assert!(seg.push(&silence(100)).is_empty());
    }

    #[test]
    fn short_burst_is_discarded() {
        let mut seg = segmenter();
        seg.push(&speech(10)); // below the 20 ms minimum
        assert!(seg.push(&silence(60)).is_empty());
        assert!(seg.flush().is_none());
    }

    #[test]
    fn stream_end_flushes_in_flight_speech() {
        let mut seg = segmenter();
        assert!(seg.push(&speech(80)).is_empty());
        let segment = seg.flush().expect("in-flight speech flushes as final");
        assert!(segment.is_final);
        assert!(segment.duration_ms(16_000) >= 80.0);
    }

    #[test]
    fn two_utterances_yield_two_segments() {
        let mut seg = segmenter();
        let mut stream = Vec::new();
        stream.extend(speech(100));
        stream.extend(silence(60));
        stream.extend(speech(100));
        stream.extend(silence(60));
        let finalized = seg.push(&stream);
        assert_eq!(finalized.len(), 2);
        assert!(finalized.iter().all(|s| s.is_final));
    }

    #[test]
    fn odd_length_chunk_does_not_crash_or_misalign() {
        let mut seg = segmenter();
        let mut chunk = speech(100);
        chunk.extend(silence(60));
        let odd_cut = chunk.len() - 1;
        let finalized_a = seg.push(&chunk[..odd_cut]);
        let finalized_b = seg.push(&chunk[odd_cut..]);
        assert_eq!(finalized_a.len() + finalized_b.len(), 1);
    }

    #[test]
    fn odd_trailing_byte_is_trimmed() {
        let mut seg = segmenter();
        let mut chunk = speech(80);
        chunk.push(0x7f); // dangling half-sample at end of stream
        seg.push(&chunk);
        let segment = seg.flush().expect("speech still flushes");
        assert_eq!(segment.bytes.len() % 2, 0);
    }

    #[test]
    fn segments_are_sample_aligned_windows() {
        let mut seg = segmenter();
        let finalized = seg.push(&[speech(100), silence(60)].concat());
        let window_bytes = 160 * 2;
        assert_eq!(finalized[0].bytes.len() % window_bytes, 0);
    }
}
