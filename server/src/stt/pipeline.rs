//! Per-session STT pipeline.
//!
//! One instance per streaming WebSocket: binary ingress → VAD segmentation →
//! bounded transcription → final emission → bus publication. Results are
//! consumed through a `FuturesOrdered`, so emission (and therefore bus
//! publication) follows segmenter order even while transcriptions overlap.

use axum::extract::ws::{close_code, CloseFrame, Message, WebSocket};
use futures::stream::FuturesOrdered;
use futures::StreamExt;
use tokio::task::{AbortHandle, JoinHandle};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::TRANSCRIPTS_CHANNEL;
use crate::models::{SttEvent, TranscriptMessage, TranscriptSegment};
use crate::stt::engine::Transcription;
use crate::stt::vad::{EnergyDetector, SpeechSegment, VadConfig, VadSegmenter};
use crate::stt::ws::SttState;

/// Utterance identity and timestamp accounting.
///
/// Timestamps are utterance-relative seconds. Partials advance the running
/// segment start; a final stamps the closing segment and rotates to a fresh
/// utterance id with the clock back at zero.
pub struct UtteranceClock {
    utterance_id: Uuid,
    segment_start_s: f64,
}

#[derive(Debug, Clone, Copy)]
pub struct Stamp {
    pub utterance_id: Uuid,
    pub ts_start: f64,
    pub ts_end: f64,
}

impl UtteranceClock {
    pub fn new() -> Self {
        Self {
            utterance_id: Uuid::new_v4(),
            segment_start_s: 0.0,
        }
    }

    pub fn on_partial(&mut self, duration_s: f64) -> Stamp {
        let stamp = Stamp {
            utterance_id: self.utterance_id,
            ts_start: self.segment_start_s,
            ts_end: self.segment_start_s + duration_s,
        };
        self.segment_start_s += duration_s;
        stamp
    }

    pub fn on_final(&mut self, duration_s: f64) -> Stamp {
        let stamp = Stamp {
            utterance_id: self.utterance_id,
            ts_start: self.segment_start_s,
            ts_end: self.segment_start_s + duration_s,
        };
        self.utterance_id = Uuid::new_v4();
        self.segment_start_s = 0.0;
        stamp
    }
}

impl Default for UtteranceClock {
    fn default() -> Self {
        Self::new()
    }
}

/// Drive one client's audio stream to completion.
pub async fn run_session(mut socket: WebSocket, session_id: String, state: SttState) {
    let vad_config = VadConfig::from_settings(&state.settings);
    let mut segmenter = VadSegmenter::new(vad_config, Box::<EnergyDetector>::default());
    let mut clock = UtteranceClock::new();
    let mut inflight: FuturesOrdered<JoinHandle<Option<Transcription>>> = FuturesOrdered::new();
    let mut abort_handles: Vec<AbortHandle> = Vec::new();

    info!(session = %session_id, "STT stream opened");

    let outcome: anyhow::Result<()> = async {
        loop {
            tokio::select! {
                incoming = socket.recv() => {
                    match incoming {
                        Some(Ok(Message::Binary(data))) => {
                            for segment in segmenter.push(&data) {
                                submit(&state, &mut socket, &mut inflight, &mut abort_handles, segment)
                                    .await?;
                            }
                        }
                        Some(Ok(Message::Close(_))) | None => break,
                        Some(Ok(_)) => {} // text/ping/pong frames carry no audio
                        Some(Err(e)) => return Err(e.into()),
                    }
                }
                Some(joined) = inflight.next(), if !inflight.is_empty() => {
                    let transcription = joined?;
                    emit(&state, &mut socket, &mut clock, &session_id, transcription).await?;
                }
            }
        }

        // Stream ended: flush in-flight speech, then drain the pool in order.
        if let Some(segment) = segmenter.flush() {
            submit(&state, &mut socket, &mut inflight, &mut abort_handles, segment).await?;
        }
        while let Some(joined) = inflight.next().await {
            let transcription = joined?;
            emit(&state, &mut socket, &mut clock, &session_id, transcription).await?;
        }
        Ok(())
    }
    .await;

    // Whatever is still queued must not outlive the session.
    for handle in &abort_handles {
        handle.abort();
    }

    match outcome {
        Ok(()) => info!(session = %session_id, "STT stream closed"),
        Err(e) => {
            error!(session = %session_id, error = %e, "STT pipeline failed");
            let notice = SttEvent::Error {
                message: "internal server error".to_string(),
            };
            let _ = socket.send(Message::Text(notice.to_json().into())).await;
            let _ = socket
                .send(Message::Close(Some(CloseFrame {
                    code: close_code::ERROR,
                    reason: "internal error".into(),
                })))
                .await;
        }
    }
}

async fn submit(
    state: &SttState,
    socket: &mut WebSocket,
    inflight: &mut FuturesOrdered<JoinHandle<Option<Transcription>>>,
    abort_handles: &mut Vec<AbortHandle>,
    segment: SpeechSegment,
) -> anyhow::Result<()> {
    // The saturation probe happens at arrival time, before queueing.
    if state.pool.is_saturated() {
        warn!("Transcription pool saturated, sending slow hint");
        socket
            .send(Message::Text(SttEvent::Slow.to_json().into()))
            .await?;
    }

    let pool = state.pool.clone();
    let task = tokio::spawn(async move { pool.transcribe(segment.bytes, None).await });
    abort_handles.push(task.abort_handle());
    inflight.push_back(task);
    Ok(())
}

async fn emit(
    state: &SttState,
    socket: &mut WebSocket,
    clock: &mut UtteranceClock,
    session_id: &str,
    transcription: Option<Transcription>,
) -> anyhow::Result<()> {
    // A failed transcription already logged itself; the client simply gets
    // no transcript for that segment.
    let Some(transcription) = transcription else {
        return Ok(());
    };
    if transcription.text.trim().is_empty() {
        debug!("Transcription returned no usable text, skipping");
        return Ok(());
    }

    let stamp = clock.on_final(transcription.duration);
    let segment = TranscriptSegment {
        msg_id: Uuid::new_v4(),
        utterance_id: stamp.utterance_id,
        text: transcription.text,
        ts_start: round3(stamp.ts_start),
        ts_end: round3(stamp.ts_end),
        speaker: Some(session_id.to_string()),
        confidence: transcription.confidence,
    };

    socket
        .send(Message::Text(SttEvent::Final(segment.clone()).to_json().into()))
        .await?;

    let record = TranscriptMessage {
        msg_id: segment.msg_id,
        utterance_id: segment.utterance_id,
        text: segment.text,
        ts_start: segment.ts_start,
        ts_end: segment.ts_end,
        speaker: segment.speaker,
        confidence: segment.confidence,
    };
    // Awaited before the next emission step so bus order equals emission
    // order; failures are logged, the pipeline keeps going.
    match state.bus.publish_json(TRANSCRIPTS_CHANNEL, &record).await {
        Ok(()) => {
            metrics::counter!("transcripts_published_total", 1);
            info!(utterance = %record.utterance_id, "Published final transcript");
        }
        Err(e) => warn!(error = %e, "Transcript publish failed"),
    }
    Ok(())
}

fn round3(value: f64) -> f64 {
    (value * 1000.0).round() / 1000.0
}
