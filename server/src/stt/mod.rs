//! Streaming STT core: VAD segmentation, bounded transcription, per-session
//! pipeline and the `/v1/stream` endpoint.

pub mod engine;
pub mod pipeline;
pub mod pool;
pub mod vad;
pub mod ws;

pub use pool::TranscriptionPool;
pub use ws::SttState;
