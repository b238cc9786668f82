//! Bounded-concurrency transcription pool.
//!
//! A counting semaphore caps in-flight provider calls. Saturation is
//! observable at submission time so the pipeline can send its `slow` hint,
//! and provider failures collapse to `None` (the segment simply produces no
//! transcript).

use std::sync::Arc;

use tokio::sync::Semaphore;
use tracing::{debug, error};

use super::engine::{Transcription, TranscriptionProvider};

#[derive(Clone)]
pub struct TranscriptionPool {
    provider: Arc<dyn TranscriptionProvider>,
    semaphore: Arc<Semaphore>,
    max_in_flight: usize,
}

impl TranscriptionPool {
    pub fn new(provider: Arc<dyn TranscriptionProvider>, max_in_flight: usize) -> Self {
        let max_in_flight = max_in_flight.max(1);
        Self {
            provider,
            semaphore: Arc::new(Semaphore::new(max_in_flight)),
            max_in_flight,
        }
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight
    }

    /// True when every permit is taken; a segment submitted now will wait.
    pub fn is_saturated(&self) -> bool {
        self.semaphore.available_permits() == 0
    }

    /// Transcribe one segment, waiting for a permit if the pool is full.
    pub async fn transcribe(&self, pcm: Vec<u8>, language: Option<String>) -> Option<Transcription> {
        let permit = self
            .semaphore
            .clone()
            .acquire_owned()
            .await
            .expect("pool semaphore is never closed");
        debug!(
            bytes = pcm.len(),
            available = self.semaphore.available_permits(),
            "Transcription permit acquired"
        );

        let result = self.provider.transcribe(&pcm, language.as_deref()).await;
        drop(permit);

        match result {
            Ok(transcription) => Some(transcription),
            Err(e) => {
                error!(error = %e, "Transcription failed, segment dropped");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct SlowProvider {
        current: AtomicUsize,
        peak: AtomicUsize,
    }

    #[async_trait::async_trait]
    impl TranscriptionProvider for SlowProvider {
        async fn transcribe(
            &self,
            _pcm: &[u8],
            _language: Option<&str>,
        ) -> anyhow::Result<Transcription> {
            let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            self.current.fetch_sub(1, Ordering::SeqCst);
            Ok(Transcription {
                text: "ok".to_string(),
                duration: 0.5,
                language: None,
                confidence: None,
            })
        }
    }

    struct FailingProvider;

    #[async_trait::async_trait]
    impl TranscriptionProvider for FailingProvider {
        async fn transcribe(
            &self,
            _pcm: &[u8],
            _language: Option<&str>,
        ) -> anyhow::Result<Transcription> {
            anyhow::bail!("provider unavailable")
        }
    }

    #[tokio::test]
    async fn concurrency_never_exceeds_capacity() {
        let provider = Arc::new(SlowProvider {
            current: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        });
        let pool = TranscriptionPool::new(provider.clone(), 2);

        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let pool = pool.clone();
                tokio::spawn(async move { pool.transcribe(vec![0u8; 64], None).await })
            })
            .collect();
        for task in tasks {
            assert!(task.await.unwrap().is_some());
        }

        assert!(provider.peak.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn saturation_is_visible_while_permits_are_held() {
        let pool = TranscriptionPool::new(
            Arc::new(SlowProvider {
                current: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
            }),
            1,
        );
        assert!(!pool.is_saturated());

        let running = {
            let pool = pool.clone();
            tokio::spawn(async move { pool.transcribe(vec![0u8; 64], None).await })
        };
        // Give the task a moment to take the only permit.
        tokio::time::sleep(Duration::from_millis(5)).await;
        assert!(pool.is_saturated());

        running.await.unwrap();
        assert!(!pool.is_saturated());
    }

    #[tokio::test]
    async fn provider_failure_yields_none() {
        let pool = TranscriptionPool::new(Arc::new(FailingProvider), 2);
        assert!(pool.transcribe(vec![0u8; 64], None).await.is_none());
        // Permit was released despite the failure.
        assert!(!pool.is_saturated());
    }

    #[test]
    fn zero_capacity_is_clamped_to_one() {
        let pool = TranscriptionPool::new(Arc::new(FailingProvider), 0);
        assert_eq!(pool.max_in_flight(), 1);
    }
}
