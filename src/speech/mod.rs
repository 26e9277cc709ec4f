//! Speech-to-text captioning pipeline.
//!
//! A `CaptionPump` drains microphone chunks on a fixed cadence, hands them
//! to a `SpeechToText` provider, and appends every finalized segment to the
//! caption log. "No speech detected" is the one non-fatal condition: the
//! pump just keeps listening. Every other failure is logged and scoped to
//! its chunk; nothing is retried.

pub mod http_api;

pub use http_api::HttpSpeechProvider;

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::captions::CaptionLog;
use crate::model::User;

#[derive(Debug, Error)]
pub enum SpeechError {
    /// Silence or unintelligible audio. Non-fatal; listening restarts.
    #[error("no speech detected")]
    NoSpeech,

    #[error("speech service unavailable: {0}")]
    Unavailable(String),

    #[error("speech service rejected request: {0}")]
    Rejected(String),
}

/// One finalized transcript segment.
#[derive(Debug, Clone)]
pub struct TranscriptSegment {
    pub text: String,
    pub language: String,
}

/// Provider turning an audio chunk into a finalized segment.
#[async_trait]
pub trait SpeechToText: Send + Sync {
    fn name(&self) -> &'static str;

    async fn transcribe(
        &self,
        samples: &[f32],
        sample_rate: u32,
        language: &str,
    ) -> Result<TranscriptSegment, SpeechError>;
}

/// Source of raw audio chunks, drained once per pump cycle.
pub trait AudioChunkSource: Send {
    fn drain(&mut self) -> Vec<f32>;
    fn sample_rate(&self) -> u32;
}

/// Control handle for a running pump.
#[derive(Clone)]
pub struct PumpHandle {
    running: Arc<AtomicBool>,
    language: Arc<RwLock<String>>,
}

impl PumpHandle {
    pub fn stop(&self) {
        self.running.store(false, Ordering::Relaxed);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }

    pub fn language(&self) -> String {
        self.language.read().unwrap().clone()
    }

    /// Switch the recognition language; takes effect from the next chunk.
    pub fn set_language(&self, language: &str) {
        *self.language.write().unwrap() = language.to_string();
    }
}

pub struct CaptionPump {
    chunks: Box<dyn AudioChunkSource>,
    speech: Arc<dyn SpeechToText>,
    captions: Arc<CaptionLog>,
    author: User,
    interval: Duration,
    running: Arc<AtomicBool>,
    language: Arc<RwLock<String>>,
}

impl CaptionPump {
    pub fn new(
        chunks: Box<dyn AudioChunkSource>,
        speech: Arc<dyn SpeechToText>,
        captions: Arc<CaptionLog>,
        author: User,
        language: &str,
        chunk_seconds: u64,
    ) -> Self {
        Self {
            chunks,
            speech,
            captions,
            author,
            interval: Duration::from_secs(chunk_seconds.max(1)),
            running: Arc::new(AtomicBool::new(false)),
            language: Arc::new(RwLock::new(language.to_string())),
        }
    }

    #[cfg(test)]
    fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn handle(&self) -> PumpHandle {
        PumpHandle {
            running: Arc::clone(&self.running),
            language: Arc::clone(&self.language),
        }
    }

    pub fn spawn(mut self) -> (PumpHandle, JoinHandle<()>) {
        let handle = self.handle();
        self.running.store(true, Ordering::Relaxed);

        let task = tokio::spawn(async move {
            info!("caption pump started via {}", self.speech.name());
            let sample_rate = self.chunks.sample_rate();
            // Skip fragments too short to carry a word.
            let min_samples = (sample_rate / 2) as usize;

            while self.running.load(Ordering::Relaxed) {
                tokio::time::sleep(self.interval).await;

                let samples = self.chunks.drain();
                if samples.len() < min_samples {
                    continue;
                }

                let language = self.language.read().unwrap().clone();
                match self
                    .speech
                    .transcribe(&samples, sample_rate, &language)
                    .await
                {
                    Ok(segment) => {
                        if let Err(e) = self
                            .captions
                            .append(&self.author, &segment.text, &segment.language)
                            .await
                        {
                            warn!("failed to publish caption: {e}");
                        }
                    }
                    Err(SpeechError::NoSpeech) => {
                        debug!("no speech in chunk, listening continues");
                    }
                    Err(e) => {
                        warn!("transcription failed for chunk: {e}");
                    }
                }
            }
            info!("caption pump stopped");
        });

        (handle, task)
    }
}
