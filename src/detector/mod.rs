//! Speaking-indicator detection.
//!
//! Consumes frequency-magnitude frames (0-255 per bin) at display-refresh
//! cadence, smooths each bin with an exponential filter, and compares the
//! mean energy to a runtime-adjustable threshold. Only edge transitions
//! (idle→speaking, speaking→idle) produce side effects: the owning
//! participant's `is_speaking` flag is pushed through a `PresenceSink` and a
//! transition event is broadcast. Steady-state frames do nothing.

pub mod mic;

pub use mic::MicCapture;

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::config::DetectorConfig;
use crate::store::StoreResult;

/// Frame cadence, roughly one animation frame.
const FRAME_INTERVAL: Duration = Duration::from_millis(16);

#[derive(Debug, Error)]
pub enum DetectorError {
    #[error("microphone permission denied: {0}")]
    PermissionDenied(String),

    #[error("audio input device unavailable: {0}")]
    DeviceUnavailable(String),

    #[error("audio capture already running")]
    AlreadyRunning,
}

/// Source of frequency-magnitude frames. `None` until the first audio data
/// arrives.
pub trait SpectrumSource: Send {
    fn spectrum(&mut self) -> Option<Vec<u8>>;
}

/// Where edge transitions land (in production, the participant row).
#[async_trait]
pub trait PresenceSink: Send + Sync {
    async fn set_speaking(&self, speaking: bool) -> StoreResult<()>;
}

#[derive(Debug, Clone, Copy)]
pub struct SpeakingTransition {
    pub speaking: bool,
    pub energy: f32,
}

/// The decision core, separated from IO so it can be driven frame by frame.
pub struct DetectorCore {
    smoothing: f32,
    smoothed: Vec<f32>,
    speaking: bool,
}

impl DetectorCore {
    pub fn new(smoothing: f32) -> Self {
        Self {
            smoothing: smoothing.clamp(0.0, 1.0),
            smoothed: Vec::new(),
            speaking: false,
        }
    }

    pub fn is_speaking(&self) -> bool {
        self.speaking
    }

    /// Feed one spectrum frame. Returns a transition only on an edge.
    pub fn observe(&mut self, frame: &[u8], threshold: f32) -> Option<SpeakingTransition> {
        if frame.is_empty() {
            return None;
        }
        if self.smoothed.len() != frame.len() {
            self.smoothed = vec![0.0; frame.len()];
        }

        // Per-bin exponential smoothing before averaging; this is the
        // hysteresis that keeps transient spikes from flickering the state.
        let k = self.smoothing;
        for (bin, &value) in self.smoothed.iter_mut().zip(frame.iter()) {
            *bin = k * *bin + (1.0 - k) * value as f32;
        }

        let energy = self.smoothed.iter().sum::<f32>() / self.smoothed.len() as f32;
        let speaking = energy > threshold;

        if speaking != self.speaking {
            self.speaking = speaking;
            Some(SpeakingTransition { speaking, energy })
        } else {
            None
        }
    }
}

/// Control handle shared with the rest of the app.
#[derive(Clone)]
pub struct DetectorHandle {
    threshold: Arc<AtomicU32>,
    running: Arc<AtomicBool>,
    events: broadcast::Sender<SpeakingTransition>,
}

impl DetectorHandle {
    /// Handle with no detector loop behind it, for running without a
    /// microphone. Reports not-running and never emits events.
    pub fn detached(threshold: f32) -> Self {
        let (events, _) = broadcast::channel(1);
        Self {
            threshold: Arc::new(AtomicU32::new(threshold.to_bits())),
            running: Arc::new(AtomicBool::new(false)),
            events,
        }
    }

    pub fn threshold(&self) -> f32 {
        f32::from_bits(self.threshold.load(Ordering::Relaxed))
    }

    pub fn set_threshold(&self, value: f32) {
        self.threshold.store(value.to_bits(), Ordering::Relaxed);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }

    /// Cooperative stop; the loop checks the flag once per frame.
    pub fn stop(&self) {
        self.running.store(false, Ordering::Relaxed);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SpeakingTransition> {
        self.events.subscribe()
    }
}

pub struct SpeakingDetector {
    source: Box<dyn SpectrumSource>,
    sink: Arc<dyn PresenceSink>,
    core: DetectorCore,
    threshold: Arc<AtomicU32>,
    running: Arc<AtomicBool>,
    events: broadcast::Sender<SpeakingTransition>,
    frame_interval: Duration,
}

impl SpeakingDetector {
    pub fn new(
        source: Box<dyn SpectrumSource>,
        sink: Arc<dyn PresenceSink>,
        config: &DetectorConfig,
    ) -> Self {
        let (events, _) = broadcast::channel(32);
        Self {
            source,
            sink,
            core: DetectorCore::new(config.smoothing),
            threshold: Arc::new(AtomicU32::new(config.threshold.to_bits())),
            running: Arc::new(AtomicBool::new(false)),
            events,
            frame_interval: FRAME_INTERVAL,
        }
    }

    #[cfg(test)]
    fn with_frame_interval(mut self, interval: Duration) -> Self {
        self.frame_interval = interval;
        self
    }

    pub fn handle(&self) -> DetectorHandle {
        DetectorHandle {
            threshold: Arc::clone(&self.threshold),
            running: Arc::clone(&self.running),
            events: self.events.clone(),
        }
    }

    /// Run the sampling loop on a background task. Consumes the detector;
    /// the returned handle stops it.
    pub fn spawn(mut self) -> (DetectorHandle, JoinHandle<()>) {
        let handle = self.handle();
        self.running.store(true, Ordering::Relaxed);

        let task = tokio::spawn(async move {
            info!("speaking detector started");
            let mut ticker = tokio::time::interval(self.frame_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            while self.running.load(Ordering::Relaxed) {
                ticker.tick().await;

                let threshold = f32::from_bits(self.threshold.load(Ordering::Relaxed));
                let Some(frame) = self.source.spectrum() else {
                    continue;
                };

                if let Some(transition) = self.core.observe(&frame, threshold) {
                    if let Err(e) = self.sink.set_speaking(transition.speaking).await {
                        warn!("failed to publish speaking flag: {e}");
                    }
                    let _ = self.events.send(transition);
                }
            }

            // Leaving the loop mid-utterance must not strand the shared flag.
            if self.core.is_speaking() {
                if let Err(e) = self.sink.set_speaking(false).await {
                    warn!("failed to clear speaking flag on stop: {e}");
                }
                let _ = self.events.send(SpeakingTransition {
                    speaking: false,
                    energy: 0.0,
                });
            }
            info!("speaking detector stopped");
        });

        (handle, task)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::StoreError;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    fn uniform(value: u8) -> Vec<u8> {
        vec![value; 8]
    }

    #[test]
    fn test_constant_loud_stream_fires_exactly_one_transition() {
        let mut core = DetectorCore::new(0.8);
        let mut transitions = 0;
        for _ in 0..200 {
            if core.observe(&uniform(200), 30.0).is_some() {
                transitions += 1;
            }
        }
        assert_eq!(transitions, 1);
        assert!(core.is_speaking());
    }

    #[test]
    fn test_silence_never_transitions() {
        let mut core = DetectorCore::new(0.8);
        for _ in 0..100 {
            assert!(core.observe(&uniform(5), 30.0).is_none());
        }
        assert!(!core.is_speaking());
    }

    #[test]
    fn test_rise_then_fall_fires_two_edges() {
        let mut core = DetectorCore::new(0.5);
        let mut edges = Vec::new();
        for _ in 0..50 {
            if let Some(t) = core.observe(&uniform(120), 30.0) {
                edges.push(t.speaking);
            }
        }
        for _ in 0..50 {
            if let Some(t) = core.observe(&uniform(0), 30.0) {
                edges.push(t.speaking);
            }
        }
        assert_eq!(edges, vec![true, false]);
    }

    #[test]
    fn test_threshold_straddle_is_damped() {
        // Raw signal alternates threshold±2 each frame for 30 frames.
        let frames: Vec<Vec<u8>> = (0..30)
            .map(|i| uniform(if i % 2 == 0 { 32 } else { 28 }))
            .collect();

        let count = |smoothing: f32| {
            let mut core = DetectorCore::new(smoothing);
            frames
                .iter()
                .filter(|f| core.observe(f, 30.0).is_some())
                .count()
        };

        let raw = count(0.0);
        let damped = count(0.8);

        // Unsmoothed, every frame crosses the threshold.
        assert!(raw >= 25);
        // Smoothing must bound the storm, not merely reduce it a little.
        assert!(damped <= 10, "expected damped transitions, got {damped}");
    }

    #[test]
    fn test_empty_frame_is_skipped() {
        let mut core = DetectorCore::new(0.8);
        assert!(core.observe(&[], 30.0).is_none());
    }

    struct ScriptedSource {
        frames: VecDeque<Vec<u8>>,
        idle: Vec<u8>,
    }

    impl SpectrumSource for ScriptedSource {
        fn spectrum(&mut self) -> Option<Vec<u8>> {
            Some(self.frames.pop_front().unwrap_or_else(|| self.idle.clone()))
        }
    }

    #[derive(Default)]
    struct RecordingSink {
        flags: Mutex<Vec<bool>>,
    }

    #[async_trait]
    impl PresenceSink for RecordingSink {
        async fn set_speaking(&self, speaking: bool) -> StoreResult<()> {
            self.flags.lock().unwrap().push(speaking);
            Ok(())
        }
    }

    #[derive(Default)]
    struct FailingSink;

    #[async_trait]
    impl PresenceSink for FailingSink {
        async fn set_speaking(&self, _: bool) -> StoreResult<()> {
            Err(StoreError::RemoteUnavailable("down".to_string()))
        }
    }

    fn config() -> DetectorConfig {
        DetectorConfig {
            threshold: 30.0,
            smoothing: 0.5,
        }
    }

    #[tokio::test]
    async fn test_spawn_publishes_edges_and_final_idle() {
        let source = ScriptedSource {
            frames: (0..40).map(|_| uniform(200)).collect(),
            idle: uniform(200),
        };
        let sink = Arc::new(RecordingSink::default());
        let detector = SpeakingDetector::new(Box::new(source), sink.clone(), &config())
            .with_frame_interval(Duration::from_millis(1));

        let (handle, task) = detector.spawn();
        let mut events = handle.subscribe();

        // First edge arrives once smoothing crosses the threshold.
        let first = tokio::time::timeout(Duration::from_secs(1), events.recv())
            .await
            .expect("no transition")
            .unwrap();
        assert!(first.speaking);

        handle.stop();
        task.await.unwrap();

        let flags = sink.flags.lock().unwrap().clone();
        assert_eq!(flags, vec![true, false]);
        assert!(!handle.is_running());
    }

    #[tokio::test]
    async fn test_sink_failure_does_not_kill_the_loop() {
        let source = ScriptedSource {
            frames: VecDeque::new(),
            idle: uniform(200),
        };
        let detector =
            SpeakingDetector::new(Box::new(source), Arc::new(FailingSink), &config())
                .with_frame_interval(Duration::from_millis(1));

        let (handle, task) = detector.spawn();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(handle.is_running());

        handle.stop();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_threshold_is_adjustable_at_runtime() {
        let source = ScriptedSource {
            frames: VecDeque::new(),
            idle: uniform(50),
        };
        let sink = Arc::new(RecordingSink::default());
        let detector = SpeakingDetector::new(Box::new(source), sink.clone(), &config())
            .with_frame_interval(Duration::from_millis(1));

        let (handle, task) = detector.spawn();
        let mut events = handle.subscribe();

        // Energy 50 is above the default threshold of 30.
        let first = tokio::time::timeout(Duration::from_secs(1), events.recv())
            .await
            .expect("no transition")
            .unwrap();
        assert!(first.speaking);

        // Raising the threshold above the stream flips the state back.
        handle.set_threshold(200.0);
        let second = tokio::time::timeout(Duration::from_secs(1), events.recv())
            .await
            .expect("no transition after threshold change")
            .unwrap();
        assert!(!second.speaking);

        handle.stop();
        task.await.unwrap();
    }
}
