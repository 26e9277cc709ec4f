//! Microphone capture feeding both detection and captioning.
//!
//! One cpal input stream owns the audio device for the whole session. It
//! fills two shared buffers: a sliding FFT window the detector turns into
//! byte-scaled magnitude spectra, and an accumulating chunk the speech
//! pipeline drains for transcription. `MicCapture` itself is not `Send`
//! (the cpal stream is thread-bound); the handles it produces are.

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use rustfft::num_complex::Complex;
use rustfft::{Fft, FftPlanner};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use tracing::{debug, error, info};

use super::{DetectorError, SpectrumSource};
use crate::speech::AudioChunkSource;

/// Matches the browser analyser this replaces: 512-point FFT, 256 bins.
pub const FFT_SIZE: usize = 512;

/// Linear magnitude to 0-255 byte scale.
const BYTE_SCALE: f32 = 4.0 * 255.0;

/// Bound on buffered speech audio (seconds) if the pump stalls.
const MAX_CHUNK_SECONDS: u32 = 30;

#[derive(Default)]
struct SharedAudio {
    window: Mutex<VecDeque<f32>>,
    chunk: Mutex<Vec<f32>>,
}

pub struct MicCapture {
    device: cpal::Device,
    config: cpal::StreamConfig,
    shared: Arc<SharedAudio>,
    stream: Option<cpal::Stream>,
    active: bool,
    sample_rate: u32,
}

impl MicCapture {
    pub fn new(sample_rate: u32) -> Result<Self, DetectorError> {
        let host = cpal::default_host();
        let device = host.default_input_device().ok_or_else(|| {
            DetectorError::DeviceUnavailable("no default audio input device".to_string())
        })?;

        info!(
            "microphone capture using device: {}",
            device.name().unwrap_or_else(|_| "unknown".to_string())
        );

        let config = cpal::StreamConfig {
            channels: 1,
            sample_rate: cpal::SampleRate(sample_rate),
            buffer_size: cpal::BufferSize::Default,
        };

        Ok(Self {
            device,
            config,
            shared: Arc::new(SharedAudio::default()),
            stream: None,
            active: false,
            sample_rate,
        })
    }

    /// Start the input stream. Starting twice without a stop is an error;
    /// the device has exactly one owner per session.
    pub fn start(&mut self) -> Result<(), DetectorError> {
        if self.active {
            return Err(DetectorError::AlreadyRunning);
        }

        let shared = Arc::clone(&self.shared);
        let max_chunk = (self.sample_rate * MAX_CHUNK_SECONDS) as usize;
        let err_fn = |err| error!("microphone stream error: {}", err);

        let stream = self
            .device
            .build_input_stream(
                &self.config,
                move |data: &[f32], _: &cpal::InputCallbackInfo| {
                    if let Ok(mut window) = shared.window.lock() {
                        window.extend(data.iter().copied());
                        while window.len() > FFT_SIZE {
                            window.pop_front();
                        }
                    }
                    if let Ok(mut chunk) = shared.chunk.lock() {
                        chunk.extend_from_slice(data);
                        if chunk.len() > max_chunk {
                            let excess = chunk.len() - max_chunk;
                            chunk.drain(..excess);
                        }
                    }
                },
                err_fn,
                None,
            )
            .map_err(|e| map_build_error(&e))?;

        stream
            .play()
            .map_err(|e| DetectorError::DeviceUnavailable(e.to_string()))?;

        self.stream = Some(stream);
        self.active = true;
        info!("microphone capture started");
        Ok(())
    }

    pub fn stop(&mut self) {
        if let Some(stream) = self.stream.take() {
            debug!("stopping microphone stream");
            drop(stream);
        }
        self.active = false;
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Detector view: byte-scaled magnitude spectra over the sliding window.
    pub fn spectrum_source(&self) -> MicSpectrum {
        let mut planner = FftPlanner::new();
        MicSpectrum {
            shared: Arc::clone(&self.shared),
            fft: planner.plan_fft_forward(FFT_SIZE),
        }
    }

    /// Speech view: drains accumulated samples for transcription.
    pub fn chunk_source(&self) -> MicChunks {
        MicChunks {
            shared: Arc::clone(&self.shared),
            sample_rate: self.sample_rate,
        }
    }
}

impl Drop for MicCapture {
    fn drop(&mut self) {
        if self.active {
            debug!("dropping active MicCapture, cleaning up");
            self.stop();
        }
    }
}

fn map_build_error(err: &cpal::BuildStreamError) -> DetectorError {
    match err {
        cpal::BuildStreamError::DeviceNotAvailable => {
            DetectorError::DeviceUnavailable(err.to_string())
        }
        _ => DetectorError::PermissionDenied(err.to_string()),
    }
}

pub struct MicSpectrum {
    shared: Arc<SharedAudio>,
    fft: Arc<dyn Fft<f32>>,
}

impl SpectrumSource for MicSpectrum {
    fn spectrum(&mut self) -> Option<Vec<u8>> {
        let window: Vec<f32> = {
            let guard = self.shared.window.lock().ok()?;
            if guard.len() < FFT_SIZE {
                return None;
            }
            guard.iter().copied().collect()
        };

        let mut buffer: Vec<Complex<f32>> = window
            .iter()
            .enumerate()
            .map(|(i, &sample)| {
                // Hann window keeps bin leakage from inflating the mean.
                let w = 0.5
                    * (1.0
                        - (2.0 * std::f32::consts::PI * i as f32 / (FFT_SIZE - 1) as f32).cos());
                Complex::new(sample * w, 0.0)
            })
            .collect();

        self.fft.process(&mut buffer);

        let bins = buffer[..FFT_SIZE / 2]
            .iter()
            .map(|c| {
                let magnitude = c.norm() / FFT_SIZE as f32;
                (magnitude * BYTE_SCALE).clamp(0.0, 255.0) as u8
            })
            .collect();

        Some(bins)
    }
}

pub struct MicChunks {
    shared: Arc<SharedAudio>,
    sample_rate: u32,
}

impl AudioChunkSource for MicChunks {
    fn drain(&mut self) -> Vec<f32> {
        match self.shared.chunk.lock() {
            Ok(mut chunk) => std::mem::take(&mut *chunk),
            Err(_) => Vec::new(),
        }
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }
}
