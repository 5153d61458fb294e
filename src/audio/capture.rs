//! Local microphone source.
//!
//! Uses std::thread (NOT tokio tasks) for real-time audio I/O. The thread owns
//! the ALSA handle; the [`LocalCapture`] handle owns the thread.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use alsa::pcm::PCM;
use anyhow::{Context, Result};
use tokio::sync::oneshot;

use super::alsa_device::{self, AlsaParams};
use super::analyser::AmplitudeSampler;
use crate::error::AcquisitionError;
use crate::source::{Offer, SampleSink, SourceHandle, SourceSignal};

/// Samples published per second, one per display frame.
pub const FRAME_RATE_HZ: u32 = 60;

/// Capture configuration.
#[derive(Debug, Clone)]
pub struct CaptureSettings {
    /// ALSA capture device name (e.g. "default", "plughw:0,0")
    pub device: String,
    /// Desired sample rate (may be negotiated by hardware)
    pub sample_rate: u32,
    /// Desired channel count, mixed down to mono before analysis
    pub channels: u32,
}

impl Default for CaptureSettings {
    fn default() -> Self {
        Self {
            device: "default".to_string(),
            sample_rate: 48000,
            channels: 1,
        }
    }
}

pub struct LocalCapture {
    running: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl LocalCapture {
    /// Opens the device on a dedicated thread and waits until it is either
    /// capturing or has been refused.
    pub async fn start(
        settings: CaptureSettings,
        sink: SampleSink,
    ) -> Result<Self, AcquisitionError> {
        let running = Arc::new(AtomicBool::new(true));
        let (ready_tx, ready_rx) = oneshot::channel::<Result<(), String>>();

        log::info!(
            "LocalCapture starting, device: \"{}\", rate: {}Hz, ch: {}",
            settings.device,
            settings.sample_rate,
            settings.channels,
        );

        let handle = {
            let running = running.clone();
            thread::Builder::new()
                .name("audio-capture".into())
                .spawn(move || capture_thread(&settings, &sink, &running, ready_tx))
                .map_err(|e| {
                    AcquisitionError::PermissionDenied(format!(
                        "failed to spawn capture thread: {}",
                        e
                    ))
                })?
        };

        match ready_rx.await {
            Ok(Ok(())) => Ok(Self {
                running,
                handle: Some(handle),
            }),
            Ok(Err(reason)) => {
                let _ = handle.join();
                Err(AcquisitionError::PermissionDenied(reason))
            }
            Err(_) => {
                let _ = handle.join();
                Err(AcquisitionError::PermissionDenied(
                    "capture thread exited before opening the device".to_string(),
                ))
            }
        }
    }
}

impl SourceHandle for LocalCapture {
    /// Signal the thread to stop and wait for it to release the device.
    fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(h) = self.handle.take() {
            let _ = h.join();
            log::info!("LocalCapture released");
        }
    }
}

impl Drop for LocalCapture {
    fn drop(&mut self) {
        self.stop();
    }
}

// ======================== Capture thread ========================

fn capture_thread(
    settings: &CaptureSettings,
    sink: &SampleSink,
    running: &AtomicBool,
    ready: oneshot::Sender<Result<(), String>>,
) {
    let (pcm, params) =
        match alsa_device::open_capture(&settings.device, settings.sample_rate, settings.channels) {
            Ok(opened) => opened,
            Err(e) => {
                log::error!("Failed to open capture device: {:#}", e);
                let _ = ready.send(Err(format!("{:#}", e)));
                return;
            }
        };
    let _ = ready.send(Ok(()));

    if let Err(e) = capture_loop(&pcm, &params, sink, running) {
        log::error!("Capture thread error: {:#}", e);
        report_failure(sink, running, format!("{:#}", e));
    }
    log::info!("Capture stopped");
}

fn capture_loop(
    pcm: &PCM,
    params: &AlsaParams,
    sink: &SampleSink,
    running: &AtomicBool,
) -> Result<()> {
    let channels = params.channels.max(1) as usize;
    let frames_per_tick = (params.sample_rate / FRAME_RATE_HZ).max(1) as usize;

    // ALSA read buffer (interleaved i16, one period)
    let mut read_buf = vec![0i16; params.period_size.max(1) * channels];
    let mut mono: Vec<f32> = Vec::with_capacity(params.period_size);
    let mut sampler = AmplitudeSampler::new();
    let mut pending_frames = 0usize;

    let io = pcm.io_i16().context("Failed to get i16 capture IO")?;

    log::info!(
        "Capture started: rate={}, ch={}, period={}, frames_per_tick={}",
        params.sample_rate,
        channels,
        params.period_size,
        frames_per_tick,
    );

    while running.load(Ordering::Relaxed) {
        match io.readi(&mut read_buf) {
            Ok(frames) => {
                mix_to_mono(&read_buf[..frames * channels], channels, &mut mono);
                sampler.push_samples(&mono);
                pending_frames += frames;

                // One sample per elapsed display frame
                while pending_frames >= frames_per_tick {
                    pending_frames -= frames_per_tick;
                    match sink.offer(SourceSignal::Volume(sampler.sample())) {
                        Offer::Delivered => {}
                        Offer::Full => log::debug!("Volume channel full, dropping frame"),
                        Offer::Closed => {
                            log::warn!("Volume receiver dropped, stopping capture");
                            return Ok(());
                        }
                    }
                }
            }
            Err(e) => {
                log::warn!("ALSA capture error: {}, recovering...", e);
                pcm.prepare().context("Failed to recover PCM capture")?;
            }
        }
    }
    Ok(())
}

/// Terminal signals must not be lost to a momentarily full channel.
fn report_failure(sink: &SampleSink, running: &AtomicBool, reason: String) {
    while running.load(Ordering::Relaxed) {
        match sink.offer(SourceSignal::LocalFailed(reason.clone())) {
            Offer::Full => thread::sleep(Duration::from_millis(5)),
            Offer::Delivered | Offer::Closed => return,
        }
    }
}

/// Interleaved i16 → mono f32 in `[-1, 1]`.
pub fn mix_to_mono(interleaved: &[i16], channels: usize, out: &mut Vec<f32>) {
    let channels = channels.max(1);
    let scale = 1.0 / (channels as f32 * 32768.0);
    out.clear();
    out.extend(
        interleaved
            .chunks_exact(channels)
            .map(|frame| frame.iter().map(|&s| f32::from(s)).sum::<f32>() * scale),
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn stereo_is_averaged() {
        let mut out = Vec::new();
        mix_to_mono(&[16384, -16384, 32767, 32767, -32768, -32768], 2, &mut out);
        assert_eq!(out.len(), 3);
        assert_relative_eq!(out[0], 0.0);
        assert_relative_eq!(out[1], 32767.0 / 32768.0);
        assert_relative_eq!(out[2], -1.0);
    }

    #[test]
    fn mono_passes_through_scaled() {
        let mut out = vec![9.0; 8];
        mix_to_mono(&[0, 16384], 1, &mut out);
        assert_eq!(out, vec![0.0, 0.5]);
    }

    #[test]
    fn partial_trailing_frame_is_ignored() {
        let mut out = Vec::new();
        mix_to_mono(&[100, 100, 100], 2, &mut out);
        assert_eq!(out.len(), 1);
    }

    #[tokio::test]
    async fn missing_device_is_reported_as_permission_denied() {
        let (tx, _rx) = tokio::sync::mpsc::channel(4);
        let settings = CaptureSettings {
            device: "hw:this-device-does-not-exist".to_string(),
            ..CaptureSettings::default()
        };
        let result = LocalCapture::start(settings, SampleSink::new(1, tx)).await;
        assert!(matches!(result, Err(AcquisitionError::PermissionDenied(_))));
    }
}
