//! audio - Local microphone capture and loudness analysis
//!
//! Uses ALSA for capture and a 256-point FFT analyser to turn PCM into one
//! normalized volume sample per display frame.

mod alsa_device;
pub mod analyser;
pub mod capture;

pub use capture::{CaptureSettings, LocalCapture};
