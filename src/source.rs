//! Shared plumbing between the two audio sources and the arbiter.

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::AcquisitionError;

/// A normalized loudness in `[0, 100]`.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Default)]
pub struct VolumeSample(f64);

impl VolumeSample {
    pub const SILENT: VolumeSample = VolumeSample(0.0);

    /// Clamps into `[0, 100]`; NaN becomes silence.
    pub fn new(value: f64) -> Self {
        if value.is_nan() {
            return Self::SILENT;
        }
        Self(value.clamp(0.0, 100.0))
    }

    /// Linear volume multiplier as reported by the control plane.
    /// Values above 1.0 (gain) saturate at 100.
    pub fn from_multiplier(multiplier: f64) -> Self {
        Self::new(multiplier * 100.0)
    }

    /// Mean of byte-scaled frequency magnitudes (0..=255).
    pub fn from_byte_mean(mean: f64) -> Self {
        Self::new((mean / 255.0 * 100.0).round())
    }

    pub fn value(self) -> f64 {
        self.0
    }
}

/// What a running source reports back to the arbiter.
#[derive(Debug, Clone, PartialEq)]
pub enum SourceSignal {
    /// Remote handshake completed, polling has begun.
    RemoteReady,
    Volume(VolumeSample),
    /// Terminal: the remote connection failed or timed out.
    RemoteUnavailable(String),
    /// Terminal: the capture device stopped delivering audio.
    LocalFailed(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Tagged {
    pub generation: u64,
    pub signal: SourceSignal,
}

/// Sender half handed to a source, stamped with the generation it was
/// launched under.
#[derive(Debug, Clone)]
pub struct SampleSink {
    generation: u64,
    tx: mpsc::Sender<Tagged>,
}

impl SampleSink {
    pub fn new(generation: u64, tx: mpsc::Sender<Tagged>) -> Self {
        Self { generation, tx }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Returns false once the arbiter is gone.
    pub async fn send(&self, signal: SourceSignal) -> bool {
        self.tx
            .send(Tagged { generation: self.generation, signal })
            .await
            .is_ok()
    }

    /// Non-blocking send for the capture thread, which runs outside the
    /// runtime and must never wait on the arbiter.
    pub fn offer(&self, signal: SourceSignal) -> Offer {
        match self.tx.try_send(Tagged { generation: self.generation, signal }) {
            Ok(()) => Offer::Delivered,
            Err(mpsc::error::TrySendError::Full(_)) => Offer::Full,
            Err(mpsc::error::TrySendError::Closed(_)) => Offer::Closed,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Offer {
    Delivered,
    Full,
    Closed,
}

/// A running source that can be torn down. Dropping a handle must release
/// the same resources as `stop`.
pub trait SourceHandle: Send {
    fn stop(&mut self);
}

/// The two acquisition strategies the arbiter can select between.
pub enum ActiveSource {
    Remote(Box<dyn SourceHandle>),
    Local(Box<dyn SourceHandle>),
}

impl ActiveSource {
    pub fn stop(&mut self) {
        match self {
            ActiveSource::Remote(handle) | ActiveSource::Local(handle) => handle.stop(),
        }
    }
}

/// Starts sources on behalf of the arbiter.
#[async_trait]
pub trait SourceLauncher: Send {
    /// Remote failures are reported asynchronously via the sink.
    async fn launch_remote(&mut self, sink: SampleSink) -> Box<dyn SourceHandle>;

    /// Resolves once the capture device is open (or refused).
    async fn launch_local(
        &mut self,
        sink: SampleSink,
    ) -> Result<Box<dyn SourceHandle>, AcquisitionError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn multiplier_is_scaled_and_clamped() {
        assert_eq!(VolumeSample::from_multiplier(0.5).value(), 50.0);
        assert_eq!(VolumeSample::from_multiplier(1.7).value(), 100.0);
        assert_eq!(VolumeSample::from_multiplier(-0.2).value(), 0.0);
        assert_eq!(VolumeSample::from_multiplier(f64::NAN).value(), 0.0);
    }

    #[test]
    fn byte_mean_rounds_to_whole_percent() {
        assert_eq!(VolumeSample::from_byte_mean(255.0).value(), 100.0);
        assert_eq!(VolumeSample::from_byte_mean(0.0).value(), 0.0);
        // 128 / 255 * 100 = 50.196...
        assert_eq!(VolumeSample::from_byte_mean(128.0).value(), 50.0);
    }

    #[tokio::test]
    async fn sink_stamps_its_generation() {
        let (tx, mut rx) = mpsc::channel(4);
        let sink = SampleSink::new(7, tx);
        assert!(sink.send(SourceSignal::RemoteReady).await);
        let tagged = rx.recv().await.unwrap();
        assert_eq!(tagged.generation, 7);
        assert_eq!(tagged.signal, SourceSignal::RemoteReady);
    }

    #[test]
    fn offer_reports_backpressure_and_closure() {
        let (tx, rx) = mpsc::channel(1);
        let sink = SampleSink::new(1, tx);
        let volume = SourceSignal::Volume(VolumeSample::new(10.0));
        assert_eq!(sink.offer(volume.clone()), Offer::Delivered);
        assert_eq!(sink.offer(volume.clone()), Offer::Full);
        drop(rx);
        assert_eq!(sink.offer(volume), Offer::Closed);
    }
}
