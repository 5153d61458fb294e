//! Chooses between the remote control plane and the local microphone.
//!
//! Exactly one source is active at a time. Switching is one-way: a session
//! that falls back to local capture never returns to the remote path.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;

use crate::audio::{CaptureSettings, LocalCapture};
use crate::config::Config;
use crate::error::AcquisitionError;
use crate::net_link::{RemoteLevelClient, RemoteSettings};
use crate::source::{
    ActiveSource, SampleSink, SourceHandle, SourceLauncher, SourceSignal, Tagged, VolumeSample,
};

/// Source signals buffered between the active source and the arbiter.
const SIGNAL_QUEUE: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceSelection {
    Undetermined,
    Remote,
    Local,
}

impl SourceSelection {
    pub fn as_str(self) -> &'static str {
        match self {
            SourceSelection::Undetermined => "undetermined",
            SourceSelection::Remote => "remote",
            SourceSelection::Local => "local",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ArbiterEvent {
    Volume(VolumeSample),
    SourceChanged(SourceSelection),
    /// Unrecoverable; nothing further will be produced.
    Error(AcquisitionError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArbiterCommand {
    /// User-initiated start of local capture for sessions without auto-start.
    StartLocal,
}

/// Why the arbiter woke up.
enum Wake {
    Signal(Tagged),
    Deadline,
}

pub struct AcquisitionArbiter<L: SourceLauncher> {
    launcher: L,
    remote_requested: bool,
    auto_start: bool,
    handshake_timeout: Duration,
    selection: SourceSelection,
    active: Option<ActiveSource>,
    generation: u64,
    deadline: Option<Instant>,
    exhausted: bool,
    pending: VecDeque<ArbiterEvent>,
    tx: mpsc::Sender<Tagged>,
    rx: mpsc::Receiver<Tagged>,
}

impl<L: SourceLauncher> AcquisitionArbiter<L> {
    pub fn new(
        launcher: L,
        remote_requested: bool,
        auto_start: bool,
        handshake_timeout: Duration,
    ) -> Self {
        let (tx, rx) = mpsc::channel(SIGNAL_QUEUE);
        Self {
            launcher,
            remote_requested,
            auto_start,
            handshake_timeout,
            selection: SourceSelection::Undetermined,
            active: None,
            generation: 0,
            deadline: None,
            exhausted: false,
            pending: VecDeque::new(),
            tx,
            rx,
        }
    }

    pub fn selection(&self) -> SourceSelection {
        self.selection
    }

    pub async fn start(&mut self) {
        if self.remote_requested {
            let sink = self.next_sink();
            log::info!("Trying remote control plane (generation {})", sink.generation());
            let handle = self.launcher.launch_remote(sink).await;
            self.active = Some(ActiveSource::Remote(handle));
            self.deadline = Some(Instant::now() + self.handshake_timeout);
        } else if self.auto_start {
            self.start_local().await;
        } else {
            log::info!("Waiting for a start command before opening the microphone");
        }
    }

    /// Starts local capture if nothing has been attempted yet. Ignored once a
    /// source is running or the session has failed.
    pub async fn start_local(&mut self) {
        if self.exhausted
            || self.active.is_some()
            || self.selection != SourceSelection::Undetermined
        {
            log::debug!("Ignoring local start in state {:?}", self.selection);
            return;
        }
        let sink = self.next_sink();
        match self.launcher.launch_local(sink).await {
            Ok(handle) => self.use_local(handle),
            Err(e) => {
                log::error!("Local capture failed: {}", e);
                self.exhausted = true;
                self.pending.push_back(ArbiterEvent::Error(e));
            }
        }
    }

    /// Drives the arbiter until the event consumer or command sender goes away.
    pub async fn run(
        mut self,
        mut commands: mpsc::Receiver<ArbiterCommand>,
        events: mpsc::Sender<ArbiterEvent>,
    ) {
        self.start().await;
        loop {
            while let Some(event) = self.pending.pop_front() {
                if events.send(event).await.is_err() {
                    self.shutdown();
                    return;
                }
            }
            // wait() 只等待通道和定时器，可以安全取消
            tokio::select! {
                cmd = commands.recv() => match cmd {
                    Some(ArbiterCommand::StartLocal) => self.start_local().await,
                    None => break,
                },
                wake = self.wait(), if !self.exhausted => self.on_wake(wake).await,
            }
        }
        log::info!("Arbiter stopping, source was {}", self.selection().as_str());
        self.shutdown();
    }

    /// Stops whatever source is running.
    pub fn shutdown(&mut self) {
        if let Some(mut active) = self.active.take() {
            active.stop();
        }
        self.deadline = None;
        self.generation += 1;
    }

    fn next_sink(&mut self) -> SampleSink {
        self.generation += 1;
        SampleSink::new(self.generation, self.tx.clone())
    }

    async fn wait(&mut self) -> Wake {
        let deadline = self.deadline;
        tokio::select! {
            Some(tagged) = self.rx.recv() => Wake::Signal(tagged),
            _ = sleep_until(deadline) => Wake::Deadline,
        }
    }

    async fn on_wake(&mut self, wake: Wake) {
        match wake {
            Wake::Deadline => {
                // 定时器只触发一次
                self.deadline = None;
                if self.selection == SourceSelection::Undetermined {
                    self.fall_back("handshake deadline expired").await;
                }
            }
            Wake::Signal(tagged) => self.on_signal(tagged).await,
        }
    }

    async fn on_signal(&mut self, tagged: Tagged) {
        if tagged.generation != self.generation {
            log::debug!(
                "Discarding stale signal from generation {} (current {}): {:?}",
                tagged.generation,
                self.generation,
                tagged.signal
            );
            return;
        }
        match tagged.signal {
            SourceSignal::RemoteReady => {
                if self.selection == SourceSelection::Undetermined {
                    self.deadline = None;
                    self.selection = SourceSelection::Remote;
                    log::info!("Using remote control plane for volume");
                    self.pending
                        .push_back(ArbiterEvent::SourceChanged(SourceSelection::Remote));
                }
            }
            SourceSignal::Volume(volume) => {
                if self.selection != SourceSelection::Undetermined {
                    self.pending.push_back(ArbiterEvent::Volume(volume));
                }
            }
            SourceSignal::RemoteUnavailable(reason) => {
                if matches!(self.active, Some(ActiveSource::Remote(_))) {
                    self.fall_back(&reason).await;
                }
            }
            SourceSignal::LocalFailed(reason) => {
                self.shutdown();
                self.exhausted = true;
                self.pending.push_back(ArbiterEvent::Error(
                    AcquisitionError::TotalAcquisitionFailure(format!(
                        "microphone stopped: {}",
                        reason
                    )),
                ));
            }
        }
    }

    /// Remote → local, at most once per session.
    async fn fall_back(&mut self, reason: &str) {
        if self.selection == SourceSelection::Local || self.exhausted {
            return;
        }
        log::warn!(
            "{}, falling back to local capture",
            AcquisitionError::RemoteUnavailable(reason.to_string())
        );

        // 先作废远程代际，旧连接的在途消息一律丢弃
        self.shutdown();
        let sink = self.next_sink();
        match self.launcher.launch_local(sink).await {
            Ok(handle) => self.use_local(handle),
            Err(e) => {
                log::error!("Local fallback failed: {}", e);
                self.exhausted = true;
                self.pending.push_back(ArbiterEvent::Error(
                    AcquisitionError::TotalAcquisitionFailure(format!(
                        "remote unavailable ({}) and {}",
                        reason, e
                    )),
                ));
            }
        }
    }

    fn use_local(&mut self, handle: Box<dyn SourceHandle>) {
        self.active = Some(ActiveSource::Local(handle));
        self.selection = SourceSelection::Local;
        log::info!("Using local microphone for volume");
        self.pending
            .push_back(ArbiterEvent::SourceChanged(SourceSelection::Local));
    }
}

impl<L: SourceLauncher> Drop for AcquisitionArbiter<L> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

/// Launches the real ALSA and obs-websocket sources.
pub struct DeviceLauncher {
    capture: CaptureSettings,
    remote: RemoteSettings,
}

impl DeviceLauncher {
    pub fn new(config: &Config) -> Self {
        Self {
            capture: CaptureSettings {
                device: config.capture_device.to_string(),
                sample_rate: config.capture_sample_rate,
                channels: config.capture_channels,
            },
            remote: RemoteSettings {
                port: config.remote_port.to_string(),
                password: config.password().map(str::to_string),
                input_name: config.remote_source_name.to_string(),
                poll_interval: config.poll_interval(),
                handshake_timeout: config.handshake_timeout(),
            },
        }
    }
}

#[async_trait]
impl SourceLauncher for DeviceLauncher {
    async fn launch_remote(&mut self, sink: SampleSink) -> Box<dyn SourceHandle> {
        Box::new(RemoteLevelClient::spawn(self.remote.clone(), sink))
    }

    async fn launch_local(
        &mut self,
        sink: SampleSink,
    ) -> Result<Box<dyn SourceHandle>, AcquisitionError> {
        let capture = LocalCapture::start(self.capture.clone(), sink).await?;
        Ok(Box::new(capture))
    }
}
