use futures_util::{Sink, SinkExt, Stream, StreamExt};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::{Error as WsError, protocol::Message};
use url::Url;
use uuid::Uuid;

use crate::protocol::{self, ServerMessage};
use crate::source::{SampleSink, SourceHandle, SourceSignal, VolumeSample};

/// Connection lifecycle of the remote level client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Authenticating,
    Polling,
    Closed,
    Failed,
}

#[derive(Debug, Clone)]
pub struct RemoteSettings {
    pub port: String,
    /// Sent verbatim in identify when present.
    pub password: Option<String>,
    pub input_name: String,
    pub poll_interval: Duration,
    /// Measured from the start of the connection attempt until identified.
    pub handshake_timeout: Duration,
}

/// How a session with the control plane ended.
enum Outcome {
    /// The owner asked us to stop.
    Shutdown,
    Failed(String),
}

pub struct RemoteLevelClient {
    settings: RemoteSettings,
    sink: SampleSink,
    shutdown: oneshot::Receiver<()>,
    state: ConnectionState,
}

impl RemoteLevelClient {
    pub fn new(
        settings: RemoteSettings,
        sink: SampleSink,
        shutdown: oneshot::Receiver<()>,
    ) -> Self {
        Self {
            settings,
            sink,
            shutdown,
            state: ConnectionState::Connecting,
        }
    }

    /// Spawns the client and returns the handle that owns it.
    pub fn spawn(settings: RemoteSettings, sink: SampleSink) -> RemoteLink {
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let client = Self::new(settings, sink, shutdown_rx);
        tokio::spawn(async move {
            client.run().await;
        });
        RemoteLink {
            shutdown: Some(shutdown_tx),
        }
    }

    // 单次连接，失败后不重连，由仲裁器回退到本地采集
    pub async fn run(mut self) -> ConnectionState {
        match self.connect_and_loop().await {
            Outcome::Shutdown => {
                self.state = ConnectionState::Closed;
                log::info!("Remote link closed by owner");
            }
            Outcome::Failed(reason) => {
                self.state = ConnectionState::Failed;
                log::warn!(
                    "Remote control plane unavailable (generation {}): {}",
                    self.sink.generation(),
                    reason
                );
                self.sink.send(SourceSignal::RemoteUnavailable(reason)).await;
            }
        }
        self.state
    }

    async fn connect_and_loop(&mut self) -> Outcome {
        let url = match endpoint_url(&self.settings.port) {
            Ok(url) => url,
            Err(e) => return Outcome::Failed(e.to_string()),
        };
        let deadline = Instant::now() + self.settings.handshake_timeout;

        self.state = ConnectionState::Connecting;
        log::info!("Connecting to {}...", url);
        let connect = tokio::time::timeout_at(deadline, connect_async(url.as_str()));
        let ws_stream = tokio::select! {
            result = connect => match result {
                Ok(Ok((ws_stream, _))) => ws_stream,
                Ok(Err(e)) => return Outcome::Failed(format!("connect failed: {}", e)),
                Err(_) => return Outcome::Failed("timed out connecting".to_string()),
            },
            _ = &mut self.shutdown => return Outcome::Shutdown,
        };
        log::info!("Connected!");

        let (mut write, mut read) = ws_stream.split();

        self.state = ConnectionState::Authenticating;
        let password = self.settings.password.clone();
        let identified = tokio::time::timeout_at(
            deadline,
            handshake(&mut read, &mut write, password.as_deref()),
        );
        let result = tokio::select! {
            result = identified => result,
            _ = &mut self.shutdown => {
                let _ = write.close().await;
                return Outcome::Shutdown;
            }
        };
        match result {
            Ok(Ok(())) => {}
            Ok(Err(reason)) => {
                let _ = write.close().await;
                return Outcome::Failed(reason);
            }
            Err(_) => {
                let _ = write.close().await;
                return Outcome::Failed(
                    "no identified message before the handshake deadline".to_string(),
                );
            }
        }

        self.state = ConnectionState::Polling;
        if !self.sink.send(SourceSignal::RemoteReady).await {
            let _ = write.close().await;
            return Outcome::Shutdown;
        }

        let outcome = self.poll(&mut read, &mut write).await;
        let _ = write.close().await;
        outcome
    }

    async fn poll<R, W>(&mut self, read: &mut R, write: &mut W) -> Outcome
    where
        R: Stream<Item = Result<Message, WsError>> + Unpin,
        W: Sink<Message, Error = WsError> + Unpin,
    {
        let mut ticker = tokio::time::interval(self.settings.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let request_id = Uuid::new_v4().to_string();
                    let request =
                        protocol::get_input_volume(&request_id, &self.settings.input_name);
                    if let Err(e) = write.send(Message::Text(request.into())).await {
                        return Outcome::Failed(format!("send failed: {}", e));
                    }
                }
                msg = read.next() => {
                    let text = match next_text(msg) {
                        Ok(Some(text)) => text,
                        Ok(None) => continue,
                        Err(reason) => return Outcome::Failed(reason),
                    };
                    match ServerMessage::parse(&text) {
                        Ok(ServerMessage::Response(resp)) => match resp.input_volume_mul() {
                            Some(mul) => {
                                let volume = VolumeSample::from_multiplier(mul);
                                if !self.sink.send(SourceSignal::Volume(volume)).await {
                                    return Outcome::Shutdown;
                                }
                            }
                            None => log::debug!(
                                "Ignoring response {} ({}, status {})",
                                resp.request_id,
                                resp.request_type,
                                resp.request_status.code
                            ),
                        },
                        Ok(other) => log::debug!("Ignoring message while polling: {:?}", other),
                        Err(e) => log::debug!("{}", e),
                    }
                }
                _ = &mut self.shutdown => return Outcome::Shutdown,
            }
        }
    }
}

/// hello → identify → identified. Other frames are ignored.
async fn handshake<R, W>(read: &mut R, write: &mut W, password: Option<&str>) -> Result<(), String>
where
    R: Stream<Item = Result<Message, WsError>> + Unpin,
    W: Sink<Message, Error = WsError> + Unpin,
{
    loop {
        let text = match next_text(read.next().await)? {
            Some(text) => text,
            None => continue,
        };
        match ServerMessage::parse(&text) {
            Ok(ServerMessage::Hello(hello)) => {
                log::info!(
                    "Server Hello received (obs-websocket {}, rpc {}, auth {}). Identifying...",
                    hello.obs_web_socket_version.as_deref().unwrap_or("?"),
                    hello.rpc_version,
                    if hello.authentication.is_some() { "required" } else { "none" }
                );
                let identify = protocol::identify(password);
                write
                    .send(Message::Text(identify.into()))
                    .await
                    .map_err(|e| format!("send failed: {}", e))?;
            }
            Ok(ServerMessage::Identified(identified)) => {
                log::info!("Identified, rpc version {}", identified.negotiated_rpc_version);
                return Ok(());
            }
            Ok(other) => log::debug!("Ignoring message during handshake: {:?}", other),
            Err(e) => log::debug!("{}", e),
        }
    }
}

/// Unwraps one frame from the read half. `Ok(None)` for frames without text.
fn next_text(msg: Option<Result<Message, WsError>>) -> Result<Option<String>, String> {
    match msg {
        Some(Ok(Message::Text(text))) => Ok(Some(text.to_string())),
        Some(Ok(Message::Close(frame))) => Err(format!("server closed connection: {:?}", frame)),
        Some(Ok(_)) => Ok(None),
        Some(Err(e)) => Err(format!("transport error: {}", e)),
        None => Err("connection closed".to_string()),
    }
}

pub fn endpoint_url(port: &str) -> anyhow::Result<Url> {
    let port: u16 = port
        .trim()
        .parse()
        .map_err(|_| anyhow::anyhow!("invalid control-plane port {:?}", port))?;
    Ok(Url::parse(&format!("ws://127.0.0.1:{}", port))?)
}

/// Owner side of a running [`RemoteLevelClient`].
pub struct RemoteLink {
    shutdown: Option<oneshot::Sender<()>>,
}

impl SourceHandle for RemoteLink {
    fn stop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            // 客户端收到后发送Close帧并退出
            let _ = tx.send(());
        }
    }
}

impl Drop for RemoteLink {
    fn drop(&mut self) {
        self.stop();
    }
}
