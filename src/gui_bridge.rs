use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;

use crate::arbiter::SourceSelection;
use crate::config::Config;

/// Control messages sent by the display process (sliders, buttons).
#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum GuiEvent {
    Threshold { value: u8 },
    Start,
}

/// Everything the display process is told about the avatar.
#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum PresenterMessage {
    Talk { talking: bool },
    Level { percent: u8 },
    Source { selection: &'static str },
    Error { kind: &'static str, message: String },
    Appearance {
        skin_color: String,
        beard_color: String,
        settings_visible: bool,
        threshold: u8,
    },
}

/// Receives avatar state changes. Implementations must not fail loudly:
/// a presenter that cannot deliver logs and carries on.
#[async_trait]
pub trait AvatarPresenter: Send + Sync {
    async fn present(&self, message: PresenterMessage);

    async fn on_talk_state_changed(&self, is_talking: bool) {
        self.present(PresenterMessage::Talk { talking: is_talking }).await;
    }

    async fn on_volume_level(&self, percent: u8) {
        self.present(PresenterMessage::Level { percent: percent.min(100) }).await;
    }

    async fn on_source_changed(&self, selection: SourceSelection) {
        self.present(PresenterMessage::Source { selection: selection.as_str() }).await;
    }

    async fn on_acquisition_error(&self, kind: &'static str, message: String) {
        self.present(PresenterMessage::Error { kind, message }).await;
    }
}

pub struct GuiBridge {
    socket: Arc<UdpSocket>,
    target_addr: String,
    tx: mpsc::Sender<GuiEvent>,
}

// GUI进程和Core进程通过本地UDP通信，端口在配置中指定
impl GuiBridge {
    pub async fn new(config: &Config, tx: mpsc::Sender<GuiEvent>) -> anyhow::Result<Self> {
        // 绑定本地UDP端口
        let socket = UdpSocket::bind(format!("127.0.0.1:{}", config.gui_local_port)).await?;
        let target_addr = format!("127.0.0.1:{}", config.gui_remote_port);
        let bridge = Self::from_socket(socket, target_addr, tx);
        log::info!(
            "GuiBridge listening on {}, target {}",
            bridge.local_addr()?,
            bridge.target_addr
        );
        Ok(bridge)
    }

    pub fn from_socket(socket: UdpSocket, target_addr: String, tx: mpsc::Sender<GuiEvent>) -> Self {
        Self {
            socket: Arc::new(socket),
            target_addr,
            tx,
        }
    }

    pub fn local_addr(&self) -> anyhow::Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    pub async fn run(&self) -> anyhow::Result<()> {
        let mut buf = [0u8; 4096]; // 4KB缓冲区
        loop {
            // 通过UDP socket接收消息
            let (len, _) = self.socket.recv_from(&mut buf).await?;
            if len == 0 {
                continue;
            }
            let event = match serde_json::from_slice::<GuiEvent>(&buf[..len]) {
                Ok(event) => event,
                Err(e) => {
                    log::debug!("Ignoring GUI message: {}", e);
                    continue;
                }
            };
            if let Err(e) = self.tx.send(event).await {
                log::warn!("Failed to send GUI event: {}", e);
                break;
            }
        }
        Ok(())
    }

    pub async fn send_message(&self, msg: &str) -> anyhow::Result<()> {
        self.socket
            .send_to(msg.as_bytes(), &self.target_addr)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl AvatarPresenter for GuiBridge {
    async fn present(&self, message: PresenterMessage) {
        let text = match serde_json::to_string(&message) {
            Ok(text) => text,
            Err(e) => {
                log::error!("Failed to encode presenter message: {}", e);
                return;
            }
        };
        if let Err(e) = self.send_message(&text).await {
            log::warn!("Failed to send to GUI: {}", e);
        }
    }
}
