use std::sync::Arc;
use tokio::sync::mpsc;

use crate::arbiter::{ArbiterCommand, ArbiterEvent};
use crate::config::Config;
use crate::gui_bridge::{AvatarPresenter, GuiEvent, PresenterMessage};
use crate::talk::{TalkStateMachine, Threshold};

/// The session object: turns the arbiter's volume stream into avatar state
/// and routes display-process controls back to the arbiter.
pub struct CoreController {
    talk: TalkStateMachine,
    threshold: Threshold,
    presenter: Arc<dyn AvatarPresenter>,
    arbiter_tx: mpsc::Sender<ArbiterCommand>,
    failed: bool,
}

impl CoreController {
    pub fn new(
        threshold: Threshold,
        presenter: Arc<dyn AvatarPresenter>,
        arbiter_tx: mpsc::Sender<ArbiterCommand>,
    ) -> Self {
        Self {
            talk: TalkStateMachine::new(threshold.clone()),
            threshold,
            presenter,
            arbiter_tx,
            failed: false,
        }
    }

    /// Initial avatar state: appearance, closed mouth, empty meter.
    pub async fn announce(&self, config: &Config) {
        self.presenter
            .present(PresenterMessage::Appearance {
                skin_color: config.skin_color.to_string(),
                beard_color: config.beard_color.to_string(),
                settings_visible: config.settings_visible,
                threshold: self.threshold.get(),
            })
            .await;
        self.presenter.on_talk_state_changed(false).await;
        self.presenter.on_volume_level(0).await;
    }

    pub async fn handle_arbiter_event(&mut self, event: ArbiterEvent) {
        match event {
            ArbiterEvent::Volume(sample) => {
                if self.failed {
                    return;
                }
                if let Some(transition) = self.talk.update(sample) {
                    log::debug!(
                        "Talk state -> {} (smoothed {:.1})",
                        transition.is_talking,
                        self.talk.smoothed_volume()
                    );
                    self.presenter.on_talk_state_changed(transition.is_talking).await;
                }
                let level = self.talk.smoothed_volume().round().clamp(0.0, 100.0) as u8;
                self.presenter.on_volume_level(level).await;
            }
            ArbiterEvent::SourceChanged(selection) => {
                log::info!("Volume source: {}", selection.as_str());
                self.presenter.on_source_changed(selection).await;
            }
            ArbiterEvent::Error(e) => {
                // 不可恢复：头像保持闭嘴空闲状态，只显示错误
                log::error!("Acquisition failed: {}", e);
                self.failed = true;
                if let Some(transition) = self.talk.reset() {
                    self.presenter.on_talk_state_changed(transition.is_talking).await;
                }
                self.presenter.on_volume_level(0).await;
                self.presenter.on_acquisition_error(e.kind(), e.to_string()).await;
            }
        }
    }

    pub async fn handle_gui_event(&mut self, event: GuiEvent) {
        match event {
            GuiEvent::Threshold { value } => {
                self.threshold.set(value);
                log::info!("Threshold set to {}", self.threshold.get());
            }
            GuiEvent::Start => {
                log::info!("Start requested by GUI");
                if let Err(e) = self.arbiter_tx.send(ArbiterCommand::StartLocal).await {
                    log::warn!("Failed to forward start command: {}", e);
                }
            }
        }
    }

    #[cfg(test)]
    pub fn is_talking(&self) -> bool {
        self.talk.is_talking()
    }
}
