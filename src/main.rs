mod arbiter;
mod audio;
mod config;
mod controller;
mod error;
mod gui_bridge;
mod net_link;
mod protocol;
mod source;
mod talk;

use arbiter::{AcquisitionArbiter, ArbiterCommand, ArbiterEvent, DeviceLauncher};
use config::Config;
use controller::CoreController;
use gui_bridge::{GuiBridge, GuiEvent};
use std::sync::Arc;
use talk::Threshold;
use tokio::signal;
use tokio::sync::mpsc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 初始化日志
    env_logger::init();

    // 加载配置
    let config = Config::new().unwrap_or_else(|e| {
        log::warn!("Invalid build configuration ({}), using defaults", e);
        Config::default()
    });
    log::info!("{} {} starting", env!("APP_NAME"), env!("APP_VERSION"));

    // 事件通道
    let (tx_arbiter_event, mut rx_arbiter_event) = mpsc::channel::<ArbiterEvent>(100);
    // 命令通道
    let (tx_arbiter_cmd, rx_arbiter_cmd) = mpsc::channel::<ArbiterCommand>(16);
    // GUI进程通道
    let (tx_gui_event, mut rx_gui_event) = mpsc::channel::<GuiEvent>(100);

    // 启动GUI桥，优先启动，保证头像初始状态先于音量数据到达
    let gui_bridge = Arc::new(GuiBridge::new(&config, tx_gui_event).await?);
    let gui_bridge_clone = gui_bridge.clone();
    tokio::spawn(async move {
        if let Err(e) = gui_bridge_clone.run().await {
            log::error!("GuiBridge error: {}", e);
        }
    });

    let mut controller = CoreController::new(
        Threshold::new(config.threshold),
        gui_bridge.clone(),
        tx_arbiter_cmd,
    );
    controller.announce(&config).await;

    // 启动音量采集仲裁器
    let arbiter = AcquisitionArbiter::new(
        DeviceLauncher::new(&config),
        config.obs_mode,
        config.auto_start,
        config.handshake_timeout(),
    );
    let arbiter_task = tokio::spawn(async move {
        arbiter.run(rx_arbiter_cmd, tx_arbiter_event).await;
    });

    // 主事件循环
    loop {
        tokio::select! {
            _ = signal::ctrl_c() => {
                log::info!("Ctrl-C received, shutting down");
                break;
            }
            Some(event) = rx_arbiter_event.recv() => {
                controller.handle_arbiter_event(event).await;
            }
            Some(event) = rx_gui_event.recv() => {
                controller.handle_gui_event(event).await;
            }
            else => break,
        }
    }

    // 关闭命令通道后仲裁器会停止当前音源
    drop(controller);
    drop(rx_arbiter_event);
    if let Err(e) = arbiter_task.await {
        log::warn!("Arbiter task ended abnormally: {}", e);
    }
    Ok(())
}
