use std::fs;
use std::path::Path;
use serde::Deserialize;

#[derive(Deserialize)]
struct Config {
    application: Application,
    avatar: Avatar,
    capture: Capture,
    remote: Remote,
    gui: Gui,
}

#[derive(Deserialize)]
struct Application {
    name: String,
    version: String,
}

#[derive(Deserialize)]
struct Avatar {
    threshold: u8,
    skin_color: String,
    beard_color: String,
    settings_visible: bool,
}

#[derive(Deserialize)]
struct Capture {
    auto_start: bool,
    device: String,
    sample_rate: u32,
    channels: u32,
}

#[derive(Deserialize)]
struct Remote {
    obs_mode: bool,
    port: String,
    password: String,
    source_name: String,
    handshake_timeout_ms: u64,
    poll_interval_ms: u64,
}

#[derive(Deserialize)]
struct Gui {
    local_port: u16,
    remote_port: u16,
}

// 在编译时读取 config.toml 并设置环境变量
fn main() {
    println!("cargo:rerun-if-changed=config.toml");

    let config_path = Path::new("config.toml");
    if !config_path.exists() {
        panic!("config.toml not found!");
    }

    let config_str = fs::read_to_string(config_path).expect("Failed to read config.toml");
    let config: Config = toml::from_str(&config_str).expect("Failed to parse config.toml");

    println!("cargo:rustc-env=APP_NAME={}", config.application.name);
    println!("cargo:rustc-env=APP_VERSION={}", config.application.version);

    // 头像外观
    println!("cargo:rustc-env=AVATAR_THRESHOLD={}", config.avatar.threshold);
    println!("cargo:rustc-env=AVATAR_SKIN_COLOR={}", config.avatar.skin_color);
    println!("cargo:rustc-env=AVATAR_BEARD_COLOR={}", config.avatar.beard_color);
    println!("cargo:rustc-env=AVATAR_SETTINGS_VISIBLE={}", config.avatar.settings_visible);

    // 本地采集
    println!("cargo:rustc-env=CAPTURE_AUTO_START={}", config.capture.auto_start);
    println!("cargo:rustc-env=CAPTURE_DEVICE={}", config.capture.device);
    println!("cargo:rustc-env=CAPTURE_SAMPLE_RATE={}", config.capture.sample_rate);
    println!("cargo:rustc-env=CAPTURE_CHANNELS={}", config.capture.channels);

    // 远程控制面 (obs-websocket)
    println!("cargo:rustc-env=REMOTE_OBS_MODE={}", config.remote.obs_mode);
    println!("cargo:rustc-env=REMOTE_PORT={}", config.remote.port);
    println!("cargo:rustc-env=REMOTE_PASSWORD={}", config.remote.password);
    println!("cargo:rustc-env=REMOTE_SOURCE_NAME={}", config.remote.source_name);
    println!("cargo:rustc-env=REMOTE_HANDSHAKE_TIMEOUT_MS={}", config.remote.handshake_timeout_ms);
    println!("cargo:rustc-env=REMOTE_POLL_INTERVAL_MS={}", config.remote.poll_interval_ms);

    // GUI 进程
    println!("cargo:rustc-env=GUI_LOCAL_PORT={}", config.gui.local_port);
    println!("cargo:rustc-env=GUI_REMOTE_PORT={}", config.gui.remote_port);
}
