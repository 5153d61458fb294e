use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Config {
    // 头像配置，颜色只透传给GUI进程
    pub threshold: u8,
    pub skin_color: &'static str,
    pub beard_color: &'static str,
    pub settings_visible: bool,

    // 本地麦克风采集
    pub auto_start: bool,
    pub capture_device: &'static str,
    pub capture_sample_rate: u32,
    pub capture_channels: u32,

    // 远程控制面（OBS模式）
    pub obs_mode: bool,
    pub remote_port: &'static str,
    pub remote_password: &'static str,
    pub remote_source_name: &'static str,
    pub handshake_timeout_ms: u64,
    pub poll_interval_ms: u64,

    // GUI进程配置
    pub gui_local_port: u16,
    pub gui_remote_port: u16,
}

impl Config {
    /// 从编译时设置的环境变量创建配置
    /// 所有参数都在编译时从 config.toml 中读取
    pub fn new() -> Result<Self, &'static str> {
        let config = Self {
            threshold: env!("AVATAR_THRESHOLD").parse()
                .map_err(|_| "Failed to parse AVATAR_THRESHOLD")?,
            skin_color: env!("AVATAR_SKIN_COLOR"),
            beard_color: env!("AVATAR_BEARD_COLOR"),
            settings_visible: env!("AVATAR_SETTINGS_VISIBLE").parse()
                .map_err(|_| "Failed to parse AVATAR_SETTINGS_VISIBLE")?,

            auto_start: env!("CAPTURE_AUTO_START").parse()
                .map_err(|_| "Failed to parse CAPTURE_AUTO_START")?,
            capture_device: env!("CAPTURE_DEVICE"),
            capture_sample_rate: env!("CAPTURE_SAMPLE_RATE").parse()
                .map_err(|_| "Failed to parse CAPTURE_SAMPLE_RATE")?,
            capture_channels: env!("CAPTURE_CHANNELS").parse()
                .map_err(|_| "Failed to parse CAPTURE_CHANNELS")?,

            obs_mode: env!("REMOTE_OBS_MODE").parse()
                .map_err(|_| "Failed to parse REMOTE_OBS_MODE")?,
            remote_port: env!("REMOTE_PORT"),
            remote_password: env!("REMOTE_PASSWORD"),
            remote_source_name: env!("REMOTE_SOURCE_NAME"),
            handshake_timeout_ms: env!("REMOTE_HANDSHAKE_TIMEOUT_MS").parse()
                .map_err(|_| "Failed to parse REMOTE_HANDSHAKE_TIMEOUT_MS")?,
            poll_interval_ms: env!("REMOTE_POLL_INTERVAL_MS").parse()
                .map_err(|_| "Failed to parse REMOTE_POLL_INTERVAL_MS")?,

            gui_local_port: env!("GUI_LOCAL_PORT").parse()
                .map_err(|_| "Failed to parse GUI_LOCAL_PORT")?,
            gui_remote_port: env!("GUI_REMOTE_PORT").parse()
                .map_err(|_| "Failed to parse GUI_REMOTE_PORT")?,
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), &'static str> {
        if self.threshold > 100 {
            return Err("AVATAR_THRESHOLD must be within 0..=100");
        }
        if self.capture_channels == 0 {
            return Err("CAPTURE_CHANNELS must be at least 1");
        }
        if self.poll_interval_ms == 0 {
            return Err("REMOTE_POLL_INTERVAL_MS must be non-zero");
        }
        Ok(())
    }

    /// Empty password means the identify message carries no authentication.
    pub fn password(&self) -> Option<&'static str> {
        if self.remote_password.is_empty() {
            None
        } else {
            Some(self.remote_password)
        }
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            threshold: 30,
            skin_color: "#f2c9a0",
            beard_color: "#5a3a22",
            settings_visible: true,
            auto_start: true,
            capture_device: "default",
            capture_sample_rate: 48000,
            capture_channels: 1,
            obs_mode: false,
            remote_port: "4455",
            remote_password: "",
            remote_source_name: "Mic/Aux",
            handshake_timeout_ms: 3000,
            poll_interval_ms: 16,
            gui_local_port: 5688,
            gui_remote_port: 5689,
        }
    }
}
