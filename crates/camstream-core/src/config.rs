//! Device configuration.
//!
//! Everything the firmware needs to bring up the camera, join the network and
//! serve the stream, grouped per concern. These types carry no platform code,
//! so both the ESP32 firmware and host tooling build them the same way.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Longest SSID accepted by 802.11.
pub const MAX_SSID_LEN: usize = 32;

/// Longest WPA2 passphrase.
pub const MAX_PASSWORD_LEN: usize = 64;

/// Worst JPEG quality the sensor accepts (0 is best).
pub const MAX_JPEG_QUALITY: u8 = 63;

/// Configuration problems found by `validate()`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("WiFi SSID must be 1..={max} bytes, got {0}", max = MAX_SSID_LEN)]
    InvalidSsid(usize),

    #[error("WiFi password must be at most {max} bytes, got {0}", max = MAX_PASSWORD_LEN)]
    PasswordTooLong(usize),

    #[error("JPEG quality must be 0..={max}, got {0}", max = MAX_JPEG_QUALITY)]
    InvalidJpegQuality(u8),

    #[error("frame buffer count must be at least 1")]
    InvalidBufferCount,

    #[error("invalid pin assignment: {0}")]
    Pin(String),

    #[error("stream route must start with '/', got {0:?}")]
    InvalidRoute(String),
}

/// Station-mode credentials.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WifiConfig {
    /// WiFi network SSID.
    pub ssid: String,

    /// WiFi network password (empty for open networks).
    pub password: String,
}

impl WifiConfig {
    pub fn new(ssid: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            ssid: ssid.into(),
            password: password.into(),
        }
    }

    /// Open networks have no password.
    pub fn is_open(&self) -> bool {
        self.password.is_empty()
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.ssid.is_empty() || self.ssid.len() > MAX_SSID_LEN {
            return Err(ConfigError::InvalidSsid(self.ssid.len()));
        }
        if self.password.len() > MAX_PASSWORD_LEN {
            return Err(ConfigError::PasswordTooLong(self.password.len()));
        }
        Ok(())
    }
}

/// GPIO assignment of the camera connector. `-1` means not connected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CameraPins {
    pub pwdn: i32,
    /// `-1` performs a software reset instead.
    pub reset: i32,
    pub xclk: i32,
    pub sccb_sda: i32,
    pub sccb_scl: i32,
    /// D0..=D7.
    pub data: [i32; 8],
    pub vsync: i32,
    pub href: i32,
    pub pclk: i32,
}

impl CameraPins {
    /// AI-Thinker ESP32-CAM module.
    pub fn ai_thinker() -> Self {
        Self {
            pwdn: 32,
            reset: -1,
            xclk: 0,
            sccb_sda: 26,
            sccb_scl: 27,
            data: [5, 18, 19, 21, 36, 39, 34, 35],
            vsync: 25,
            href: 23,
            pclk: 22,
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let required = [
            ("xclk", self.xclk),
            ("sccb_sda", self.sccb_sda),
            ("sccb_scl", self.sccb_scl),
            ("vsync", self.vsync),
            ("href", self.href),
            ("pclk", self.pclk),
        ];
        for (name, pin) in required {
            if pin < 0 {
                return Err(ConfigError::Pin(format!("{} must be connected", name)));
            }
        }
        if let Some(i) = self.data.iter().position(|&pin| pin < 0) {
            return Err(ConfigError::Pin(format!("d{} must be connected", i)));
        }

        let mut used: Vec<i32> = required.iter().map(|(_, pin)| *pin).collect();
        used.extend_from_slice(&self.data);
        used.extend([self.pwdn, self.reset].into_iter().filter(|&pin| pin >= 0));
        used.sort_unstable();
        if let Some(pair) = used.windows(2).find(|w| w[0] == w[1]) {
            return Err(ConfigError::Pin(format!("GPIO {} assigned twice", pair[0])));
        }
        Ok(())
    }
}

/// Sensor output resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FrameSize {
    /// 160x120
    #[default]
    Qqvga,
    /// 320x240
    Qvga,
    /// 400x296
    Cif,
    /// 640x480
    Vga,
    /// 800x600
    Svga,
    /// 1024x768
    Xga,
    /// 1280x1024
    Sxga,
    /// 1600x1200
    Uxga,
}

impl FrameSize {
    /// Width and height in pixels.
    pub fn dimensions(&self) -> (u16, u16) {
        match self {
            FrameSize::Qqvga => (160, 120),
            FrameSize::Qvga => (320, 240),
            FrameSize::Cif => (400, 296),
            FrameSize::Vga => (640, 480),
            FrameSize::Svga => (800, 600),
            FrameSize::Xga => (1024, 768),
            FrameSize::Sxga => (1280, 1024),
            FrameSize::Uxga => (1600, 1200),
        }
    }
}

/// Where the driver allocates frame buffers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FrameBufferLocation {
    #[default]
    Psram,
    Dram,
}

/// When the driver refills a frame buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GrabMode {
    /// Fill buffers only when they are empty.
    #[default]
    WhenEmpty,
    /// Keep overwriting so the newest frame is always returned.
    Latest,
}

/// Image sensor settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SensorConfig {
    pub xclk_freq_hz: u32,
    pub frame_size: FrameSize,
    /// 0 = best, 63 = worst.
    pub jpeg_quality: u8,
    /// Number of frame buffers, which bounds how many frames can be out at once.
    pub fb_count: u8,
    pub fb_location: FrameBufferLocation,
    pub grab_mode: GrabMode,
}

impl Default for SensorConfig {
    fn default() -> Self {
        Self {
            xclk_freq_hz: 20_000_000,
            frame_size: FrameSize::Qqvga,
            jpeg_quality: 30,
            fb_count: 2,
            fb_location: FrameBufferLocation::Psram,
            grab_mode: GrabMode::WhenEmpty,
        }
    }
}

impl SensorConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.jpeg_quality > MAX_JPEG_QUALITY {
            return Err(ConfigError::InvalidJpegQuality(self.jpeg_quality));
        }
        if self.fb_count == 0 {
            return Err(ConfigError::InvalidBufferCount);
        }
        Ok(())
    }
}

/// Port browsers assume when a URL names none.
pub const DEFAULT_HTTP_PORT: u16 = 80;

/// HTTP endpoint settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpConfig {
    pub port: u16,
    pub stream_route: String,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_HTTP_PORT,
            stream_route: "/stream".to_string(),
        }
    }
}

/// Complete device configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceConfig {
    pub wifi: WifiConfig,
    pub pins: CameraPins,
    pub sensor: SensorConfig,
    #[serde(default)]
    pub http: HttpConfig,
    /// Pause between starting WiFi and initializing the camera.
    #[serde(default = "default_settle_delay_ms")]
    pub settle_delay_ms: u32,
}

fn default_settle_delay_ms() -> u32 {
    2000
}

impl DeviceConfig {
    pub fn new(wifi: WifiConfig, pins: CameraPins, sensor: SensorConfig) -> Self {
        Self {
            wifi,
            pins,
            sensor,
            http: HttpConfig::default(),
            settle_delay_ms: default_settle_delay_ms(),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.wifi.validate()?;
        self.pins.validate()?;
        self.sensor.validate()?;
        if !self.http.stream_route.starts_with('/') {
            return Err(ConfigError::InvalidRoute(self.http.stream_route.clone()));
        }
        Ok(())
    }
}
