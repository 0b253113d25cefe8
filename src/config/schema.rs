use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::video::{PixelFormat, Resolution};

/// Main application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Capture device settings
    pub device: DeviceConfig,
    /// Live preview stream settings
    pub stream: StreamConfig,
    /// Still capture settings
    pub capture: CaptureConfig,
    /// Idle / shutdown policy
    pub power: PowerConfig,
    /// Indicator light wiring
    pub indicators: IndicatorConfig,
    /// Capture directory
    pub storage: StorageConfig,
    /// Web server settings
    pub web: WebConfig,
}

/// Capture backend selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Generated test pattern, no hardware required
    Synthetic,
    /// V4L2 device node (requires the `v4l2` feature)
    V4l2,
}

/// Capture device configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    pub backend: BackendKind,
    /// Device node for the V4L2 backend
    pub path: PathBuf,
    /// Pixel format requested from the device for preview frames
    pub format: PixelFormat,
    /// Driver buffer depth
    pub buffer_count: u32,
    /// Settle delay after the device starts streaming
    pub settle_ms: u64,
    /// Maximum wait for exclusive device access
    pub lock_timeout_ms: u64,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::Synthetic,
            path: PathBuf::from("/dev/video0"),
            format: PixelFormat::Rgb24,
            buffer_count: 8,
            settle_ms: 500,
            lock_timeout_ms: 2000,
        }
    }
}

impl DeviceConfig {
    pub fn settle(&self) -> Duration {
        Duration::from_millis(self.settle_ms)
    }

    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }
}

/// Live preview stream configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    pub width: u32,
    pub height: u32,
    /// Target frame rate
    pub fps: u32,
    /// JPEG quality (1-100)
    pub quality: u8,
    /// Emit every other captured frame
    pub subsample: bool,
    /// Device initialization attempts when a session starts
    pub init_retries: u32,
    pub init_backoff_ms: u64,
    /// Consecutive empty or failed captures before the session fails
    pub failure_budget: u32,
    pub empty_frame_backoff_ms: u64,
    pub error_backoff_ms: u64,
    /// Interval at which an open stream refreshes the activity tracker
    pub keepalive_secs: u64,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            width: 320,
            height: 480,
            fps: 10,
            quality: 50,
            subsample: true,
            init_retries: 5,
            init_backoff_ms: 500,
            failure_budget: 30,
            empty_frame_backoff_ms: 100,
            error_backoff_ms: 200,
            keepalive_secs: 30,
        }
    }
}

impl StreamConfig {
    pub fn resolution(&self) -> Resolution {
        Resolution::new(self.width, self.height)
    }

    pub fn frame_interval(&self) -> Duration {
        Duration::from_nanos(1_000_000_000 / u64::from(self.fps.max(1)))
    }

    pub fn init_backoff(&self) -> Duration {
        Duration::from_millis(self.init_backoff_ms)
    }

    pub fn empty_frame_backoff(&self) -> Duration {
        Duration::from_millis(self.empty_frame_backoff_ms)
    }

    pub fn error_backoff(&self) -> Duration {
        Duration::from_millis(self.error_backoff_ms)
    }

    pub fn keepalive(&self) -> Duration {
        Duration::from_secs(self.keepalive_secs)
    }
}

/// Still capture configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    pub width: u32,
    pub height: u32,
    pub quality: u8,
    /// Time given to autofocus before the still is taken
    pub autofocus_ms: u64,
    /// Fixed exposure for stills, in microseconds
    pub exposure_us: u32,
    pub analogue_gain: f32,
    /// How long the capture light stays on after a capture finishes
    pub feedback_ms: u64,
    /// File name prefix, followed by a local timestamp
    pub file_prefix: String,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            width: 2592,
            height: 1944,
            quality: 85,
            autofocus_ms: 5000,
            exposure_us: 30_000,
            analogue_gain: 1.0,
            feedback_ms: 300,
            file_prefix: "RF_pic_".to_string(),
        }
    }
}

impl CaptureConfig {
    pub fn resolution(&self) -> Resolution {
        Resolution::new(self.width, self.height)
    }

    pub fn autofocus(&self) -> Duration {
        Duration::from_millis(self.autofocus_ms)
    }

    pub fn feedback(&self) -> Duration {
        Duration::from_millis(self.feedback_ms)
    }
}

/// Idle and power-off policy
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PowerConfig {
    /// Inactivity before the device is released and the system goes idle
    pub idle_timeout_secs: u64,
    /// Inactivity before the host is powered off (0 = never)
    pub shutdown_timeout_secs: u64,
    /// Ping silence after which the client is considered gone
    pub client_timeout_secs: u64,
    /// Poll interval of the idle and client monitors
    pub monitor_interval_secs: u64,
    /// Delay between entering a state and reaching Running at boot / power-on
    pub boot_settle_ms: u64,
    /// Delay between an explicit power-off request and the power-off command
    pub power_off_delay_ms: u64,
    /// Actually run `power_off_command`; when false the request is only logged
    pub execute_power_off: bool,
    pub power_off_command: Vec<String>,
}

impl Default for PowerConfig {
    fn default() -> Self {
        Self {
            idle_timeout_secs: 300,
            shutdown_timeout_secs: 0,
            client_timeout_secs: 60,
            monitor_interval_secs: 10,
            boot_settle_ms: 2000,
            power_off_delay_ms: 2000,
            execute_power_off: false,
            power_off_command: vec!["sudo".to_string(), "poweroff".to_string()],
        }
    }
}

impl PowerConfig {
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    pub fn shutdown_timeout(&self) -> Option<Duration> {
        (self.shutdown_timeout_secs > 0).then(|| Duration::from_secs(self.shutdown_timeout_secs))
    }

    pub fn client_timeout(&self) -> Duration {
        Duration::from_secs(self.client_timeout_secs)
    }

    pub fn monitor_interval(&self) -> Duration {
        Duration::from_secs(self.monitor_interval_secs.max(1))
    }

    pub fn boot_settle(&self) -> Duration {
        Duration::from_millis(self.boot_settle_ms)
    }

    pub fn power_off_delay(&self) -> Duration {
        Duration::from_millis(self.power_off_delay_ms)
    }
}

/// A single GPIO-driven light
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndicatorPin {
    pub pin: u32,
    #[serde(default)]
    pub active_low: bool,
}

impl IndicatorPin {
    const fn new(pin: u32, active_low: bool) -> Self {
        Self { pin, active_low }
    }
}

/// Indicator light wiring
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IndicatorConfig {
    /// Drive real GPIO lines; when false all lights are virtual
    pub enabled: bool,
    /// GPIO chip device
    pub chip: String,
    pub status: IndicatorPin,
    pub power: IndicatorPin,
    pub capture: IndicatorPin,
    pub aux1: IndicatorPin,
    pub aux2: IndicatorPin,
}

impl Default for IndicatorConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            chip: "/dev/gpiochip0".to_string(),
            status: IndicatorPin::new(24, false),
            power: IndicatorPin::new(27, false),
            capture: IndicatorPin::new(15, false),
            aux1: IndicatorPin::new(18, true),
            aux2: IndicatorPin::new(23, true),
        }
    }
}

/// Capture storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub directory: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            directory: PathBuf::from("img"),
        }
    }
}

/// Web server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WebConfig {
    pub bind_address: String,
    pub port: u16,
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0".to_string(),
            port: 5000,
        }
    }
}
