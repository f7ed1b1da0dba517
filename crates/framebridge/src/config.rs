//! Application configuration.
//!
//! Loaded once from a TOML file and passed by value into each component.
//! Every section and key is optional; missing values fall back to defaults.
//!
//! ```toml
//! [data_source]
//! type = "pattern"        # pattern | images | video | camera
//! fps = 24
//!
//! [shared_memory]
//! name = "yolo_image_shm"
//! max_width = 1920
//! max_height = 1080
//! max_channels = 3
//!
//! [socket]
//! host = "127.0.0.1"
//! port = 8888
//! ```

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use framebridge_frame::{FrameLimits, FrameMetadata};
use framebridge_shm::{ChannelOptions, Consistency, DeviceFallback, DEFAULT_READ_ATTEMPTS};
use framebridge_stream::ConnectConfig;
use framebridge_transport::RetryPolicy;
use serde::Deserialize;

const DEFAULT_SOURCE_FPS: u32 = 24;
const DEFAULT_INFERENCE_FPS: u32 = 10;
const DEFAULT_SOURCE_WIDTH: u32 = 640;
const DEFAULT_SOURCE_HEIGHT: u32 = 480;
const DEFAULT_SOURCE_CHANNELS: u32 = 3;
const DEFAULT_SHM_NAME: &str = "yolo_image_shm";
const DEFAULT_MAX_WIDTH: u32 = 1920;
const DEFAULT_MAX_HEIGHT: u32 = 1080;
const DEFAULT_MAX_CHANNELS: u32 = 3;
const DEFAULT_SOCKET_HOST: &str = "127.0.0.1";
const DEFAULT_SOCKET_PORT: u16 = 8888;
const DEFAULT_CONF_THRESHOLD: f32 = 0.25;
const DEFAULT_IOU_THRESHOLD: f32 = 0.45;
const DEFAULT_LOG_LEVEL: &str = "info";

/// Environment variable naming the configuration file.
pub const CONFIG_ENV: &str = "FRAMEBRIDGE_CONFIG";

/// Errors raised while loading or validating configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("invalid config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

pub type Result<T> = std::result::Result<T, ConfigError>;

#[derive(Debug, Deserialize, Default)]
struct ConfigFile {
    data_source: Option<DataSourceFile>,
    shared_memory: Option<SharedMemoryFile>,
    socket: Option<SocketFile>,
    inference: Option<InferenceFile>,
    logging: Option<LoggingFile>,
}

#[derive(Debug, Deserialize, Default)]
struct DataSourceFile {
    #[serde(rename = "type")]
    kind: Option<String>,
    fps: Option<u32>,
    width: Option<u32>,
    height: Option<u32>,
    channels: Option<u32>,
    video_path: Option<PathBuf>,
    camera_index: Option<u32>,
    images_dir: Option<PathBuf>,
    #[serde(rename = "loop")]
    looping: Option<bool>,
}

#[derive(Debug, Deserialize, Default)]
struct SharedMemoryFile {
    name: Option<String>,
    max_width: Option<u32>,
    max_height: Option<u32>,
    max_channels: Option<u32>,
    consistency: Option<String>,
    read_attempts: Option<u32>,
    attach_attempts: Option<u32>,
    attach_delay_ms: Option<u64>,
    gpu_fallback: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct SocketFile {
    host: Option<String>,
    port: Option<u16>,
    connect_attempts: Option<u32>,
    retry_delay_ms: Option<u64>,
    connect_timeout_ms: Option<u64>,
    read_timeout_ms: Option<u64>,
    write_timeout_ms: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct InferenceFile {
    model_path: Option<String>,
    fps: Option<u32>,
    conf_threshold: Option<f32>,
    iou_threshold: Option<f32>,
    classes: Option<Vec<u32>>,
}

#[derive(Debug, Deserialize, Default)]
struct LoggingFile {
    level: Option<String>,
    file: Option<PathBuf>,
    console: Option<bool>,
}

/// Kind of frame source the producer reads from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    /// Synthetic moving gradient.
    Pattern,
    /// Directory of headerless raw frames.
    Images,
    /// Video file; needs an external capture backend.
    Video,
    /// Camera device; needs an external capture backend.
    Camera,
}

impl FromStr for SourceKind {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "pattern" => Ok(Self::Pattern),
            "images" => Ok(Self::Images),
            "video" => Ok(Self::Video),
            "camera" => Ok(Self::Camera),
            other => Err(ConfigError::Invalid(format!(
                "data_source.type must be pattern, images, video, or camera (got {other:?})"
            ))),
        }
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Pattern => "pattern",
            Self::Images => "images",
            Self::Video => "video",
            Self::Camera => "camera",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DataSourceSettings {
    pub kind: SourceKind,
    /// Producer write rate (a maximum, not a busy-loop period).
    pub fps: u32,
    /// Nominal frame shape for pattern and images sources.
    pub width: u32,
    pub height: u32,
    pub channels: u32,
    pub video_path: Option<PathBuf>,
    pub camera_index: u32,
    pub images_dir: Option<PathBuf>,
    /// Restart from the first frame when the source runs out.
    pub looping: bool,
}

impl DataSourceSettings {
    pub fn shape(&self) -> FrameMetadata {
        FrameMetadata::new(self.width, self.height, self.channels)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SharedMemorySettings {
    pub name: String,
    pub max_width: u32,
    pub max_height: u32,
    pub max_channels: u32,
    pub consistency: Consistency,
    pub read_attempts: u32,
    pub attach_attempts: u32,
    pub attach_delay: Duration,
    pub gpu_fallback: DeviceFallback,
}

impl SharedMemorySettings {
    pub fn limits(&self) -> FrameLimits {
        FrameLimits::new(self.max_width, self.max_height, self.max_channels)
    }

    pub fn channel_options(&self) -> ChannelOptions {
        ChannelOptions {
            consistency: self.consistency,
            read_attempts: self.read_attempts,
        }
    }

    pub fn attach_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.attach_attempts, self.attach_delay)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SocketSettings {
    pub host: String,
    pub port: u16,
    pub connect_attempts: u32,
    pub retry_delay: Duration,
    pub connect_timeout: Duration,
    pub read_timeout: Duration,
    pub write_timeout: Option<Duration>,
}

impl SocketSettings {
    /// `host:port`, bracketing IPv6 literals.
    pub fn addr(&self) -> String {
        if self.host.contains(':') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }

    pub fn connect_config(&self) -> ConnectConfig {
        ConnectConfig {
            retry: RetryPolicy::new(self.connect_attempts, self.retry_delay),
            connect_timeout: self.connect_timeout,
            read_timeout: Some(self.read_timeout),
            ..ConnectConfig::default()
        }
    }
}

/// Options of the external detector; carried and logged, not interpreted.
#[derive(Debug, Clone, PartialEq)]
pub struct InferenceSettings {
    pub model_path: Option<String>,
    /// Consumer read rate (a maximum).
    pub fps: u32,
    pub conf_threshold: f32,
    pub iou_threshold: f32,
    pub classes: Option<Vec<u32>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LoggingSettings {
    pub level: String,
    pub file: Option<PathBuf>,
    pub console: bool,
}

/// Fully resolved configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct AppConfig {
    pub data_source: DataSourceSettings,
    pub shared_memory: SharedMemorySettings,
    pub socket: SocketSettings,
    pub inference: InferenceSettings,
    pub logging: LoggingSettings,
}

impl Default for AppConfig {
    fn default() -> Self {
        // Defaults for an empty file cannot fail validation.
        Self::from_file(ConfigFile::default()).unwrap_or_else(|_| unreachable!())
    }
}

impl AppConfig {
    /// Load from `path` (or defaults when `None`), apply `FRAMEBRIDGE_*`
    /// environment overrides, and validate.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let file = match path {
            Some(path) => read_config_file(path)?,
            None => ConfigFile::default(),
        };
        let mut cfg = Self::from_file(file)?;
        cfg.apply_overrides(|key| std::env::var(key).ok());
        cfg.validate()?;
        Ok(cfg)
    }

    /// Parse and validate a TOML document without touching the environment.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let file = toml::from_str(raw).map_err(|source| ConfigError::Parse {
            path: PathBuf::from("<inline>"),
            source,
        })?;
        let cfg = Self::from_file(file)?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: ConfigFile) -> Result<Self> {
        let ds = file.data_source.unwrap_or_default();
        let data_source = DataSourceSettings {
            kind: match ds.kind.as_deref() {
                Some(kind) => kind.parse()?,
                None => SourceKind::Pattern,
            },
            fps: ds.fps.unwrap_or(DEFAULT_SOURCE_FPS),
            width: ds.width.unwrap_or(DEFAULT_SOURCE_WIDTH),
            height: ds.height.unwrap_or(DEFAULT_SOURCE_HEIGHT),
            channels: ds.channels.unwrap_or(DEFAULT_SOURCE_CHANNELS),
            video_path: ds.video_path,
            camera_index: ds.camera_index.unwrap_or(0),
            images_dir: ds.images_dir,
            looping: ds.looping.unwrap_or(true),
        };

        let shm = file.shared_memory.unwrap_or_default();
        let shared_memory = SharedMemorySettings {
            name: shm.name.unwrap_or_else(|| DEFAULT_SHM_NAME.to_string()),
            max_width: shm.max_width.unwrap_or(DEFAULT_MAX_WIDTH),
            max_height: shm.max_height.unwrap_or(DEFAULT_MAX_HEIGHT),
            max_channels: shm.max_channels.unwrap_or(DEFAULT_MAX_CHANNELS),
            consistency: match shm.consistency.as_deref() {
                Some(value) => parse_consistency(value)?,
                None => Consistency::default(),
            },
            read_attempts: shm.read_attempts.unwrap_or(DEFAULT_READ_ATTEMPTS),
            attach_attempts: shm
                .attach_attempts
                .unwrap_or(framebridge_transport::DEFAULT_MAX_ATTEMPTS),
            attach_delay: shm
                .attach_delay_ms
                .map(Duration::from_millis)
                .unwrap_or(framebridge_transport::DEFAULT_RETRY_DELAY),
            gpu_fallback: match shm.gpu_fallback.as_deref() {
                Some(value) => parse_fallback(value)?,
                None => DeviceFallback::Host,
            },
        };

        let sock = file.socket.unwrap_or_default();
        let socket = SocketSettings {
            host: sock
                .host
                .unwrap_or_else(|| DEFAULT_SOCKET_HOST.to_string()),
            port: sock.port.unwrap_or(DEFAULT_SOCKET_PORT),
            connect_attempts: sock
                .connect_attempts
                .unwrap_or(framebridge_transport::DEFAULT_MAX_ATTEMPTS),
            retry_delay: sock
                .retry_delay_ms
                .map(Duration::from_millis)
                .unwrap_or(framebridge_transport::DEFAULT_RETRY_DELAY),
            connect_timeout: sock
                .connect_timeout_ms
                .map(Duration::from_millis)
                .unwrap_or(framebridge_stream::DEFAULT_CONNECT_TIMEOUT),
            read_timeout: sock
                .read_timeout_ms
                .map(Duration::from_millis)
                .unwrap_or(framebridge_stream::DEFAULT_READ_TIMEOUT),
            write_timeout: sock.write_timeout_ms.map(Duration::from_millis),
        };

        let inf = file.inference.unwrap_or_default();
        let inference = InferenceSettings {
            model_path: inf.model_path,
            fps: inf.fps.unwrap_or(DEFAULT_INFERENCE_FPS),
            conf_threshold: inf.conf_threshold.unwrap_or(DEFAULT_CONF_THRESHOLD),
            iou_threshold: inf.iou_threshold.unwrap_or(DEFAULT_IOU_THRESHOLD),
            classes: inf.classes,
        };

        let log = file.logging.unwrap_or_default();
        let logging = LoggingSettings {
            level: log.level.unwrap_or_else(|| DEFAULT_LOG_LEVEL.to_string()),
            file: log.file,
            console: log.console.unwrap_or(true),
        };

        Ok(Self {
            data_source,
            shared_memory,
            socket,
            inference,
            logging,
        })
    }

    /// Apply `FRAMEBRIDGE_SHM_NAME`, `FRAMEBRIDGE_SOCKET_HOST`,
    /// `FRAMEBRIDGE_SOCKET_PORT` and `FRAMEBRIDGE_LOG_LEVEL` from `lookup`.
    ///
    /// Blank values are ignored; an unparsable port is left for `validate`
    /// to report through the unchanged setting.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let get = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        if let Some(name) = get("FRAMEBRIDGE_SHM_NAME") {
            self.shared_memory.name = name;
        }
        if let Some(host) = get("FRAMEBRIDGE_SOCKET_HOST") {
            self.socket.host = host;
        }
        if let Some(port) = get("FRAMEBRIDGE_SOCKET_PORT").and_then(|p| p.trim().parse().ok()) {
            self.socket.port = port;
        }
        if let Some(level) = get("FRAMEBRIDGE_LOG_LEVEL") {
            self.logging.level = level;
        }
    }

    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: &str| Err(ConfigError::Invalid(msg.to_string()));

        if self.data_source.fps == 0 {
            return invalid("data_source.fps must be greater than zero");
        }
        if self.inference.fps == 0 {
            return invalid("inference.fps must be greater than zero");
        }
        if self.data_source.shape().has_zero_dimension() {
            return invalid("data_source width, height, and channels must be greater than zero");
        }
        let shm = &self.shared_memory;
        if shm.max_width == 0 || shm.max_height == 0 || shm.max_channels == 0 {
            return invalid("shared_memory maxima must be greater than zero");
        }
        if shm.limits().capacity().is_none() {
            return invalid("shared_memory maxima describe an unaddressable region");
        }
        if shm.name.trim_start_matches('/').is_empty() {
            return invalid("shared_memory.name must not be empty");
        }
        if shm.attach_attempts == 0 || shm.read_attempts == 0 || self.socket.connect_attempts == 0 {
            return invalid("retry attempt counts must be greater than zero");
        }
        if self.socket.host.trim().is_empty() {
            return invalid("socket.host must not be empty");
        }
        if !(0.0..=1.0).contains(&self.inference.conf_threshold)
            || !(0.0..=1.0).contains(&self.inference.iou_threshold)
        {
            return invalid("inference thresholds must be within 0.0..=1.0");
        }
        match (self.data_source.kind, &self.data_source.images_dir) {
            (SourceKind::Images, None) => invalid("data_source.images_dir is required for images"),
            _ => Ok(()),
        }
    }
}

fn parse_consistency(value: &str) -> Result<Consistency> {
    match value.trim().to_ascii_lowercase().as_str() {
        "sequenced" => Ok(Consistency::Sequenced),
        "unsynchronized" => Ok(Consistency::Unsynchronized),
        other => Err(ConfigError::Invalid(format!(
            "shared_memory.consistency must be sequenced or unsynchronized (got {other:?})"
        ))),
    }
}

fn parse_fallback(value: &str) -> Result<DeviceFallback> {
    match value.trim().to_ascii_lowercase().as_str() {
        "host" => Ok(DeviceFallback::Host),
        "fail" => Ok(DeviceFallback::Fail),
        other => Err(ConfigError::Invalid(format!(
            "shared_memory.gpu_fallback must be host or fail (got {other:?})"
        ))),
    }
}

fn read_config_file(path: &Path) -> Result<ConfigFile> {
    let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    toml::from_str(&raw).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    #[test]
    fn empty_document_uses_defaults() {
        let cfg = AppConfig::from_toml_str("").unwrap();
        assert_eq!(cfg, AppConfig::default());
        assert_eq!(cfg.data_source.kind, SourceKind::Pattern);
        assert_eq!(cfg.data_source.fps, 24);
        assert_eq!(cfg.inference.fps, 10);
        assert_eq!(cfg.shared_memory.name, "yolo_image_shm");
        assert_eq!(cfg.shared_memory.limits(), FrameLimits::new(1920, 1080, 3));
        assert_eq!(cfg.shared_memory.consistency, Consistency::Sequenced);
        assert_eq!(cfg.socket.addr(), "127.0.0.1:8888");
        assert_eq!(cfg.logging.level, "info");
        assert!(cfg.logging.console);
    }

    #[test]
    fn parses_every_section() {
        let cfg = AppConfig::from_toml_str(
            r#"
            [data_source]
            type = "images"
            fps = 30
            width = 4
            height = 4
            channels = 3
            images_dir = "/data/frames"
            loop = false

            [shared_memory]
            name = "cam0"
            max_width = 4
            max_height = 4
            max_channels = 3
            consistency = "unsynchronized"
            attach_attempts = 3
            attach_delay_ms = 250
            gpu_fallback = "fail"

            [socket]
            host = "::1"
            port = 9000
            read_timeout_ms = 500

            [inference]
            model_path = "yolov8n.pt"
            fps = 5
            conf_threshold = 0.5
            classes = [0, 2]

            [logging]
            level = "debug"
            file = "logs/framebridge.log"
            console = false
            "#,
        )
        .unwrap();

        assert_eq!(cfg.data_source.kind, SourceKind::Images);
        assert_eq!(cfg.data_source.shape(), FrameMetadata::new(4, 4, 3));
        assert!(!cfg.data_source.looping);
        assert_eq!(cfg.shared_memory.channel_options(), ChannelOptions::unsynchronized());
        assert_eq!(
            cfg.shared_memory.attach_policy(),
            RetryPolicy::new(3, Duration::from_millis(250))
        );
        assert_eq!(cfg.shared_memory.gpu_fallback, DeviceFallback::Fail);
        assert_eq!(cfg.socket.addr(), "[::1]:9000");
        assert_eq!(
            cfg.socket.connect_config().read_timeout,
            Some(Duration::from_millis(500))
        );
        assert_eq!(cfg.inference.classes, Some(vec![0, 2]));
        assert_eq!(cfg.logging.file, Some(PathBuf::from("logs/framebridge.log")));
    }

    #[test]
    fn rejects_zero_rates_and_maxima() {
        for doc in [
            "[data_source]\nfps = 0",
            "[inference]\nfps = 0",
            "[shared_memory]\nmax_width = 0",
            "[shared_memory]\nattach_attempts = 0",
            "[socket]\nconnect_attempts = 0",
            "[data_source]\nchannels = 0",
        ] {
            let err = AppConfig::from_toml_str(doc).unwrap_err();
            assert!(matches!(err, ConfigError::Invalid(_)), "{doc}: {err}");
        }
    }

    #[test]
    fn rejects_unknown_enum_values() {
        for doc in [
            "[data_source]\ntype = \"webcam\"",
            "[shared_memory]\nconsistency = \"eventual\"",
            "[shared_memory]\ngpu_fallback = \"cpu\"",
        ] {
            assert!(matches!(
                AppConfig::from_toml_str(doc),
                Err(ConfigError::Invalid(_))
            ));
        }
    }

    #[test]
    fn images_source_requires_directory() {
        let err = AppConfig::from_toml_str("[data_source]\ntype = \"images\"").unwrap_err();
        assert!(err.to_string().contains("images_dir"));
    }

    #[test]
    fn malformed_toml_is_a_parse_error() {
        assert!(matches!(
            AppConfig::from_toml_str("[shared_memory\nname = 1"),
            Err(ConfigError::Parse { .. })
        ));
    }

    #[test]
    fn environment_overrides() {
        let env: HashMap<&str, &str> = [
            ("FRAMEBRIDGE_SHM_NAME", "override"),
            ("FRAMEBRIDGE_SOCKET_HOST", "10.0.0.2"),
            ("FRAMEBRIDGE_SOCKET_PORT", "7000"),
            ("FRAMEBRIDGE_LOG_LEVEL", "  "),
        ]
        .into_iter()
        .collect();

        let mut cfg = AppConfig::default();
        cfg.apply_overrides(|key| env.get(key).map(|v| v.to_string()));

        assert_eq!(cfg.shared_memory.name, "override");
        assert_eq!(cfg.socket.addr(), "10.0.0.2:7000");
        assert_eq!(cfg.logging.level, "info");
    }

    #[test]
    fn load_reads_file_from_disk() {
        let path = std::env::temp_dir().join(format!(
            "framebridge-config-{}-{}.toml",
            std::process::id(),
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .expect("time should be after epoch")
                .as_nanos()
        ));
        std::fs::write(&path, "[inference]\nfps = 3\n").unwrap();

        let cfg = AppConfig::load(Some(&path)).unwrap();
        assert_eq!(cfg.inference.fps, 3);
        let _ = std::fs::remove_file(&path);

        assert!(matches!(
            AppConfig::load(Some(&path)),
            Err(ConfigError::Read { .. })
        ));
    }
}
