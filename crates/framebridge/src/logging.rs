use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Mutex;

use clap::ValueEnum;
use tracing::level_filters::LevelFilter;
use tracing::Subscriber;
use tracing_subscriber::fmt::{self, MakeWriter};
use tracing_subscriber::layer::{Layer, SubscriberExt};
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::Registry;

#[derive(Copy, Clone, Debug, ValueEnum)]
pub enum LogFormat {
    Text,
    Json,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub fn as_filter(self) -> LevelFilter {
        match self {
            LogLevel::Error => LevelFilter::ERROR,
            LogLevel::Warn => LevelFilter::WARN,
            LogLevel::Info => LevelFilter::INFO,
            LogLevel::Debug => LevelFilter::DEBUG,
            LogLevel::Trace => LevelFilter::TRACE,
        }
    }
}

impl FromStr for LogLevel {
    type Err = String;

    /// Accepts the level names used in config files (`warning` included).
    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "error" | "critical" => Ok(LogLevel::Error),
            "warn" | "warning" => Ok(LogLevel::Warn),
            "info" => Ok(LogLevel::Info),
            "debug" => Ok(LogLevel::Debug),
            "trace" => Ok(LogLevel::Trace),
            other => Err(format!("unknown log level {other:?}")),
        }
    }
}

/// Size at which the log file is rolled over.
pub const LOG_FILE_MAX_BYTES: u64 = 10 * 1024 * 1024;
/// Rolled-over files kept next to the live one (`<file>.1` is the newest).
pub const LOG_FILE_BACKUPS: u32 = 5;

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

/// Where log lines go. Console and file are independent sinks.
#[derive(Debug, Clone, Copy)]
pub struct LogSinks<'a> {
    pub console: bool,
    pub file: Option<&'a Path>,
}

impl<'a> LogSinks<'a> {
    pub fn from_config(file: Option<&'a Path>, console: bool) -> Self {
        Self { console, file }
    }
}

/// Append-only log file that rolls over once it reaches `max_bytes`.
pub struct RotatingFile {
    path: PathBuf,
    max_bytes: u64,
    backups: u32,
    file: File,
    written: u64,
}

impl RotatingFile {
    /// Open `path` for appending; parent directories are created.
    pub fn open(path: &Path, max_bytes: u64, backups: u32) -> io::Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        let written = file.metadata()?.len();
        Ok(Self {
            path: path.to_path_buf(),
            max_bytes,
            backups,
            file,
            written,
        })
    }

    fn backup_path(&self, index: u32) -> PathBuf {
        let mut name = self.path.as_os_str().to_owned();
        name.push(format!(".{index}"));
        PathBuf::from(name)
    }

    fn rotate(&mut self) -> io::Result<()> {
        self.file.flush()?;
        if self.backups == 0 {
            self.file = OpenOptions::new()
                .write(true)
                .truncate(true)
                .open(&self.path)?;
        } else {
            for index in (1..self.backups).rev() {
                let from = self.backup_path(index);
                if from.exists() {
                    fs::rename(&from, self.backup_path(index + 1))?;
                }
            }
            fs::rename(&self.path, self.backup_path(1))?;
            self.file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&self.path)?;
        }
        self.written = 0;
        Ok(())
    }
}

impl Write for RotatingFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.written > 0 && self.written + buf.len() as u64 >= self.max_bytes {
            self.rotate()?;
        }
        let n = self.file.write(buf)?;
        self.written += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file.flush()
    }
}

fn fmt_layer<W>(format: LogFormat, level: LevelFilter, writer: W) -> BoxedLayer
where
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    let layer = fmt::layer()
        .with_writer(writer)
        .with_ansi(false)
        .with_target(false);
    match format {
        LogFormat::Text => layer.with_filter(level).boxed(),
        LogFormat::Json => layer.json().with_filter(level).boxed(),
    }
}

fn build_subscriber<C>(
    format: LogFormat,
    level: LogLevel,
    console: Option<C>,
    file: Option<RotatingFile>,
) -> impl Subscriber + Send + Sync
where
    C: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    let level = level.as_filter();
    let mut layers: Vec<BoxedLayer> = Vec::new();
    if let Some(console) = console {
        layers.push(fmt_layer(format, level, console));
    }
    if let Some(file) = file {
        layers.push(fmt_layer(format, level, Mutex::new(file)));
    }
    Registry::default().with(layers)
}

pub fn init_logging(format: LogFormat, level: LogLevel, sinks: LogSinks<'_>) -> io::Result<()> {
    let file = sinks
        .file
        .map(|path| RotatingFile::open(path, LOG_FILE_MAX_BYTES, LOG_FILE_BACKUPS))
        .transpose()?;
    let console = sinks.console.then_some(io::stderr);
    let _ = build_subscriber(format, level, console, file).try_init();
    Ok(())
}
