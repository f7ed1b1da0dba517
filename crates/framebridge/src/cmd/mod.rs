use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use clap::{Args, Subcommand, ValueEnum};
use framebridge::config::AppConfig;
use serde::Serialize;

use crate::exit::{CliError, CliResult, INTERNAL};
use crate::output::OutputFormat;

pub mod consume;
pub mod inspect;
pub mod produce;
pub mod version;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Publish frames from the configured data source.
    Produce(ProduceArgs),
    /// Read frames and hand them to the frame consumer.
    Consume(ConsumeArgs),
    /// Attach to a shared-memory channel and print its current header.
    Inspect(InspectArgs),
    /// Show version information.
    Version(VersionArgs),
}

pub fn run(command: Command, cfg: &AppConfig, format: OutputFormat) -> CliResult<i32> {
    match command {
        Command::Produce(args) => produce::run(args, cfg, format),
        Command::Consume(args) => consume::run(args, cfg, format),
        Command::Inspect(args) => inspect::run(args, cfg, format),
        Command::Version(args) => version::run(args),
    }
}

/// Channel used to move frames.
#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Transport {
    /// Shared memory, raw pixels.
    Shm,
    /// Shared memory, device handle with host fallback.
    Gpu,
    /// TCP stream.
    Socket,
}

impl fmt::Display for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Transport::Shm => "shm",
            Transport::Gpu => "gpu",
            Transport::Socket => "socket",
        })
    }
}

#[derive(Args, Debug)]
pub struct ProduceArgs {
    /// Channel to publish on.
    #[arg(long, short = 't', value_enum, default_value = "shm")]
    pub transport: Transport,
    /// Stop after N frames.
    #[arg(long)]
    pub frames: Option<u64>,
    /// Shared memory name. Overrides `shared_memory.name`.
    #[arg(long)]
    pub name: Option<String>,
}

#[derive(Args, Debug)]
pub struct ConsumeArgs {
    /// Channel to read from.
    #[arg(long, short = 't', value_enum, default_value = "shm")]
    pub transport: Transport,
    /// Stop after N processed frames.
    #[arg(long)]
    pub frames: Option<u64>,
    /// Shared memory name. Overrides `shared_memory.name`.
    #[arg(long)]
    pub name: Option<String>,
}

/// Shared-memory channel kinds `inspect` understands.
#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SlotKind {
    Shm,
    Gpu,
}

impl fmt::Display for SlotKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SlotKind::Shm => "shm",
            SlotKind::Gpu => "gpu",
        })
    }
}

#[derive(Args, Debug)]
pub struct InspectArgs {
    /// Channel layout to read.
    #[arg(long, short = 't', value_enum, default_value = "shm")]
    pub transport: SlotKind,
    /// Shared memory name. Overrides `shared_memory.name`.
    #[arg(long)]
    pub name: Option<String>,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}

pub fn install_ctrlc_handler(running: Arc<AtomicBool>) -> CliResult<()> {
    ctrlc::set_handler(move || {
        running.store(false, Ordering::SeqCst);
    })
    .map_err(|err| CliError::new(INTERNAL, format!("signal handler setup failed: {err}")))
}
