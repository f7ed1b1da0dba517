use framebridge::config::AppConfig;
use framebridge::frame::{FrameLimits, FrameMetadata};
use framebridge::shm::{Consistency, GpuFrameChannel, SharedFrameChannel};
use serde::Serialize;

use crate::cmd::{InspectArgs, SlotKind};
use crate::exit::{shm_error, CliResult, SUCCESS};
use crate::output::{optional, print_record, OutputFormat, Rows};

#[derive(Debug, Serialize)]
pub struct InspectReport {
    pub kind: SlotKind,
    pub name: String,
    pub region_len: usize,
    pub sequenced: bool,
    pub sequence: Option<u64>,
    pub limits: String,
    pub width: u32,
    pub height: u32,
    pub channels: u32,
    pub payload_len: Option<usize>,
    /// Whether a reader would accept the stored header.
    pub valid: bool,
    pub frame_id: Option<u64>,
    pub device_handle: Option<u64>,
}

/// Channel facts shared by both slot layouts.
struct Slot<'a> {
    name: &'a str,
    region_len: usize,
    consistency: Consistency,
    sequence: Option<u64>,
    limits: FrameLimits,
}

impl InspectReport {
    fn new(kind: SlotKind, slot: Slot<'_>, meta: FrameMetadata) -> Self {
        Self {
            kind,
            name: slot.name.to_string(),
            region_len: slot.region_len,
            sequenced: slot.consistency == Consistency::Sequenced,
            sequence: slot.sequence,
            limits: slot.limits.to_string(),
            width: meta.width,
            height: meta.height,
            channels: meta.channels,
            payload_len: meta.payload_len(),
            valid: !meta.has_zero_dimension() && slot.limits.allows(&meta),
            frame_id: None,
            device_handle: None,
        }
    }
}

impl Rows for InspectReport {
    fn rows(&self) -> Vec<(&'static str, String)> {
        let mut rows = vec![
            ("kind", self.kind.to_string()),
            ("name", self.name.clone()),
            ("region_len", self.region_len.to_string()),
            ("sequenced", self.sequenced.to_string()),
            ("sequence", optional(self.sequence)),
            ("limits", self.limits.clone()),
            (
                "header",
                format!("{}x{}x{}", self.width, self.height, self.channels),
            ),
            ("payload_len", optional(self.payload_len)),
            ("valid", self.valid.to_string()),
        ];
        if self.kind == SlotKind::Gpu {
            rows.push(("frame_id", optional(self.frame_id)));
            rows.push((
                "device_handle",
                optional(self.device_handle.map(|h| format!("{h:#x}"))),
            ));
        }
        rows
    }
}

pub fn run(args: InspectArgs, cfg: &AppConfig, format: OutputFormat) -> CliResult<i32> {
    let shm = &cfg.shared_memory;
    let name = args.name.as_deref().unwrap_or(&shm.name);

    let report = match args.transport {
        SlotKind::Shm => {
            let channel = SharedFrameChannel::attach(name, shm.limits(), shm.channel_options())
                .map_err(|err| shm_error("attach failed", err))?;
            let slot = Slot {
                name: channel.name(),
                region_len: channel.region_len(),
                consistency: channel.options().consistency,
                sequence: channel.sequence(),
                limits: channel.limits(),
            };
            InspectReport::new(SlotKind::Shm, slot, channel.peek_header())
        }
        SlotKind::Gpu => {
            let channel = GpuFrameChannel::attach(name, shm.limits(), shm.channel_options())
                .map_err(|err| shm_error("attach failed", err))?;
            let header = channel.peek_header();
            let slot = Slot {
                name: channel.name(),
                region_len: channel.region_len(),
                consistency: channel.options().consistency,
                sequence: channel.sequence(),
                limits: channel.limits(),
            };
            InspectReport {
                frame_id: Some(header.frame_id),
                device_handle: Some(header.device_handle),
                ..InspectReport::new(SlotKind::Gpu, slot, header.metadata)
            }
        }
    };

    print_record(&report, format);
    Ok(SUCCESS)
}
