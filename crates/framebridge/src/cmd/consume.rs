use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use framebridge::config::AppConfig;
use framebridge::frame::Frame;
use framebridge::pipeline::{FrameConsumer, FrameStats, FrameSummary, LoopTally, RatePacer};
use framebridge::shm::{
    DeviceContext, FrameIdTracker, Freshness, GpuFrameChannel, GpuPayload, NoDevice,
    SharedFrameChannel,
};
use framebridge::stream::FrameReceiver;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::cmd::{install_ctrlc_handler, ConsumeArgs, Transport};
use crate::exit::{shm_error, stream_error, CliResult, SUCCESS};
use crate::output::{optional, print_record, OutputFormat, Rows};

#[derive(Debug, Serialize)]
pub struct ConsumeReport {
    pub transport: Transport,
    pub frames: u64,
    pub fresh: u64,
    pub reused: u64,
    pub misses: u64,
    pub last: Option<FrameSummary>,
}

impl Rows for ConsumeReport {
    fn rows(&self) -> Vec<(&'static str, String)> {
        let last = self.last.as_ref();
        vec![
            ("transport", self.transport.to_string()),
            ("frames", self.frames.to_string()),
            ("fresh", self.fresh.to_string()),
            ("reused", self.reused.to_string()),
            ("misses", self.misses.to_string()),
            (
                "last_shape",
                optional(last.map(|s| format!("{}x{}x{}", s.width, s.height, s.channels))),
            ),
            ("last_mean", optional(last.map(|s| format!("{:.2}", s.mean)))),
            ("last_checksum", optional(last.map(|s| format!("{:#010x}", s.checksum)))),
        ]
    }
}

/// Drives the consumer: pacing, reuse of the last good frame, throttled logs.
struct Loop<'a> {
    pacer: RatePacer,
    tally: LoopTally,
    running: &'a AtomicBool,
    limit: Option<u64>,
    stats: FrameStats,
    last_good: Option<Frame>,
    report: ConsumeReport,
}

impl Loop<'_> {
    fn keep_going(&mut self) -> bool {
        if !self.running.load(Ordering::SeqCst) {
            return false;
        }
        if self.limit.is_some_and(|limit| self.report.frames >= limit) {
            return false;
        }
        self.pacer.wait();
        true
    }

    fn fresh(&mut self, frame: Frame) {
        self.report.fresh += 1;
        self.process(&frame);
        self.last_good = Some(frame);
    }

    /// No new frame this cycle: warn (throttled) and reprocess the last good one.
    fn miss(&mut self, why: &str) {
        self.report.misses += 1;
        if self.tally.miss() {
            warn!(
                misses = self.tally.miss_streak(),
                reason = why,
                "no frame received; reusing last good frame"
            );
        }
        if let Some(frame) = self.last_good.take() {
            self.report.reused += 1;
            self.process(&frame);
            self.last_good = Some(frame);
        }
    }

    fn process(&mut self, frame: &Frame) {
        self.report.frames += 1;
        match self.stats.consume(frame) {
            Ok(summary) => {
                debug!(shape = %frame.metadata(), mean = summary.mean, "frame processed");
                self.report.last = Some(summary);
            }
            Err(err) => warn!(error = %err, "frame consumer failed"),
        }
        if self.tally.frame() {
            info!(
                frames = self.report.frames,
                misses = self.report.misses,
                "consuming"
            );
        }
    }
}

pub fn run(args: ConsumeArgs, cfg: &AppConfig, format: OutputFormat) -> CliResult<i32> {
    let running = Arc::new(AtomicBool::new(true));
    install_ctrlc_handler(running.clone())?;

    let inference = &cfg.inference;
    info!(
        transport = %args.transport,
        fps = inference.fps,
        model = inference.model_path.as_deref().unwrap_or("-"),
        conf_threshold = inference.conf_threshold,
        iou_threshold = inference.iou_threshold,
        "consumer starting"
    );

    let mut lp = Loop {
        pacer: RatePacer::new(inference.fps),
        tally: LoopTally::new(inference.fps),
        running: &running,
        limit: args.frames,
        stats: FrameStats::new(),
        last_good: None,
        report: ConsumeReport {
            transport: args.transport,
            frames: 0,
            fresh: 0,
            reused: 0,
            misses: 0,
            last: None,
        },
    };
    let name = args.name.as_deref().unwrap_or(&cfg.shared_memory.name);

    match args.transport {
        Transport::Shm => consume_shm(&mut lp, cfg, name)?,
        Transport::Gpu => consume_gpu(&mut lp, cfg, name)?,
        Transport::Socket => consume_socket(&mut lp, cfg)?,
    }

    info!(
        frames = lp.report.frames,
        misses = lp.report.misses,
        "consumer stopped"
    );
    print_record(&lp.report, format);
    Ok(SUCCESS)
}

fn consume_shm(lp: &mut Loop<'_>, cfg: &AppConfig, name: &str) -> CliResult<()> {
    let shm = &cfg.shared_memory;
    let channel = SharedFrameChannel::attach_with_retry(
        name,
        shm.limits(),
        shm.channel_options(),
        &shm.attach_policy(),
    )
    .map_err(|err| shm_error("attach failed", err))?;
    info!(channel = channel.name(), region_len = channel.region_len(), "attached");

    // An unchanged counter means the slot still holds the frame already seen.
    let mut seen = None;
    while lp.keep_going() {
        let sequence = channel.sequence();
        if sequence.is_some() && sequence == seen {
            continue;
        }
        match channel.read() {
            Some(frame) => {
                seen = sequence;
                lp.fresh(frame);
            }
            None => lp.miss("empty or inconsistent slot"),
        }
    }
    Ok(())
}

fn consume_gpu(lp: &mut Loop<'_>, cfg: &AppConfig, name: &str) -> CliResult<()> {
    let shm = &cfg.shared_memory;
    let channel = GpuFrameChannel::attach_with_retry(
        name,
        shm.limits(),
        shm.channel_options(),
        &shm.attach_policy(),
    )
    .map_err(|err| shm_error("attach failed", err))?;
    info!(channel = channel.name(), region_len = channel.region_len(), "attached");

    let device = NoDevice;
    let mut ids = FrameIdTracker::new();
    while lp.keep_going() {
        let Some(gpu_frame) = channel.read() else {
            lp.miss("empty or inconsistent slot");
            continue;
        };
        match ids.observe(gpu_frame.frame_id) {
            Freshness::Repeat => continue,
            Freshness::Restarted => {
                info!(frame_id = gpu_frame.frame_id, "producer restarted its frame ids");
            }
            Freshness::Fresh => {}
        }
        match gpu_frame.payload {
            GpuPayload::Host(bytes) => match Frame::new(gpu_frame.metadata, bytes) {
                Ok(frame) => lp.fresh(frame),
                Err(err) => {
                    warn!(error = %err, "host fallback frame rejected");
                    lp.miss("invalid host fallback payload");
                }
            },
            GpuPayload::Device(handle) => match device.import(handle, gpu_frame.metadata) {
                Ok(mapping) => match mapping {},
                Err(err) => {
                    debug!(error = %err, "device handle not importable");
                    lp.miss("device handle not importable");
                }
            },
        }
    }
    Ok(())
}

fn consume_socket(lp: &mut Loop<'_>, cfg: &AppConfig) -> CliResult<()> {
    let addr = cfg.socket.addr();
    let connect = cfg.socket.connect_config();
    let mut receiver =
        FrameReceiver::connect(&addr, &connect).map_err(|err| stream_error("connect failed", err))?;

    while lp.keep_going() {
        if receiver.is_closed() {
            info!(%addr, "reconnecting");
            receiver = FrameReceiver::connect(&addr, &connect)
                .map_err(|err| stream_error("reconnect failed", err))?;
        }
        match receiver.recv_frame() {
            Some(frame) => lp.fresh(frame),
            None => lp.miss("no frame from server"),
        }
    }
    Ok(())
}
