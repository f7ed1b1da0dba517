use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use framebridge::config::AppConfig;
use framebridge::frame::{Frame, FrameConfig};
use framebridge::pipeline::{open_source, FrameSource, LoopTally, RatePacer};
use framebridge::shm::{GpuFrameChannel, GpuPublisher, NoDevice, SharedFrameChannel, ShmError};
use framebridge::stream::{FrameServer, StreamError};
use serde::Serialize;
use tracing::{info, warn};

use crate::cmd::{install_ctrlc_handler, ProduceArgs, Transport};
use crate::exit::{pipeline_error, shm_error, stream_error, CliResult, SUCCESS};
use crate::output::{print_record, OutputFormat, Rows};

/// How long one accept wait lasts before the stop flag is checked again.
const ACCEPT_WAIT: Duration = Duration::from_millis(200);

#[derive(Debug, Default, Serialize)]
pub struct ProduceReport {
    pub transport: Option<Transport>,
    pub channel: String,
    pub frames_written: u64,
    pub frames_dropped: u64,
    pub clients: u64,
}

impl Rows for ProduceReport {
    fn rows(&self) -> Vec<(&'static str, String)> {
        vec![
            ("transport", crate::output::optional(self.transport)),
            ("channel", self.channel.clone()),
            ("frames_written", self.frames_written.to_string()),
            ("frames_dropped", self.frames_dropped.to_string()),
            ("clients", self.clients.to_string()),
        ]
    }
}

/// Shared state of one producer loop.
struct Loop<'a> {
    source: Box<dyn FrameSource + Send>,
    pacer: RatePacer,
    tally: LoopTally,
    running: &'a AtomicBool,
    limit: Option<u64>,
    handled: u64,
}

impl Loop<'_> {
    /// Next frame to publish, or `None` when the loop should stop.
    fn next(&mut self) -> Option<Frame> {
        loop {
            if !self.running.load(Ordering::SeqCst) || self.source.is_exhausted() {
                return None;
            }
            if self.limit.is_some_and(|limit| self.handled >= limit) {
                return None;
            }
            self.pacer.wait();
            if let Some(frame) = self.source.next_frame() {
                self.handled += 1;
                return Some(frame);
            }
        }
    }

    fn written(&mut self, report: &mut ProduceReport) {
        report.frames_written += 1;
        if self.tally.frame() {
            info!(frames = report.frames_written, dropped = report.frames_dropped, "publishing");
        }
    }

    fn dropped(&mut self, report: &mut ProduceReport, err: &dyn fmt::Display) {
        report.frames_dropped += 1;
        if self.tally.miss() {
            warn!(error = %err, dropped = report.frames_dropped, "frame rejected by channel; dropped");
        }
    }
}

pub fn run(args: ProduceArgs, cfg: &AppConfig, format: OutputFormat) -> CliResult<i32> {
    let running = Arc::new(AtomicBool::new(true));
    install_ctrlc_handler(running.clone())?;

    let source =
        open_source(&cfg.data_source).map_err(|err| pipeline_error("open source failed", err))?;
    info!(
        source = %cfg.data_source.kind,
        shape = %source.nominal_shape(),
        fps = cfg.data_source.fps,
        transport = %args.transport,
        "producer starting"
    );

    let mut lp = Loop {
        source,
        pacer: RatePacer::new(cfg.data_source.fps),
        tally: LoopTally::new(cfg.data_source.fps),
        running: &running,
        limit: args.frames,
        handled: 0,
    };
    let name = args.name.as_deref().unwrap_or(&cfg.shared_memory.name);

    let mut report = ProduceReport {
        transport: Some(args.transport),
        ..ProduceReport::default()
    };
    match args.transport {
        Transport::Shm => produce_shm(&mut lp, cfg, name, &mut report)?,
        Transport::Gpu => produce_gpu(&mut lp, cfg, name, &mut report)?,
        Transport::Socket => produce_socket(&mut lp, cfg, &mut report)?,
    }

    info!(
        frames = report.frames_written,
        dropped = report.frames_dropped,
        "producer stopped"
    );
    print_record(&report, format);
    Ok(SUCCESS)
}

fn produce_shm(
    lp: &mut Loop<'_>,
    cfg: &AppConfig,
    name: &str,
    report: &mut ProduceReport,
) -> CliResult<()> {
    let shm = &cfg.shared_memory;
    let mut channel = SharedFrameChannel::create_or_replace(name, shm.limits(), shm.channel_options())
        .map_err(|err| shm_error("create channel failed", err))?;
    report.channel = channel.name().to_string();

    let result = publish_all(lp, report, |frame| channel.write(frame));
    // Unlink even when the loop failed.
    let destroyed = channel.destroy();
    result?;
    destroyed.map_err(|err| shm_error("destroy channel failed", err))
}

fn produce_gpu(
    lp: &mut Loop<'_>,
    cfg: &AppConfig,
    name: &str,
    report: &mut ProduceReport,
) -> CliResult<()> {
    let shm = &cfg.shared_memory;
    let channel = GpuFrameChannel::create_or_replace(name, shm.limits(), shm.channel_options())
        .map_err(|err| shm_error("create channel failed", err))?;
    report.channel = channel.name().to_string();

    // On failure the channel is dropped inside `new`, which unlinks it.
    let mut publisher = GpuPublisher::new(channel, &NoDevice, shm.gpu_fallback)
        .map_err(|err| shm_error("device setup failed", err))?;
    if publisher.is_host_fallback() {
        info!(channel = report.channel, "gpu channel in host fallback mode");
    }

    let result = publish_all(lp, report, |frame| publisher.publish(frame).map(|_| ()));
    let destroyed = publisher.into_channel().destroy();
    result?;
    destroyed.map_err(|err| shm_error("destroy channel failed", err))
}

fn publish_all(
    lp: &mut Loop<'_>,
    report: &mut ProduceReport,
    mut write: impl FnMut(&Frame) -> Result<(), ShmError>,
) -> CliResult<()> {
    while let Some(frame) = lp.next() {
        match write(&frame) {
            Ok(()) => lp.written(report),
            Err(err) if err.is_size_exceeded() => lp.dropped(report, &err),
            Err(err) => return Err(shm_error("write failed", err)),
        }
    }
    Ok(())
}

fn produce_socket(lp: &mut Loop<'_>, cfg: &AppConfig, report: &mut ProduceReport) -> CliResult<()> {
    let frame_config = FrameConfig {
        write_timeout: cfg.socket.write_timeout,
        ..FrameConfig::default()
    };
    let mut server = FrameServer::bind(&cfg.socket.addr())
        .map_err(|err| stream_error("bind failed", err))?
        .with_frame_config(frame_config);
    report.channel = server.local_addr().to_string();
    info!(addr = %server.local_addr(), "waiting for frame client");

    // One client at a time; a failed send ends the client, not the producer.
    'clients: while lp.running.load(Ordering::SeqCst) {
        let Some(mut sender) = server
            .accept_timeout(ACCEPT_WAIT)
            .map_err(|err| stream_error("accept failed", err))?
        else {
            continue;
        };
        report.clients += 1;

        loop {
            let Some(frame) = lp.next() else {
                break 'clients;
            };
            match sender.send(&frame) {
                Ok(()) => lp.written(report),
                Err(StreamError::Rejected { source, .. }) => lp.dropped(report, &source),
                Err(StreamError::SendFailed { peer, source }) => {
                    warn!(%peer, error = %source, "client dropped; waiting for the next one");
                    continue 'clients;
                }
                Err(err) => return Err(stream_error("send failed", err)),
            }
        }
    }
    Ok(())
}
