//! Stream frames over loopback TCP: a producer thread serves one client,
//! the main thread connects with bounded retry and receives.
//!
//! Run with:
//!   cargo run --example socket-stream

use std::thread;
use std::time::Duration;

use framebridge::frame::FrameMetadata;
use framebridge::pipeline::{FrameSource, PatternSource};
use framebridge::stream::{ConnectConfig, FrameReceiver, FrameServer};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let mut server = FrameServer::bind("127.0.0.1:0")?;
    let addr = server.local_addr().to_string();
    eprintln!("Listening on {addr}");

    let producer = thread::spawn(move || -> Result<(), String> {
        let mut source =
            PatternSource::new(FrameMetadata::new(32, 24, 3)).map_err(|e| e.to_string())?;
        let mut sender = server.accept().map_err(|e| e.to_string())?;
        for _ in 0..5 {
            if let Some(frame) = source.next_frame() {
                sender.send(&frame).map_err(|e| e.to_string())?;
            }
            thread::sleep(Duration::from_millis(100));
        }
        Ok(())
    });

    let mut receiver = FrameReceiver::connect(&addr, &ConnectConfig::default())?;
    eprintln!("Connected to {}", receiver.peer_addr());

    while let Some(frame) = receiver.recv_frame() {
        eprintln!("Received {:?} ({} bytes)", frame.shape(), frame.data().len());
    }
    eprintln!("Producer finished: closed={}", receiver.is_closed());

    producer
        .join()
        .map_err(|_| "producer thread panicked")??;
    Ok(())
}
