//! Producer and consumer collaborators around the channels.
//!
//! A [`FrameSource`] feeds the producer loop and a [`FrameConsumer`] drains
//! the consumer loop; [`RatePacer`] caps either loop at its configured fps
//! and [`LoopTally`] throttles their progress and miss logging.

pub mod consumer;
pub mod error;
pub mod pace;
pub mod source;

pub use consumer::{FrameConsumer, FrameStats, FrameSummary};
pub use error::{PipelineError, Result};
pub use pace::{LoopTally, RatePacer, MISS_WARN_EVERY, PROGRESS_SECONDS};
pub use source::{open_source, FrameSource, PatternSource, RawDirSource};
