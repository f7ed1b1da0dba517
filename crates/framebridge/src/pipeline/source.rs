use std::fs;
use std::path::{Path, PathBuf};

use framebridge_frame::{Frame, FrameMetadata};
use tracing::{debug, info, warn};

use crate::config::{DataSourceSettings, SourceKind};
use crate::pipeline::error::{PipelineError, Result};

/// Produces pixel buffers at a nominal shape.
///
/// Sources are lazy and restartable: a looping source goes back to its
/// first frame when it runs out, and an unreadable frame is skipped
/// (`None` for this cycle) rather than ending the sequence.
pub trait FrameSource {
    /// The next frame, or `None` when nothing usable is available this cycle.
    fn next_frame(&mut self) -> Option<Frame>;

    /// Shape of the frames this source normally yields.
    fn nominal_shape(&self) -> FrameMetadata;

    /// True once a non-looping source has delivered its last frame.
    fn is_exhausted(&self) -> bool {
        false
    }
}

impl<S: FrameSource + ?Sized> FrameSource for Box<S> {
    fn next_frame(&mut self) -> Option<Frame> {
        (**self).next_frame()
    }

    fn nominal_shape(&self) -> FrameMetadata {
        (**self).nominal_shape()
    }

    fn is_exhausted(&self) -> bool {
        (**self).is_exhausted()
    }
}

/// Open the source described by `settings`.
pub fn open_source(settings: &DataSourceSettings) -> Result<Box<dyn FrameSource + Send>> {
    match settings.kind {
        SourceKind::Pattern => Ok(Box::new(PatternSource::new(settings.shape())?)),
        SourceKind::Images => {
            let dir = settings
                .images_dir
                .as_deref()
                .ok_or_else(|| PipelineError::EmptySource {
                    dir: PathBuf::new(),
                })?;
            Ok(Box::new(RawDirSource::open(
                dir,
                settings.shape(),
                settings.looping,
            )?))
        }
        SourceKind::Video | SourceKind::Camera => Err(PipelineError::UnsupportedSource {
            kind: settings.kind.to_string(),
        }),
    }
}

/// Synthetic diagonal gradient that shifts every frame.
#[derive(Debug)]
pub struct PatternSource {
    metadata: FrameMetadata,
    len: usize,
    tick: u64,
}

impl PatternSource {
    pub fn new(metadata: FrameMetadata) -> Result<Self> {
        // Validates the shape once so `next_frame` cannot fail.
        let len = Frame::filled(metadata, 0)?.data().len();
        Ok(Self {
            metadata,
            len,
            tick: 0,
        })
    }

    /// Number of frames produced so far.
    pub fn frames_produced(&self) -> u64 {
        self.tick
    }
}

impl FrameSource for PatternSource {
    fn next_frame(&mut self) -> Option<Frame> {
        let width = self.metadata.width as usize;
        let channels = self.metadata.channels as usize;
        let offset = (self.tick % 256) as usize;

        let mut data = Vec::with_capacity(self.len);
        for i in 0..self.len {
            let pixel = i / channels;
            let (x, y) = (pixel % width, pixel / width);
            let c = i % channels;
            data.push(((x + y + offset * 4 + c * 85) % 256) as u8);
        }
        self.tick += 1;

        match Frame::new(self.metadata, data) {
            Ok(frame) => Some(frame),
            Err(err) => {
                warn!(error = %err, "pattern frame rejected");
                None
            }
        }
    }

    fn nominal_shape(&self) -> FrameMetadata {
        self.metadata
    }
}

/// Directory of headerless raw frames, read in file-name order.
///
/// Every file must hold exactly `width * height * channels` bytes; files
/// that cannot be read or have the wrong size are skipped with a warning.
#[derive(Debug)]
pub struct RawDirSource {
    dir: PathBuf,
    files: Vec<PathBuf>,
    metadata: FrameMetadata,
    looping: bool,
    next: usize,
}

impl RawDirSource {
    pub fn open(dir: &Path, metadata: FrameMetadata, looping: bool) -> Result<Self> {
        Frame::filled(metadata, 0)?;

        let entries = fs::read_dir(dir).map_err(|source| PipelineError::Read {
            path: dir.to_path_buf(),
            source,
        })?;
        let mut files = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|source| PipelineError::Read {
                path: dir.to_path_buf(),
                source,
            })?;
            let path = entry.path();
            if path.is_file() {
                files.push(path);
            }
        }
        files.sort();

        if files.is_empty() {
            return Err(PipelineError::EmptySource {
                dir: dir.to_path_buf(),
            });
        }
        info!(dir = %dir.display(), files = files.len(), looping, "opened raw frame directory");

        Ok(Self {
            dir: dir.to_path_buf(),
            files,
            metadata,
            looping,
            next: 0,
        })
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    fn load(&self, path: &Path) -> Option<Frame> {
        let data = match fs::read(path) {
            Ok(data) => data,
            Err(err) => {
                warn!(path = %path.display(), error = %err, "skipping unreadable frame file");
                return None;
            }
        };
        match Frame::new(self.metadata, data) {
            Ok(frame) => Some(frame),
            Err(err) => {
                warn!(path = %path.display(), error = %err, "skipping frame file");
                None
            }
        }
    }
}

impl FrameSource for RawDirSource {
    fn next_frame(&mut self) -> Option<Frame> {
        // At most one pass over the directory per call.
        for _ in 0..self.files.len() {
            if self.next >= self.files.len() {
                if !self.looping {
                    return None;
                }
                debug!(dir = %self.dir.display(), "restarting raw frame directory");
                self.next = 0;
            }
            let path = &self.files[self.next];
            self.next += 1;
            if let Some(frame) = self.load(path) {
                return Some(frame);
            }
        }
        None
    }

    fn nominal_shape(&self) -> FrameMetadata {
        self.metadata
    }

    fn is_exhausted(&self) -> bool {
        !self.looping && self.next >= self.files.len()
    }
}

#[cfg(test)]
mod tests {
    use std::time::{SystemTime, UNIX_EPOCH};

    use super::*;

    fn unique_temp_dir(tag: &str) -> PathBuf {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("time should be after epoch")
            .as_nanos();
        let dir = std::env::temp_dir().join(format!(
            "framebridge-{tag}-{}-{nanos}",
            std::process::id()
        ));
        fs::create_dir_all(&dir).expect("temp dir should be created");
        dir
    }

    fn settings(kind: SourceKind) -> DataSourceSettings {
        let mut settings = crate::config::AppConfig::default().data_source;
        settings.kind = kind;
        settings.width = 4;
        settings.height = 2;
        settings.channels = 3;
        settings
    }

    #[test]
    fn pattern_frames_match_shape_and_move() {
        let mut source = PatternSource::new(FrameMetadata::new(4, 2, 3)).unwrap();
        let first = source.next_frame().unwrap();
        let second = source.next_frame().unwrap();

        assert_eq!(first.shape(), (2, 4, 3));
        assert_eq!(first.data().len(), 24);
        assert_ne!(first.data(), second.data());
        assert_eq!(source.frames_produced(), 2);
        assert!(!source.is_exhausted());
    }

    #[test]
    fn pattern_rejects_zero_shape() {
        assert!(PatternSource::new(FrameMetadata::new(0, 2, 3)).is_err());
    }

    #[test]
    fn raw_dir_reads_sorted_and_loops() {
        let dir = unique_temp_dir("rawdir");
        fs::write(dir.join("b.raw"), [2u8; 6]).unwrap();
        fs::write(dir.join("a.raw"), [1u8; 6]).unwrap();

        let mut source = RawDirSource::open(&dir, FrameMetadata::new(2, 1, 3), true).unwrap();
        assert_eq!(source.len(), 2);
        let seen: Vec<u8> = (0..5)
            .map(|_| source.next_frame().unwrap().data()[0])
            .collect();
        assert_eq!(seen, vec![1, 2, 1, 2, 1]);
        assert!(!source.is_exhausted());

        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn raw_dir_skips_bad_files_and_stops_without_loop() {
        let dir = unique_temp_dir("rawdir-bad");
        fs::write(dir.join("0.raw"), [7u8; 6]).unwrap();
        fs::write(dir.join("1.raw"), [0u8; 5]).unwrap();
        fs::write(dir.join("2.raw"), [9u8; 6]).unwrap();

        let mut source = RawDirSource::open(&dir, FrameMetadata::new(2, 1, 3), false).unwrap();
        assert_eq!(source.next_frame().unwrap().data()[0], 7);
        assert_eq!(source.next_frame().unwrap().data()[0], 9);
        assert!(source.is_exhausted());
        assert!(source.next_frame().is_none());

        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn empty_dir_is_rejected() {
        let dir = unique_temp_dir("rawdir-empty");
        assert!(matches!(
            RawDirSource::open(&dir, FrameMetadata::new(2, 1, 3), true),
            Err(PipelineError::EmptySource { .. })
        ));
        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn open_source_dispatches_on_kind() {
        let source = open_source(&settings(SourceKind::Pattern)).unwrap();
        assert_eq!(source.nominal_shape(), FrameMetadata::new(4, 2, 3));

        for kind in [SourceKind::Video, SourceKind::Camera] {
            assert!(matches!(
                open_source(&settings(kind)),
                Err(PipelineError::UnsupportedSource { .. })
            ));
        }
    }
}
