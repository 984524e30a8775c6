//! In-memory frame source with a bounded buffer pool.
//!
//! Plays the part of the camera driver on a host: it cycles over a fixed set
//! of JPEG images and lends at most `pool_size` of them out at a time, the
//! way the sensor driver lends its `fb_count` DMA buffers.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Condvar, Mutex, PoisonError};
use std::time::Duration;

use bytes::Bytes;
use camstream_core::{CaptureError, Frame, FrameSource};
use thiserror::Error;
use tracing::{debug, warn};

/// JPEG start-of-image marker.
const JPEG_SOI: [u8; 2] = [0xFF, 0xD8];

/// Errors loading frames from disk.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("failed to read frames from {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("no JPEG frames found in {0}")]
    Empty(PathBuf),
}

/// Pool behaviour of a [`MemoryFrameSource`].
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Frames that may be out at the same time.
    pub pool_size: usize,
    /// How long `acquire` waits for a free slot before failing.
    pub acquire_timeout: Duration,
    /// Simulated sensor readout time per frame.
    pub frame_interval: Option<Duration>,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            pool_size: 2,
            acquire_timeout: Duration::from_secs(4),
            frame_interval: Some(Duration::from_millis(40)),
        }
    }
}

/// A frame lent out by a [`MemoryFrameSource`].
#[derive(Debug)]
pub struct PooledFrame {
    data: Bytes,
    sequence: u64,
}

impl PooledFrame {
    pub fn sequence(&self) -> u64 {
        self.sequence
    }
}

impl Frame for PooledFrame {
    fn data(&self) -> &[u8] {
        &self.data
    }

    fn to_bytes(&self) -> Bytes {
        self.data.clone()
    }
}

/// Frame source cycling over in-memory JPEG images.
pub struct MemoryFrameSource {
    frames: Vec<Bytes>,
    config: PoolConfig,
    next: AtomicU64,
    outstanding: Mutex<usize>,
    slot_freed: Condvar,
}

impl MemoryFrameSource {
    pub fn new(frames: Vec<Bytes>, config: PoolConfig) -> Self {
        Self {
            frames,
            config,
            next: AtomicU64::new(0),
            outstanding: Mutex::new(0),
            slot_freed: Condvar::new(),
        }
    }

    /// Load every `*.jpg` / `*.jpeg` file in `dir`, in file name order.
    ///
    /// Files that do not start with a JPEG start-of-image marker are skipped.
    pub fn from_dir(dir: &Path, config: PoolConfig) -> Result<Self, SourceError> {
        let io_err = |source| SourceError::Io {
            path: dir.to_path_buf(),
            source,
        };

        let mut paths: Vec<PathBuf> = std::fs::read_dir(dir)
            .map_err(io_err)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| is_jpeg_path(path))
            .collect();
        paths.sort();

        let mut frames = Vec::with_capacity(paths.len());
        for path in paths {
            let data = std::fs::read(&path).map_err(|source| SourceError::Io {
                path: path.clone(),
                source,
            })?;
            if !data.starts_with(&JPEG_SOI) {
                warn!("Skipping {}: not a JPEG image", path.display());
                continue;
            }
            debug!("Loaded frame {} ({} bytes)", path.display(), data.len());
            frames.push(Bytes::from(data));
        }

        if frames.is_empty() {
            return Err(SourceError::Empty(dir.to_path_buf()));
        }
        Ok(Self::new(frames, config))
    }

    /// Number of distinct images in the rotation.
    pub fn frame_count(&self) -> usize {
        self.frames.len()
    }

    /// Frames currently lent out.
    pub fn outstanding(&self) -> usize {
        *self
            .outstanding
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Frames handed out since start.
    pub fn frames_served(&self) -> u64 {
        self.next.load(Ordering::SeqCst)
    }
}

fn is_jpeg_path(path: &Path) -> bool {
    path.is_file()
        && path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.eq_ignore_ascii_case("jpg") || ext.eq_ignore_ascii_case("jpeg"))
            .unwrap_or(false)
}

impl FrameSource for MemoryFrameSource {
    type Frame = PooledFrame;

    fn acquire(&self) -> Result<PooledFrame, CaptureError> {
        if self.frames.is_empty() {
            return Err(CaptureError::NoFrame);
        }

        let outstanding = self
            .outstanding
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let (mut outstanding, _) = self
            .slot_freed
            .wait_timeout_while(outstanding, self.config.acquire_timeout, |n| {
                *n >= self.config.pool_size
            })
            .unwrap_or_else(PoisonError::into_inner);
        if *outstanding >= self.config.pool_size {
            return Err(CaptureError::Timeout);
        }
        *outstanding += 1;
        drop(outstanding);

        if let Some(interval) = self.config.frame_interval {
            std::thread::sleep(interval);
        }

        let sequence = self.next.fetch_add(1, Ordering::SeqCst);
        let index = (sequence % self.frames.len() as u64) as usize;
        Ok(PooledFrame {
            data: self.frames[index].clone(),
            sequence,
        })
    }

    fn release(&self, frame: PooledFrame) {
        drop(frame);
        let mut outstanding = self
            .outstanding
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        *outstanding = outstanding.saturating_sub(1);
        self.slot_freed.notify_one();
    }
}
