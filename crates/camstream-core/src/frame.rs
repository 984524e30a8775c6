//! Frame source contract.
//!
//! A [`FrameSource`] owns a small pool of encoded JPEG buffers. Stream
//! sessions borrow one frame at a time through a [`FrameLease`], which hands
//! the frame back to its source when dropped.

use std::ops::Deref;

use bytes::Bytes;
use thiserror::Error;

/// Errors a frame source can report when asked for a frame.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CaptureError {
    /// The source has no frame to give.
    #[error("no frame available")]
    NoFrame,

    /// Waiting for a free buffer or a sensor readout took too long.
    #[error("timed out waiting for a frame")]
    Timeout,

    /// The camera driver reported a failure.
    #[error("camera driver error: {0}")]
    Driver(String),
}

/// One encoded JPEG image.
pub trait Frame {
    /// The encoded bytes.
    fn data(&self) -> &[u8];

    /// Exact number of encoded bytes.
    fn len(&self) -> usize {
        self.data().len()
    }

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Owned handle to the encoded bytes.
    ///
    /// Copies by default. Frames already backed by [`Bytes`] return a
    /// reference-counted clone instead.
    fn to_bytes(&self) -> Bytes {
        Bytes::copy_from_slice(self.data())
    }
}

impl Frame for Vec<u8> {
    fn data(&self) -> &[u8] {
        self
    }
}

/// Producer of encoded frames backed by a bounded buffer pool.
///
/// `acquire` may block while the sensor finishes a readout or while every
/// buffer is lent out. Every frame returned by `acquire` must be passed to
/// `release` exactly once; [`FrameSource::lease`] does that automatically.
pub trait FrameSource: Send + Sync {
    type Frame: Frame;

    /// Capture (or take from the pool) one frame.
    fn acquire(&self) -> Result<Self::Frame, CaptureError>;

    /// Return a previously acquired frame to the pool.
    fn release(&self, frame: Self::Frame);

    /// Acquire a frame wrapped in a guard that releases it on drop.
    fn lease(&self) -> Result<FrameLease<'_, Self>, CaptureError>
    where
        Self: Sized,
    {
        let frame = self.acquire()?;
        Ok(FrameLease {
            source: self,
            frame: Some(frame),
        })
    }
}

/// A frame borrowed from a [`FrameSource`].
///
/// Dereferences to the frame. Dropping the lease releases the frame, so the
/// release happens once on every path out of the scope holding it.
pub struct FrameLease<'s, S: FrameSource> {
    source: &'s S,
    frame: Option<S::Frame>,
}

impl<'s, S: FrameSource> FrameLease<'s, S> {
    /// The encoded bytes of the leased frame.
    pub fn bytes(&self) -> &[u8] {
        match &self.frame {
            Some(frame) => frame.data(),
            None => &[],
        }
    }
}

impl<'s, S: FrameSource> Frame for FrameLease<'s, S> {
    fn data(&self) -> &[u8] {
        self.bytes()
    }

    fn to_bytes(&self) -> Bytes {
        match &self.frame {
            Some(frame) => frame.to_bytes(),
            None => Bytes::new(),
        }
    }
}

impl<'s, S: FrameSource> Deref for FrameLease<'s, S> {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        self.bytes()
    }
}

impl<'s, S: FrameSource> Drop for FrameLease<'s, S> {
    fn drop(&mut self) {
        if let Some(frame) = self.frame.take() {
            self.source.release(frame);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingSource {
        acquired: AtomicUsize,
        released: AtomicUsize,
        fail: bool,
    }

    impl CountingSource {
        fn new(fail: bool) -> Self {
            Self {
                acquired: AtomicUsize::new(0),
                released: AtomicUsize::new(0),
                fail,
            }
        }
    }

    impl FrameSource for CountingSource {
        type Frame = Vec<u8>;

        fn acquire(&self) -> Result<Vec<u8>, CaptureError> {
            if self.fail {
                return Err(CaptureError::NoFrame);
            }
            self.acquired.fetch_add(1, Ordering::SeqCst);
            Ok(vec![0xFF, 0xD8, 0xFF, 0xD9])
        }

        fn release(&self, _frame: Vec<u8>) {
            self.released.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_lease_releases_on_drop() {
        let source = CountingSource::new(false);
        {
            let lease = source.lease().unwrap();
            assert_eq!(lease.len(), 4);
            assert_eq!(source.released.load(Ordering::SeqCst), 0);
        }
        assert_eq!(source.acquired.load(Ordering::SeqCst), 1);
        assert_eq!(source.released.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_failed_lease_releases_nothing() {
        let source = CountingSource::new(true);
        assert_eq!(source.lease().err(), Some(CaptureError::NoFrame));
        assert_eq!(source.released.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_frame_len_matches_data() {
        let frame = vec![1u8, 2, 3];
        assert_eq!(Frame::len(&frame), 3);
        assert!(!Frame::is_empty(&frame));
        assert!(Frame::is_empty(&Vec::<u8>::new()));
    }
}
