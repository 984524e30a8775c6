//! Per-connection MJPEG stream session.
//!
//! A [`StreamSession`] declares the multipart content type once, then keeps
//! pulling frames from a [`FrameSource`] and writing each one as a multipart
//! part to a [`ChunkSink`] until a write fails (usually the client went away)
//! or the source cannot produce a frame.
//!
//! ```text
//! Created -> HeaderSent -> AwaitFrame -> FrameSent -> AwaitFrame -> ... -> Terminated
//! ```

use std::fmt;

use log::{debug, error, trace};
use thiserror::Error;

use crate::frame::{CaptureError, Frame, FrameSource};
use crate::multipart::{part_header, PART_TERMINATOR, STREAM_CONTENT_TYPE};

/// Transport side of an HTTP response that is written in chunks.
///
/// Mirrors the shape of embedded HTTP servers: the content type is recorded
/// first, and the status line plus headers go out with the first chunk.
pub trait ChunkSink {
    type Error: fmt::Display;

    /// Set the response content type. Must precede any body bytes.
    fn set_content_type(&mut self, content_type: &str) -> Result<(), Self::Error>;

    /// Write one chunk of the response body.
    fn send_chunk(&mut self, chunk: &[u8]) -> Result<(), Self::Error>;

    /// Write a frame's encoded bytes as one body chunk.
    ///
    /// Sinks that queue owned buffers can take [`Frame::to_bytes`] instead
    /// of copying the slice.
    fn send_frame<F: Frame + ?Sized>(&mut self, frame: &F) -> Result<(), Self::Error> {
        self.send_chunk(frame.data())
    }

    /// Report a server-side failure. Sends a 500 status if nothing has been
    /// committed yet; otherwise the body just ends.
    fn send_server_error(&mut self) -> Result<(), Self::Error>;
}

impl<K: ChunkSink + ?Sized> ChunkSink for &mut K {
    type Error = K::Error;

    fn set_content_type(&mut self, content_type: &str) -> Result<(), Self::Error> {
        (**self).set_content_type(content_type)
    }

    fn send_chunk(&mut self, chunk: &[u8]) -> Result<(), Self::Error> {
        (**self).send_chunk(chunk)
    }

    fn send_frame<F: Frame + ?Sized>(&mut self, frame: &F) -> Result<(), Self::Error> {
        (**self).send_frame(frame)
    }

    fn send_server_error(&mut self) -> Result<(), Self::Error> {
        (**self).send_server_error()
    }
}

/// Where a session is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    /// Handler invoked, nothing sent yet.
    Created,
    /// Multipart content type declared.
    HeaderSent,
    /// Waiting on the frame source.
    AwaitFrame,
    /// Last frame fully written.
    FrameSent,
    /// Session is over; no more frames will be attempted.
    Terminated,
}

/// Why a session ended.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    /// A write to the client failed. The normal way for a stream to end.
    #[error("transport write failed: {0}")]
    Transport(String),

    /// The frame source could not produce a frame.
    #[error("frame capture failed: {0}")]
    Capture(#[from] CaptureError),
}

/// Result of running a session to completion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionOutcome {
    pub error: SessionError,
    /// Number of frames written completely.
    pub frames_sent: u64,
}

impl SessionOutcome {
    pub fn is_capture_failure(&self) -> bool {
        matches!(self.error, SessionError::Capture(_))
    }
}

enum Step {
    Continue,
    Stop(SessionError),
}

/// One client's MJPEG stream.
pub struct StreamSession<'s, S: FrameSource, K: ChunkSink> {
    source: &'s S,
    sink: K,
    phase: SessionPhase,
    frames_sent: u64,
    last_error: Option<SessionError>,
}

impl<'s, S: FrameSource, K: ChunkSink> StreamSession<'s, S, K> {
    pub fn new(source: &'s S, sink: K) -> Self {
        Self {
            source,
            sink,
            phase: SessionPhase::Created,
            frames_sent: 0,
            last_error: None,
        }
    }

    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    pub fn frames_sent(&self) -> u64 {
        self.frames_sent
    }

    pub fn last_error(&self) -> Option<&SessionError> {
        self.last_error.as_ref()
    }

    /// Stream frames until the transport or the frame source fails.
    pub fn run(mut self) -> SessionOutcome {
        let mut step = self.begin();
        let error = loop {
            match step {
                Step::Continue => step = self.send_next_frame(),
                Step::Stop(error) => break error,
            }
        };

        debug!(
            "Stream session ended after {} frames: {}",
            self.frames_sent, error
        );

        SessionOutcome {
            error,
            frames_sent: self.frames_sent,
        }
    }

    fn begin(&mut self) -> Step {
        match self.sink.set_content_type(STREAM_CONTENT_TYPE) {
            Ok(()) => {
                self.phase = SessionPhase::HeaderSent;
                Step::Continue
            }
            Err(e) => self.terminate(SessionError::Transport(e.to_string())),
        }
    }

    fn send_next_frame(&mut self) -> Step {
        self.phase = SessionPhase::AwaitFrame;

        let source = self.source;
        let frame = match source.lease() {
            Ok(frame) => frame,
            Err(e) => return self.capture_failed(e),
        };

        let sent = self.send_part(&frame);
        drop(frame);

        match sent {
            Ok(()) => {
                self.frames_sent += 1;
                self.phase = SessionPhase::FrameSent;
                Step::Continue
            }
            Err(e) => {
                trace!("Client write failed: {}", e);
                self.terminate(SessionError::Transport(e.to_string()))
            }
        }
    }

    fn send_part<F: Frame>(&mut self, frame: &F) -> Result<(), K::Error> {
        self.sink.send_chunk(part_header(frame.len()).as_bytes())?;
        self.sink.send_frame(frame)?;
        self.sink.send_chunk(PART_TERMINATOR)
    }

    fn capture_failed(&mut self, e: CaptureError) -> Step {
        error!("Frame capture failed: {}", e);
        if let Err(send_err) = self.sink.send_server_error() {
            debug!("Could not report capture failure to client: {}", send_err);
        }
        self.terminate(SessionError::Capture(e))
    }

    fn terminate(&mut self, error: SessionError) -> Step {
        self.phase = SessionPhase::Terminated;
        self.last_error = Some(error.clone());
        Step::Stop(error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Scripted frame source that counts acquisitions and releases.
    struct ScriptedSource {
        frames: Mutex<VecDeque<Result<Vec<u8>, CaptureError>>>,
        acquired: Mutex<usize>,
        released: Mutex<Vec<usize>>,
    }

    impl ScriptedSource {
        fn sizes(sizes: &[usize]) -> Self {
            let frames = sizes
                .iter()
                .enumerate()
                .map(|(i, &n)| Ok(vec![i as u8; n]))
                .collect();
            Self::from_script(frames)
        }

        fn from_script(frames: VecDeque<Result<Vec<u8>, CaptureError>>) -> Self {
            Self {
                frames: Mutex::new(frames),
                acquired: Mutex::new(0),
                released: Mutex::new(Vec::new()),
            }
        }

        fn acquired(&self) -> usize {
            *self.acquired.lock().unwrap()
        }

        fn released(&self) -> Vec<usize> {
            self.released.lock().unwrap().clone()
        }
    }

    impl FrameSource for ScriptedSource {
        type Frame = Vec<u8>;

        fn acquire(&self) -> Result<Vec<u8>, CaptureError> {
            let next = self
                .frames
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(Err(CaptureError::NoFrame));
            if next.is_ok() {
                *self.acquired.lock().unwrap() += 1;
            }
            next
        }

        fn release(&self, frame: Vec<u8>) {
            self.released.lock().unwrap().push(frame.len());
        }
    }

    #[derive(Debug, Clone, PartialEq, Eq)]
    enum SinkEvent {
        ContentType(String),
        Chunk(Vec<u8>),
        ServerError,
    }

    /// Records everything written; fails the n-th `send_chunk` call if asked.
    #[derive(Default)]
    struct RecordingSink {
        events: Vec<SinkEvent>,
        chunk_calls: usize,
        fail_on_chunk: Option<usize>,
        refuse_content_type: bool,
    }

    impl RecordingSink {
        fn failing_on_chunk(n: usize) -> Self {
            Self {
                fail_on_chunk: Some(n),
                ..Default::default()
            }
        }

        fn body(&self) -> Vec<u8> {
            self.events
                .iter()
                .filter_map(|e| match e {
                    SinkEvent::Chunk(c) => Some(c.clone()),
                    _ => None,
                })
                .flatten()
                .collect()
        }
    }

    impl ChunkSink for RecordingSink {
        type Error = String;

        fn set_content_type(&mut self, content_type: &str) -> Result<(), String> {
            if self.refuse_content_type {
                return Err("connection reset".to_string());
            }
            self.events
                .push(SinkEvent::ContentType(content_type.to_string()));
            Ok(())
        }

        fn send_chunk(&mut self, chunk: &[u8]) -> Result<(), String> {
            self.chunk_calls += 1;
            if self.fail_on_chunk == Some(self.chunk_calls) {
                return Err("broken pipe".to_string());
            }
            self.events.push(SinkEvent::Chunk(chunk.to_vec()));
            Ok(())
        }

        fn send_server_error(&mut self) -> Result<(), String> {
            self.events.push(SinkEvent::ServerError);
            Ok(())
        }
    }

    /// Split a recorded body into (declared length, payload) pairs.
    fn parse_parts(mut body: &[u8]) -> Vec<(usize, Vec<u8>)> {
        let mut parts = Vec::new();
        while !body.is_empty() {
            let header_end = body
                .windows(4)
                .position(|w| w == b"\r\n\r\n")
                .expect("part header terminator")
                + 4;
            let header = std::str::from_utf8(&body[..header_end]).unwrap();
            assert!(header.starts_with("--frame\r\nContent-Type: image/jpeg\r\n"));
            let declared: usize = header
                .lines()
                .find_map(|l| l.strip_prefix("Content-Length: "))
                .unwrap()
                .trim()
                .parse()
                .unwrap();
            let payload = body[header_end..header_end + declared].to_vec();
            assert_eq!(&body[header_end + declared..header_end + declared + 2], b"\r\n");
            parts.push((declared, payload));
            body = &body[header_end + declared + 2..];
        }
        parts
    }

    #[test]
    fn test_streams_frames_with_exact_lengths() {
        let source = ScriptedSource::sizes(&[120, 340, 5]);
        let mut sink = RecordingSink::default();

        let outcome = StreamSession::new(&source, &mut sink).run();

        assert_eq!(outcome.frames_sent, 3);
        assert!(outcome.is_capture_failure());

        let parts = parse_parts(&sink.body());
        let declared: Vec<usize> = parts.iter().map(|(n, _)| *n).collect();
        assert_eq!(declared, vec![120, 340, 5]);
        for (i, (n, payload)) in parts.iter().enumerate() {
            assert_eq!(payload.len(), *n);
            assert!(payload.iter().all(|&b| b == i as u8));
        }
    }

    #[test]
    fn test_content_type_set_once_before_body() {
        let source = ScriptedSource::sizes(&[10, 20]);
        let mut sink = RecordingSink::default();

        StreamSession::new(&source, &mut sink).run();

        assert_eq!(
            sink.events[0],
            SinkEvent::ContentType(STREAM_CONTENT_TYPE.to_string())
        );
        let content_type_count = sink
            .events
            .iter()
            .filter(|e| matches!(e, SinkEvent::ContentType(_)))
            .count();
        assert_eq!(content_type_count, 1);
    }

    #[test]
    fn test_every_acquired_frame_released_once() {
        let source = ScriptedSource::sizes(&[7, 8, 9, 10]);
        let mut sink = RecordingSink::default();

        StreamSession::new(&source, &mut sink).run();

        assert_eq!(source.acquired(), 4);
        assert_eq!(source.released(), vec![7, 8, 9, 10]);
    }

    #[test]
    fn test_header_write_failure_stops_and_releases() {
        let source = ScriptedSource::sizes(&[50, 60]);
        let mut sink = RecordingSink::failing_on_chunk(1);

        let outcome = StreamSession::new(&source, &mut sink).run();

        assert_eq!(outcome.error, SessionError::Transport("broken pipe".to_string()));
        assert_eq!(outcome.frames_sent, 0);
        assert_eq!(sink.chunk_calls, 1);
        assert_eq!(source.acquired(), 1);
        assert_eq!(source.released(), vec![50]);
        assert!(!sink.events.contains(&SinkEvent::ServerError));
    }

    #[test]
    fn test_payload_write_failure_stops_and_releases() {
        let source = ScriptedSource::sizes(&[50, 60]);
        let mut sink = RecordingSink::failing_on_chunk(2);

        let outcome = StreamSession::new(&source, &mut sink).run();

        assert!(!outcome.is_capture_failure());
        assert_eq!(sink.chunk_calls, 2);
        assert_eq!(source.acquired(), 1);
        assert_eq!(source.released(), vec![50]);
    }

    #[test]
    fn test_terminator_write_failure_stops_and_releases() {
        let source = ScriptedSource::sizes(&[50, 60]);
        let mut sink = RecordingSink::failing_on_chunk(3);

        let outcome = StreamSession::new(&source, &mut sink).run();

        assert_eq!(outcome.frames_sent, 0);
        assert_eq!(sink.chunk_calls, 3);
        assert_eq!(source.acquired(), 1);
        assert_eq!(source.released(), vec![50]);
    }

    #[test]
    fn test_failure_on_second_frame_keeps_first() {
        let source = ScriptedSource::sizes(&[11, 22, 33]);
        let mut sink = RecordingSink::failing_on_chunk(5);

        let outcome = StreamSession::new(&source, &mut sink).run();

        assert_eq!(outcome.frames_sent, 1);
        assert_eq!(source.acquired(), 2);
        assert_eq!(source.released(), vec![11, 22]);
    }

    #[test]
    fn test_capture_failure_reports_server_error() {
        let script = VecDeque::from(vec![Err(CaptureError::Driver("fb_get".to_string()))]);
        let source = ScriptedSource::from_script(script);
        let mut sink = RecordingSink::default();

        let outcome = StreamSession::new(&source, &mut sink).run();

        assert_eq!(
            outcome.error,
            SessionError::Capture(CaptureError::Driver("fb_get".to_string()))
        );
        assert_eq!(outcome.frames_sent, 0);
        assert_eq!(source.acquired(), 0);
        assert!(source.released().is_empty());
        assert_eq!(
            sink.events,
            vec![
                SinkEvent::ContentType(STREAM_CONTENT_TYPE.to_string()),
                SinkEvent::ServerError,
            ]
        );
    }

    #[test]
    fn test_capture_failure_mid_stream_issues_no_more_acquisitions() {
        let script = VecDeque::from(vec![
            Ok(vec![1; 4]),
            Err(CaptureError::Timeout),
            Ok(vec![2; 4]),
        ]);
        let source = ScriptedSource::from_script(script);
        let mut sink = RecordingSink::default();

        let outcome = StreamSession::new(&source, &mut sink).run();

        assert!(outcome.is_capture_failure());
        assert_eq!(outcome.frames_sent, 1);
        assert_eq!(source.acquired(), 1);
        assert_eq!(source.frames.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_refused_content_type_never_acquires() {
        let source = ScriptedSource::sizes(&[10]);
        let mut sink = RecordingSink {
            refuse_content_type: true,
            ..Default::default()
        };

        let outcome = StreamSession::new(&source, &mut sink).run();

        assert_eq!(
            outcome.error,
            SessionError::Transport("connection reset".to_string())
        );
        assert_eq!(source.acquired(), 0);
        assert!(sink.events.is_empty());
    }

    #[test]
    fn test_phase_transitions() {
        let source = ScriptedSource::sizes(&[3]);
        let mut sink = RecordingSink::default();
        let mut session = StreamSession::new(&source, &mut sink);

        assert_eq!(session.phase(), SessionPhase::Created);
        assert!(matches!(session.begin(), Step::Continue));
        assert_eq!(session.phase(), SessionPhase::HeaderSent);
        assert!(matches!(session.send_next_frame(), Step::Continue));
        assert_eq!(session.phase(), SessionPhase::FrameSent);
        assert_eq!(session.frames_sent(), 1);
        assert!(matches!(session.send_next_frame(), Step::Stop(_)));
        assert_eq!(session.phase(), SessionPhase::Terminated);
        assert_eq!(
            session.last_error(),
            Some(&SessionError::Capture(CaptureError::NoFrame))
        );
    }
}
