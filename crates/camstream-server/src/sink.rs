//! Chunk sink bridging a blocking stream session to an async response body.
//!
//! The session runs on a blocking thread. The response head (status and
//! content type) is handed over once through a oneshot channel when the
//! first chunk is written or a server error is reported; body chunks follow
//! through a bounded mpsc channel. When the client goes away the response
//! body, and with it the receiver, is dropped, and the next write fails.

use bytes::Bytes;
use camstream_core::{ChunkSink, Frame};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

/// Content type used if the session never set one.
const FALLBACK_CONTENT_TYPE: &str = "application/octet-stream";

/// Errors writing to a [`ChannelSink`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SinkError {
    /// The response was dropped, usually because the client disconnected.
    #[error("client disconnected")]
    ClientGone,

    /// The status line and headers were already sent.
    #[error("response headers already committed")]
    HeadersCommitted,
}

/// How the response should start.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResponseHead {
    /// 200 with a streaming body of this content type.
    Stream { content_type: String },
    /// 500 with an empty body.
    ServerError,
}

/// [`ChunkSink`] writing into tokio channels.
pub struct ChannelSink {
    content_type: Option<String>,
    head: Option<oneshot::Sender<ResponseHead>>,
    body: mpsc::Sender<Bytes>,
}

impl ChannelSink {
    /// Create a sink plus the receivers the response is built from.
    ///
    /// `depth` bounds how many body chunks may wait for the client.
    pub fn new(
        depth: usize,
    ) -> (
        Self,
        oneshot::Receiver<ResponseHead>,
        mpsc::Receiver<Bytes>,
    ) {
        let (head_tx, head_rx) = oneshot::channel();
        let (body_tx, body_rx) = mpsc::channel(depth.max(1));
        let sink = Self {
            content_type: None,
            head: Some(head_tx),
            body: body_tx,
        };
        (sink, head_rx, body_rx)
    }

    /// Whether the response head has been sent.
    pub fn is_committed(&self) -> bool {
        self.head.is_none()
    }

    fn commit(&mut self) -> Result<(), SinkError> {
        if let Some(head) = self.head.take() {
            let content_type = self
                .content_type
                .take()
                .unwrap_or_else(|| FALLBACK_CONTENT_TYPE.to_string());
            head.send(ResponseHead::Stream { content_type })
                .map_err(|_| SinkError::ClientGone)?;
        }
        Ok(())
    }
}

impl ChunkSink for ChannelSink {
    type Error = SinkError;

    fn set_content_type(&mut self, content_type: &str) -> Result<(), SinkError> {
        if self.is_committed() {
            return Err(SinkError::HeadersCommitted);
        }
        self.content_type = Some(content_type.to_string());
        Ok(())
    }

    fn send_chunk(&mut self, chunk: &[u8]) -> Result<(), SinkError> {
        self.commit()?;
        self.body
            .blocking_send(Bytes::copy_from_slice(chunk))
            .map_err(|_| SinkError::ClientGone)
    }

    fn send_frame<F: Frame + ?Sized>(&mut self, frame: &F) -> Result<(), SinkError> {
        self.commit()?;
        self.body
            .blocking_send(frame.to_bytes())
            .map_err(|_| SinkError::ClientGone)
    }

    fn send_server_error(&mut self) -> Result<(), SinkError> {
        match self.head.take() {
            Some(head) => head
                .send(ResponseHead::ServerError)
                .map_err(|_| SinkError::ClientGone),
            None => Err(SinkError::HeadersCommitted),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::{MemoryFrameSource, PoolConfig};
    use camstream_core::FrameSource;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_head_sent_with_first_chunk() {
        let (mut sink, mut head, mut body) = ChannelSink::new(4);

        sink.set_content_type("multipart/x-mixed-replace; boundary=frame")
            .unwrap();
        assert!(head.try_recv().is_err());

        sink.send_chunk(b"--frame\r\n").unwrap();
        assert_eq!(
            head.try_recv().unwrap(),
            ResponseHead::Stream {
                content_type: "multipart/x-mixed-replace; boundary=frame".to_string()
            }
        );
        assert_eq!(body.try_recv().unwrap(), Bytes::from_static(b"--frame\r\n"));
    }

    #[test]
    fn test_content_type_locked_after_commit() {
        let (mut sink, _head, _body) = ChannelSink::new(4);
        sink.set_content_type("image/jpeg").unwrap();
        sink.send_chunk(b"x").unwrap();

        assert_eq!(
            sink.set_content_type("text/plain"),
            Err(SinkError::HeadersCommitted)
        );
    }

    #[test]
    fn test_server_error_before_commit() {
        let (mut sink, mut head, _body) = ChannelSink::new(4);
        sink.set_content_type("image/jpeg").unwrap();

        sink.send_server_error().unwrap();
        assert_eq!(head.try_recv().unwrap(), ResponseHead::ServerError);
        assert!(sink.is_committed());
    }

    #[test]
    fn test_server_error_after_commit_is_refused() {
        let (mut sink, _head, _body) = ChannelSink::new(4);
        sink.send_chunk(b"x").unwrap();

        assert_eq!(sink.send_server_error(), Err(SinkError::HeadersCommitted));
    }

    #[test]
    fn test_dropped_body_reports_client_gone() {
        let (mut sink, _head, body) = ChannelSink::new(4);
        sink.send_chunk(b"first").unwrap();

        drop(body);
        assert_eq!(sink.send_chunk(b"second"), Err(SinkError::ClientGone));
    }

    #[test]
    fn test_frame_payload_shares_source_buffer() {
        let jpeg = Bytes::from(vec![0xFF, 0xD8, 0x01, 0x02, 0xFF, 0xD9]);
        let source = MemoryFrameSource::new(vec![jpeg.clone()], PoolConfig::default());
        let (mut sink, _head, mut body) = ChannelSink::new(4);

        let frame = source.acquire().unwrap();
        sink.send_frame(&frame).unwrap();
        source.release(frame);

        let sent = body.try_recv().unwrap();
        assert_eq!(sent, jpeg);
        assert_eq!(sent.as_ptr(), jpeg.as_ptr());
    }

    #[test]
    fn test_dropped_head_reports_client_gone() {
        let (mut sink, head, _body) = ChannelSink::new(4);
        drop(head);

        assert_eq!(sink.send_chunk(b"x"), Err(SinkError::ClientGone));
    }
}
