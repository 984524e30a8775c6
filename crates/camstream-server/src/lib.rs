//! # camstream-server
//!
//! MJPEG stream server for Linux hosts.
//!
//! Serves the same stream session as the ESP32 firmware, with axum as the
//! HTTP endpoint and an in-memory image rotation standing in for the camera.
//!
//! Enable features based on target platform:
//! - `tokio-runtime` (default) - HTTP server on tokio + axum

pub mod source;

#[cfg(feature = "tokio-runtime")]
pub mod server;
#[cfg(feature = "tokio-runtime")]
pub mod sink;

pub use camstream_core::{FrameSource, SessionOutcome, StreamSession};
pub use source::{MemoryFrameSource, PoolConfig, PooledFrame, SourceError};

#[cfg(feature = "tokio-runtime")]
pub use server::{ServerConfig, StreamServer};
#[cfg(feature = "tokio-runtime")]
pub use sink::{ChannelSink, ResponseHead, SinkError};
