//! # camstream-core
//!
//! Core of the camstream MJPEG camera.
//!
//! This crate provides:
//! - The frame source contract and the lease guard that returns frames
//! - `multipart/x-mixed-replace` part framing
//! - The per-connection stream session state machine
//! - The Wi-Fi link state machine (reconnect on every drop)
//! - Device configuration types
//!
//! This crate is intentionally runtime-agnostic and contains no async code,
//! making it usable on both Linux (tokio) and ESP32 (esp-idf) targets.

pub mod config;
pub mod frame;
pub mod link;
pub mod multipart;
pub mod session;

pub use config::{
    CameraPins, ConfigError, DeviceConfig, FrameBufferLocation, FrameSize, GrabMode, HttpConfig,
    SensorConfig, WifiConfig,
};
pub use frame::{CaptureError, Frame, FrameLease, FrameSource};
pub use link::{
    access_url, Associator, LinkError, LinkEvent, LinkEventHandler, LinkManager, LinkState,
    LinkStateHandle, LinkStatus,
};
pub use session::{ChunkSink, SessionError, SessionOutcome, SessionPhase, StreamSession};
