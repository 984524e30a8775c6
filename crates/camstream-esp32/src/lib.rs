//! ESP32-specific components for camstream.
//!
//! This crate provides the platform side of the MJPEG camera:
//! - WiFi station link wired to the reconnecting link state machine
//! - esp32-camera frame source
//! - HTTP stream route on the ESP-IDF HTTP server
//! - NVS bring-up
//!
//! # Example
//!
//! ```ignore
//! use camstream_esp32::{camera::EspCamera, http, nvs, wifi};
//!
//! let nvs = nvs::init()?;
//! let link = wifi::start_wifi(&config.wifi, &config.http, modem, sysloop, Some(nvs), LinkStateHandle::new())?;
//! let camera = Arc::new(EspCamera::init(&config.pins, &config.sensor)?);
//! let server = http::start_stream_server(&config.http, camera)?;
//! ```

pub mod camera;
pub mod http;
pub mod nvs;
pub mod wifi;
