//! camstream firmware for ESP32-CAM boards.
//!
//! Joins the configured WiFi network, starts the camera and serves an MJPEG
//! stream on `http://<device-ip>/stream`.
//!
//! WiFi credentials are compiled in from `CAMSTREAM_WIFI_SSID` and
//! `CAMSTREAM_WIFI_PASS` at build time.

use std::sync::Arc;

use camstream_core::{
    CameraPins, DeviceConfig, LinkStateHandle, LinkStatus, SensorConfig, WifiConfig,
};
use camstream_esp32::{camera::EspCamera, http, nvs, wifi};
use esp_idf_svc::eventloop::EspSystemEventLoop;
use esp_idf_svc::hal::{delay::FreeRtos, peripherals::Peripherals, reset};
use log::{error, info};

const WIFI_SSID: &str = env!("CAMSTREAM_WIFI_SSID");
const WIFI_PASS: &str = env!("CAMSTREAM_WIFI_PASS");

/// How often the main task checks the link for diagnostics.
const LINK_POLL_MS: u32 = 5_000;

fn main() -> anyhow::Result<()> {
    esp_idf_svc::sys::link_patches();
    esp_idf_svc::log::EspLogger::initialize_default();

    let config = DeviceConfig::new(
        WifiConfig::new(WIFI_SSID, WIFI_PASS),
        CameraPins::ai_thinker(),
        SensorConfig::default(),
    );
    config.validate()?;

    let peripherals = Peripherals::take()?;
    let sysloop = EspSystemEventLoop::take()?;
    let nvs = nvs::init()?;

    let link_state = LinkStateHandle::new();
    let link = wifi::start_wifi(
        &config.wifi,
        &config.http,
        peripherals.modem,
        sysloop,
        Some(nvs),
        link_state.clone(),
    )?;

    // Give association a head start before the camera claims PSRAM.
    FreeRtos::delay_ms(config.settle_delay_ms);

    let camera = match EspCamera::init(&config.pins, &config.sensor) {
        Ok(camera) => Arc::new(camera),
        Err(e) => {
            error!("Camera init failed ({}), restarting...", e);
            reset::restart();
        }
    };

    let _server = match http::start_stream_server(&config.http, camera) {
        Ok(server) => Some(server),
        Err(e) => {
            error!("Failed to start HTTP server: {:?}", e);
            None
        }
    };

    // Keep WiFi, subscriptions and the server alive; report link changes.
    let mut last = link_state.snapshot();
    loop {
        FreeRtos::delay_ms(LINK_POLL_MS);
        let current = link_state.snapshot();
        if current.status != last.status {
            info!(
                "Link {:?} -> {:?} (address {:?}, {} drops, {} attempts)",
                last.status,
                current.status,
                current.address,
                current.disconnects,
                current.association_attempts
            );
            if current.status == LinkStatus::Connected {
                if let Some(url) = link.stream_url() {
                    info!("Stream available at {}", url);
                }
            }
        }
        last = current;
    }
}
