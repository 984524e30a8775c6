//! WiFi station link for ESP32.
//!
//! Bridges ESP-IDF WiFi and IP events into the runtime-agnostic
//! [`LinkManager`], which keeps the station associated.

use std::sync::Arc;

use anyhow::{anyhow, Result};
use camstream_core::{
    Associator, HttpConfig, LinkError, LinkEvent, LinkEventHandler, LinkManager, LinkStateHandle,
    WifiConfig,
};
use esp_idf_svc::{
    eventloop::{EspSubscription, EspSystemEventLoop, System},
    hal::{modem::Modem, peripheral},
    netif::IpEvent,
    nvs::EspDefaultNvsPartition,
    sys::{esp, esp_wifi_connect},
    wifi::{AuthMethod, ClientConfiguration, Configuration, EspWifi, WifiEvent},
};
use log::info;

/// Requests association through the ESP-IDF WiFi driver.
pub struct EspAssociator;

impl Associator for EspAssociator {
    fn associate(&self) -> Result<(), LinkError> {
        esp!(unsafe { esp_wifi_connect() }).map_err(|e| LinkError::Associate(e.to_string()))
    }
}

/// A running WiFi station.
///
/// Must be kept alive: dropping it stops the driver and the event
/// subscriptions that drive reconnection.
pub struct WifiLink {
    _wifi: Box<EspWifi<'static>>,
    _wifi_events: EspSubscription<'static, System>,
    _ip_events: EspSubscription<'static, System>,
    manager: Arc<LinkManager<EspAssociator>>,
}

impl WifiLink {
    /// Shared link state for diagnostics.
    pub fn state(&self) -> &LinkStateHandle {
        self.manager.state()
    }

    /// Viewing URL, once an address has been assigned.
    pub fn stream_url(&self) -> Option<String> {
        self.manager.stream_url()
    }
}

/// Bring up the WiFi station and start associating.
///
/// Association proceeds in the background: the station-started event
/// triggers the first attempt, every disconnect triggers another, and the
/// access URL for `http` is logged once DHCP assigns an address.
///
/// Any error here is a startup failure and should abort the firmware.
pub fn start_wifi(
    config: &WifiConfig,
    http: &HttpConfig,
    modem: impl peripheral::Peripheral<P = Modem> + 'static,
    sysloop: EspSystemEventLoop,
    nvs: Option<EspDefaultNvsPartition>,
    state: LinkStateHandle,
) -> Result<WifiLink> {
    config.validate()?;

    let auth_method = if config.is_open() {
        info!("WiFi password is empty, using open network");
        AuthMethod::None
    } else {
        AuthMethod::WPA2Personal
    };

    let mut wifi = EspWifi::new(modem, sysloop.clone(), nvs)?;
    wifi.set_configuration(&Configuration::Client(ClientConfiguration {
        ssid: config
            .ssid
            .as_str()
            .try_into()
            .map_err(|_| anyhow!("SSID too long (max 32 chars)"))?,
        password: config
            .password
            .as_str()
            .try_into()
            .map_err(|_| anyhow!("Password too long (max 64 chars)"))?,
        auth_method,
        ..Default::default()
    }))?;

    let manager = Arc::new(LinkManager::new(EspAssociator, state).with_http(http.clone()));

    let handler = Arc::clone(&manager);
    let wifi_events = sysloop.subscribe::<WifiEvent, _>(move |event| match event {
        WifiEvent::StaStarted => handler.dispatch(LinkEvent::StationStarted),
        WifiEvent::StaDisconnected(disconnected) => handler.dispatch(LinkEvent::Disconnected {
            reason: Some(disconnected.reason().into()),
        }),
        _ => {}
    })?;

    let handler = Arc::clone(&manager);
    let ip_events = sysloop.subscribe::<IpEvent, _>(move |event| {
        if let IpEvent::DhcpIpAssigned(assignment) = event {
            handler.dispatch(LinkEvent::AddressAcquired(assignment.ip()));
        }
    })?;

    info!("Starting WiFi station for '{}'...", config.ssid);
    wifi.start()?;
    info!("WiFi station initialized");

    Ok(WifiLink {
        _wifi: Box::new(wifi),
        _wifi_events: wifi_events,
        _ip_events: ip_events,
        manager,
    })
}
