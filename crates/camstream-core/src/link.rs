//! Wi-Fi link state machine.
//!
//! The network stack reports link events asynchronously. [`LinkManager`]
//! reacts to them: it starts association when the station comes up,
//! re-associates immediately on every disconnect (no backoff, no retry
//! limit; the device has nothing to do without a network), and records the
//! address once DHCP assigns one.
//!
//! The current [`LinkState`] lives behind a [`LinkStateHandle`] that the
//! manager owns and diagnostics can clone.

use std::net::Ipv4Addr;
use std::sync::{Arc, Mutex, PoisonError};

use log::{error, info, warn};
use thiserror::Error;

use crate::config::{HttpConfig, DEFAULT_HTTP_PORT};

/// Errors raised when asking the network stack to associate.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LinkError {
    #[error("association request failed: {0}")]
    Associate(String),
}

/// Association status of the station interface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LinkStatus {
    /// Not associated.
    #[default]
    Disconnected,
    /// Association requested, waiting for the stack.
    Connecting,
    /// Associated with an address assigned.
    Connected,
}

/// Snapshot of the link.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct LinkState {
    pub status: LinkStatus,
    /// Most recently assigned address. Kept across drops for diagnostics.
    pub address: Option<Ipv4Addr>,
    /// Association requests issued since start.
    pub association_attempts: u64,
    /// Disconnect events observed since start.
    pub disconnects: u64,
}

/// Shared handle to the process-wide link state.
#[derive(Debug, Clone, Default)]
pub struct LinkStateHandle {
    inner: Arc<Mutex<LinkState>>,
}

impl LinkStateHandle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of the current state.
    pub fn snapshot(&self) -> LinkState {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn status(&self) -> LinkStatus {
        self.snapshot().status
    }

    pub fn address(&self) -> Option<Ipv4Addr> {
        self.snapshot().address
    }

    fn update<R>(&self, f: impl FnOnce(&mut LinkState) -> R) -> R {
        let mut state = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut state)
    }
}

/// Events reported by the network stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkEvent {
    /// The station interface is up and may associate.
    StationStarted,
    /// Association lost (or never established).
    Disconnected { reason: Option<u16> },
    /// DHCP assigned an address.
    AddressAcquired(Ipv4Addr),
}

/// Something that can ask the network stack to associate with the
/// configured access point.
pub trait Associator: Send + Sync {
    /// Request association. Completion is reported later as a [`LinkEvent`].
    fn associate(&self) -> Result<(), LinkError>;
}

/// Receiver of link events.
///
/// Invoked from the network stack's own execution context, serialized
/// relative to itself.
pub trait LinkEventHandler: Send + Sync {
    fn on_station_started(&self);

    fn on_link_down(&self, reason: Option<u16>);

    fn on_address_acquired(&self, address: Ipv4Addr);

    /// Route an event to the matching callback.
    fn dispatch(&self, event: LinkEvent) {
        match event {
            LinkEvent::StationStarted => self.on_station_started(),
            LinkEvent::Disconnected { reason } => self.on_link_down(reason),
            LinkEvent::AddressAcquired(address) => self.on_address_acquired(address),
        }
    }
}

/// URL a browser can open to watch the stream served with `http`.
///
/// The port is left out when it is the HTTP default.
pub fn access_url(address: Ipv4Addr, http: &HttpConfig) -> String {
    if http.port == DEFAULT_HTTP_PORT {
        format!("http://{}{}", address, http.stream_route)
    } else {
        format!("http://{}:{}{}", address, http.port, http.stream_route)
    }
}

/// Keeps the station associated.
pub struct LinkManager<A: Associator> {
    associator: A,
    state: LinkStateHandle,
    http: HttpConfig,
}

impl<A: Associator> LinkManager<A> {
    /// Manager advertising the default stream endpoint.
    pub fn new(associator: A, state: LinkStateHandle) -> Self {
        Self {
            associator,
            state,
            http: HttpConfig::default(),
        }
    }

    /// Advertise the endpoint the HTTP server was actually started with.
    pub fn with_http(mut self, http: HttpConfig) -> Self {
        self.http = http;
        self
    }

    /// Handle for diagnostics.
    pub fn state(&self) -> &LinkStateHandle {
        &self.state
    }

    /// Viewing URL for the current address, once one has been assigned.
    pub fn stream_url(&self) -> Option<String> {
        self.state
            .address()
            .map(|address| access_url(address, &self.http))
    }

    pub fn associator(&self) -> &A {
        &self.associator
    }

    fn request_association(&self) {
        self.state.update(|s| {
            s.status = LinkStatus::Connecting;
            s.association_attempts += 1;
        });

        // The stack reports a failed attempt as another disconnect event,
        // which retries again.
        if let Err(e) = self.associator.associate() {
            error!("{}", e);
        }
    }
}

impl<A: Associator> LinkEventHandler for LinkManager<A> {
    fn on_station_started(&self) {
        info!("Wi-Fi station started, associating...");
        self.request_association();
    }

    fn on_link_down(&self, reason: Option<u16>) {
        let disconnects = self.state.update(|s| {
            s.status = LinkStatus::Disconnected;
            s.disconnects += 1;
            s.disconnects
        });
        match reason {
            Some(reason) => warn!(
                "Wi-Fi disconnected (reason {}), reconnecting... [drop #{}]",
                reason, disconnects
            ),
            None => warn!("Wi-Fi disconnected, reconnecting... [drop #{}]", disconnects),
        }
        self.request_association();
    }

    fn on_address_acquired(&self, address: Ipv4Addr) {
        self.state.update(|s| {
            s.status = LinkStatus::Connected;
            s.address = Some(address);
        });
        info!("Wi-Fi connected! Open the stream at:");
        info!("  {}", access_url(address, &self.http));
    }
}
