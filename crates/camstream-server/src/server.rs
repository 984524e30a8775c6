//! HTTP endpoint serving the MJPEG stream.
//!
//! Every request to the stream route gets its own [`StreamSession`], run on
//! tokio's blocking pool against the shared frame source. Any number of
//! clients can watch at once; each one pulls frames independently.

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    body::Body,
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use camstream_core::{FrameSource, StreamSession};
use tokio::net::TcpListener;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::StreamExt;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};

use crate::sink::{ChannelSink, ResponseHead};

/// Configuration for the stream server.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind to.
    pub bind_addr: SocketAddr,
    /// Route serving the stream.
    pub stream_route: String,
    /// Body chunks buffered per client before the session blocks.
    pub channel_depth: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            stream_route: "/stream".to_string(),
            channel_depth: 8,
        }
    }
}

struct AppState<S> {
    source: Arc<S>,
    channel_depth: usize,
}

impl<S> Clone for AppState<S> {
    fn clone(&self) -> Self {
        Self {
            source: Arc::clone(&self.source),
            channel_depth: self.channel_depth,
        }
    }
}

/// MJPEG stream server over a shared frame source.
pub struct StreamServer<S> {
    config: ServerConfig,
    source: Arc<S>,
}

impl<S> StreamServer<S>
where
    S: FrameSource + 'static,
{
    pub fn new(config: ServerConfig, source: Arc<S>) -> Self {
        Self { config, source }
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Build the router with the stream route registered.
    pub fn router(&self) -> Router {
        let state = AppState {
            source: Arc::clone(&self.source),
            channel_depth: self.config.channel_depth,
        };

        Router::new()
            .route(&self.config.stream_route, get(stream_handler::<S>))
            .layer(TraceLayer::new_for_http())
            .with_state(state)
    }

    /// Bind the configured address and serve until the listener fails.
    pub async fn run(self) -> std::io::Result<()> {
        let listener = TcpListener::bind(self.config.bind_addr).await?;
        self.serve(listener).await
    }

    /// Serve on an already bound listener.
    pub async fn serve(self, listener: TcpListener) -> std::io::Result<()> {
        let addr = listener.local_addr()?;
        info!(
            "Stream server listening on http://{}{}",
            addr, self.config.stream_route
        );
        axum::serve(listener, self.router()).await
    }
}

async fn stream_handler<S>(State(state): State<AppState<S>>) -> Response
where
    S: FrameSource + 'static,
{
    let (sink, head, body) = ChannelSink::new(state.channel_depth);
    let source = state.source;

    tokio::task::spawn_blocking(move || {
        let outcome = StreamSession::new(&*source, sink).run();
        if outcome.is_capture_failure() {
            warn!(
                frames = outcome.frames_sent,
                "Stream ended on capture failure: {}", outcome.error
            );
        } else {
            debug!(frames = outcome.frames_sent, "Client left the stream");
        }
    });

    match head.await {
        Ok(ResponseHead::Stream { content_type }) => {
            let chunks = ReceiverStream::new(body).map(Ok::<_, Infallible>);
            Response::builder()
                .status(StatusCode::OK)
                .header(header::CONTENT_TYPE, content_type)
                .header(header::CACHE_CONTROL, "no-cache, no-store, must-revalidate")
                .header(header::PRAGMA, "no-cache")
                .body(Body::from_stream(chunks))
                .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
        }
        Ok(ResponseHead::ServerError) => StatusCode::INTERNAL_SERVER_ERROR.into_response(),
        Err(_) => {
            warn!("Stream session ended before sending a response");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}
