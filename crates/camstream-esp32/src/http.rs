//! HTTP stream route for the ESP-IDF HTTP server.

use std::sync::Arc;

use anyhow::{anyhow, bail, Result};
use camstream_core::{ChunkSink, FrameSource, HttpConfig, StreamSession};
use embedded_svc::http::server::{Connection, Request, Response};
use embedded_svc::io::Write;
use esp_idf_svc::http::server::{Configuration, EspHttpServer};
use esp_idf_svc::http::Method;
use log::{debug, error, info};

enum Stage<C: Connection> {
    /// Nothing sent; status and headers can still change.
    Pending(Request<C>),
    /// Status and headers sent, body streaming.
    Streaming(Response<C>),
    Finished,
}

/// [`ChunkSink`] over an ESP-IDF HTTP connection.
///
/// Like `httpd_resp_set_type`, the content type is only recorded; the status
/// line and headers go out with the first chunk.
pub struct HttpChunkSink<C: Connection> {
    stage: Stage<C>,
    content_type: Option<String>,
}

impl<C: Connection> HttpChunkSink<C> {
    pub fn new(request: Request<C>) -> Self {
        Self {
            stage: Stage::Pending(request),
            content_type: None,
        }
    }
}

impl<C: Connection> ChunkSink for HttpChunkSink<C> {
    type Error = anyhow::Error;

    fn set_content_type(&mut self, content_type: &str) -> Result<()> {
        if !matches!(self.stage, Stage::Pending(_)) {
            bail!("response headers already sent");
        }
        self.content_type = Some(content_type.to_string());
        Ok(())
    }

    fn send_chunk(&mut self, chunk: &[u8]) -> Result<()> {
        let mut response = match std::mem::replace(&mut self.stage, Stage::Finished) {
            Stage::Pending(request) => {
                let content_type = self.content_type.take().unwrap_or_default();
                request
                    .into_response(200, Some("OK"), &[("Content-Type", content_type.as_str())])
                    .map_err(|e| anyhow!("failed to start response: {:?}", e))?
            }
            Stage::Streaming(response) => response,
            Stage::Finished => bail!("response already finished"),
        };

        response
            .write_all(chunk)
            .map_err(|e| anyhow!("write failed: {:?}", e))?;
        self.stage = Stage::Streaming(response);
        Ok(())
    }

    fn send_server_error(&mut self) -> Result<()> {
        match std::mem::replace(&mut self.stage, Stage::Finished) {
            Stage::Pending(request) => {
                let mut response = request
                    .into_status_response(500)
                    .map_err(|e| anyhow!("failed to send 500: {:?}", e))?;
                response
                    .flush()
                    .map_err(|e| anyhow!("failed to send 500: {:?}", e))
            }
            _ => bail!("response headers already sent"),
        }
    }
}

/// Start the HTTP server and register the stream route on it.
///
/// The returned server must be kept alive.
pub fn start_stream_server<S>(config: &HttpConfig, source: Arc<S>) -> Result<EspHttpServer<'static>>
where
    S: FrameSource + 'static,
{
    let mut server = EspHttpServer::new(&Configuration {
        http_port: config.port,
        ..Default::default()
    })?;

    server.fn_handler::<anyhow::Error, _>(&config.stream_route, Method::Get, move |request| {
        let outcome = StreamSession::new(&*source, HttpChunkSink::new(request)).run();
        if outcome.is_capture_failure() {
            error!(
                "Stream ended on capture failure after {} frames",
                outcome.frames_sent
            );
        } else {
            debug!("Client left the stream after {} frames", outcome.frames_sent);
        }
        Ok(())
    })?;

    info!(
        "Route {} registered for MJPEG streaming on port {}",
        config.stream_route, config.port
    );
    Ok(server)
}
