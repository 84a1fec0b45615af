//! `MetricsExporter` and closely related types.

use std::{
    convert::Infallible,
    fmt,
    future::Future,
    net::SocketAddr,
    pin::Pin,
    str,
    sync::Arc,
    time::{Duration, Instant},
};

use hyper::{
    body::Incoming, header, server::conn::http1, service::service_fn, Request, Response,
    StatusCode,
};
use hyper_util::rt::TokioIo;
use prometheus_client::{encoding::text, registry::Registry};
use thiserror::Error;
use tokio::{io, net::TcpListener};
use url::Url;

#[cfg(test)]
mod tests;

/// Path serving the metrics.
pub const METRICS_PATH: &str = "/metrics";
/// Job name used when pushing metrics to a push gateway.
pub const JOB_NAME: &str = "vrchat_exporter";

/// Content type of the served metrics.
pub const OPEN_METRICS_CONTENT_TYPE: &str =
    "application/openmetrics-text; version=1.0.0; charset=utf-8";
/// Content type of metrics pushed to a gateway.
pub const PROMETHEUS_CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";

#[derive(Debug, Clone)]
struct MetricsExporterInner {
    registry: Arc<Registry>,
}

impl MetricsExporterInner {
    async fn render_body(&self) -> String {
        let started_at = Instant::now();
        let registry = Arc::clone(&self.registry);
        // `Registry` encoding is blocking: collectors fetch upstream state synchronously
        // since `prometheus-client` only provides a blocking interface for them.
        let buffer = tokio::task::spawn_blocking(move || {
            let mut buffer = String::with_capacity(1_024);
            text::encode(&mut buffer, &registry).unwrap();
            // ^ `unwrap()` is safe; writing to a string never fails.
            buffer
        })
        .await
        .unwrap(); // propagate panics should they occur in the spawned blocking task

        let latency = started_at.elapsed();
        let scraped_size = buffer.len();
        tracing::debug!(
            latency_sec = latency.as_secs_f64(),
            scraped_size,
            "Scraped metrics in {latency:?} (scraped size: {scraped_size}B)"
        );
        buffer
    }

    async fn respond(&self, path: &str) -> Response<String> {
        if path == METRICS_PATH {
            Response::builder()
                .status(StatusCode::OK)
                .header(header::CONTENT_TYPE, OPEN_METRICS_CONTENT_TYPE)
                .body(self.render_body().await)
                .unwrap()
        } else {
            tracing::debug!(path, "Requested path is not served");
            Response::builder()
                .status(StatusCode::NOT_FOUND)
                .header(header::CONTENT_TYPE, "text/plain; charset=utf-8")
                .body("404 page not found\n".to_owned())
                .unwrap()
        }
    }
}

/// Exporter of metrics from a [`Registry`] to Prometheus, either by serving them
/// ([`Self::start()`]) or by pushing them to a gateway ([`Self::push_to_gateway()`]).
///
/// Every scrape or push encodes the registry anew, so collectors registered in it
/// are invoked once per request; concurrent scrapes are not coalesced.
pub struct MetricsExporter {
    inner: MetricsExporterInner,
}

impl fmt::Debug for MetricsExporter {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("MetricsExporter")
            .field("registry", &self.inner.registry)
            .finish()
    }
}

impl MetricsExporter {
    /// Creates an exporter based on the provided metrics [`Registry`].
    pub fn new(registry: Arc<Registry>) -> Self {
        Self {
            inner: MetricsExporterInner { registry },
        }
    }

    /// Starts the server on the specified address. The returned future only resolves
    /// if the server fails.
    ///
    /// The server will expose the following endpoints:
    ///
    /// - `GET /metrics`: serves the metrics in the Open Metrics text format
    /// - any other path: responds with 404 Not Found
    ///
    /// # Errors
    ///
    /// Returns an error if binding to the specified address or accepting connections fails.
    pub async fn start(self, bind_address: SocketAddr) -> io::Result<()> {
        let server = self.bind(bind_address).await?;
        tracing::info!("Listening on {}", server.local_addr());
        server.start().await
    }

    /// Creates an HTTP exporter server and binds it to the specified address.
    ///
    /// # Errors
    ///
    /// Returns an error if binding to the specified address fails.
    pub async fn bind(self, bind_address: SocketAddr) -> io::Result<MetricsServer> {
        let listener = TcpListener::bind(bind_address).await?;
        let local_addr = listener.local_addr()?;
        Ok(MetricsServer {
            server: Box::pin(serve(listener, self.inner)),
            local_addr,
        })
    }

    /// Pushes metrics to the `gateway` indefinitely, sleeping for the configured interval after
    /// each successful push.
    ///
    /// # Errors
    ///
    /// Returns an error on the first failed push (either a transport error, or a non-success
    /// response from the gateway). Pushes are never retried.
    pub async fn push_to_gateway(self, gateway: PushGateway) -> Result<Infallible, PushError> {
        let endpoint = gateway.push_url();
        let interval = gateway.interval;
        tracing::info!(
            "Starting push-based Prometheus exporter to `{endpoint}` with push interval {interval:?}"
        );

        let client = reqwest::Client::builder()
            .build()
            .map_err(PushError::Client)?;
        loop {
            let body = self.inner.render_body().await;
            let mut request = client
                .post(&endpoint)
                .header(header::CONTENT_TYPE, PROMETHEUS_CONTENT_TYPE)
                .body(body);
            if let Some(auth) = &gateway.basic_auth {
                request = request.basic_auth(&auth.username, Some(&auth.password));
            }

            let response = request
                .send()
                .await
                .map_err(|source| PushError::Transport {
                    endpoint: endpoint.clone(),
                    source,
                })?;
            let status = response.status();
            if !status.is_success() {
                return Err(PushError::Rejected {
                    endpoint,
                    status,
                    body: read_erroneous_response(response).await,
                });
            }

            tracing::info!(%endpoint, %status, "Metrics pushed to {endpoint}");
            tokio::time::sleep(interval).await;
        }
    }
}

async fn serve(listener: TcpListener, inner: MetricsExporterInner) -> io::Result<()> {
    loop {
        let (stream, _) = listener.accept().await?;
        let io = TokioIo::new(stream);
        let inner = inner.clone();
        tokio::spawn(async move {
            let inner = &inner;
            let service = service_fn(move |request: Request<Incoming>| async move {
                Ok::<_, Infallible>(inner.respond(request.uri().path()).await)
            });
            if let Err(err) = http1::Builder::new().serve_connection(io, service).await {
                tracing::warn!(%err, "Error serving connection");
            }
        });
    }
}

async fn read_erroneous_response(response: reqwest::Response) -> String {
    let body = match response.bytes().await {
        Ok(body) => body,
        Err(err) => return format!("(failed reading response body: {err})"),
    };
    match str::from_utf8(&body) {
        Ok(body) => body.to_owned(),
        Err(err) => {
            let body_length = body.len();
            format!("(Non UTF-8 body with length {body_length}B: {err})")
        }
    }
}

/// Metrics server bound to a certain local address returned by [`MetricsExporter::bind()`].
///
/// Useful e.g. if you need to find out which port the server was bound to if the 0th port was specified.
#[must_use = "Server should be `start()`ed"]
pub struct MetricsServer {
    server: Pin<Box<dyn Future<Output = io::Result<()>> + Send>>,
    local_addr: SocketAddr,
}

impl fmt::Debug for MetricsServer {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("MetricsServer")
            .field("local_addr", &self.local_addr)
            .finish_non_exhaustive()
    }
}

impl MetricsServer {
    /// Returns the local address this server is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Starts this server. Only resolves if accepting connections fails.
    ///
    /// # Errors
    ///
    /// Returns an error if accepting connections fails.
    pub async fn start(self) -> io::Result<()> {
        self.server.await
    }
}

/// Basic auth credentials for a push gateway.
#[derive(Clone)]
pub struct BasicAuth {
    username: String,
    password: String,
}

impl fmt::Debug for BasicAuth {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("BasicAuth")
            .field("username", &self.username)
            .finish_non_exhaustive()
    }
}

/// Push gateway configuration used by [`MetricsExporter::push_to_gateway()`].
#[derive(Debug, Clone)]
pub struct PushGateway {
    endpoint: Url,
    job: String,
    basic_auth: Option<BasicAuth>,
    interval: Duration,
}

impl PushGateway {
    /// Creates a configuration pushing to `endpoint` every `interval` with the [`JOB_NAME`] job.
    pub fn new(endpoint: Url, interval: Duration) -> Self {
        Self {
            endpoint,
            job: JOB_NAME.to_owned(),
            basic_auth: None,
            interval,
        }
    }

    /// Sets basic auth credentials sent with each push.
    #[must_use]
    pub fn with_basic_auth(mut self, username: String, password: String) -> Self {
        self.basic_auth = Some(BasicAuth { username, password });
        self
    }

    /// Returns the interval between pushes.
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Returns basic auth credentials, if any.
    pub fn basic_auth(&self) -> Option<&BasicAuth> {
        self.basic_auth.as_ref()
    }

    /// Returns the URL metrics are pushed to, e.g. `https://gateway/metrics/job/vrchat_exporter`.
    pub fn push_url(&self) -> String {
        let base = self.endpoint.as_str().trim_end_matches('/');
        format!("{base}/metrics/job/{}", self.job)
    }
}

/// Error pushing metrics to a gateway.
#[derive(Debug, Error)]
pub enum PushError {
    /// HTTP client could not be initialized.
    #[error("failed initializing HTTP client: {0}")]
    Client(#[source] reqwest::Error),
    /// Request could not be sent.
    #[error("error submitting metrics to push gateway `{endpoint}`: {source}")]
    Transport {
        /// Push URL.
        endpoint: String,
        /// Underlying error.
        #[source]
        source: reqwest::Error,
    },
    /// Gateway responded with a non-success status.
    #[error("push gateway `{endpoint}` responded with {status}: {body}")]
    Rejected {
        /// Push URL.
        endpoint: String,
        /// Response status.
        status: StatusCode,
        /// Response body.
        body: String,
    },
}
