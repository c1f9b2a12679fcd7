//! Request/response access to the box's HTTP surface.
//!
//! The box answers POST only, even for pure reads, and takes url-form-encoded
//! bodies.  Its web server also resets connections that are opened and
//! closed per request, so [`HttpTransport`] keeps a single pooled,
//! keep-alive [`reqwest::Client`] for its whole lifetime.

use std::error::Error as _;
use std::io;
use std::time::Duration;

use async_trait::async_trait;
use calyps_types::{CalypsError, TransportError};
use reqwest::Url;
use tracing::{debug, warn};

/// Inventory endpoint.
pub const INVENTORY_PATH: &str = "/m?a=getObjects";

/// Command endpoint.
pub const COMMAND_PATH: &str = "/m?a=command";

/// Anything that can POST a form to the box and hand back the raw body.
///
/// Discovery and command dispatch only see this trait, which keeps them
/// testable without a network.
#[async_trait]
pub trait Transport: Send + Sync {
    /// POST `form` to `path` (relative to the box origin) and return the body.
    async fn post(&self, path: &str, form: &[(&str, &str)]) -> Result<String, TransportError>;
}

/// Settings of the pooled HTTP client.
#[derive(Debug, Clone)]
pub struct HttpTransportConfig {
    /// Any URL on the box; only its origin is kept.
    pub base_url: String,
    /// Upper bound of one whole request, body included.
    pub request_timeout: Duration,
    pub connect_timeout: Duration,
    /// How long an idle pooled connection is kept.
    pub pool_idle_timeout: Duration,
}

impl HttpTransportConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            request_timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(5),
            pool_idle_timeout: Duration::from_secs(30),
        }
    }
}

/// Reduce any URL on the box to its origin (`scheme://host[:port]/`).
pub fn box_origin(raw: &str) -> Result<Url, CalypsError> {
    let mut url =
        Url::parse(raw.trim()).map_err(|e| CalypsError::Config(format!("invalid box URL `{raw}`: {e}")))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(CalypsError::Config(format!(
            "box URL `{raw}` must use http or https"
        )));
    }
    url.set_path("");
    url.set_query(None);
    url.set_fragment(None);
    Ok(url)
}

/// [`Transport`] backed by a keep-alive [`reqwest::Client`].
#[derive(Debug, Clone)]
pub struct HttpTransport {
    origin: Url,
    client: reqwest::Client,
}

impl HttpTransport {
    /// Build the client.
    ///
    /// # Errors
    ///
    /// Returns [`CalypsError::Config`] when the base URL is not an http(s)
    /// URL or the TLS backend cannot be initialised.
    pub fn new(config: &HttpTransportConfig) -> Result<Self, CalypsError> {
        let origin = box_origin(&config.base_url)?;
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .connect_timeout(config.connect_timeout)
            .pool_idle_timeout(config.pool_idle_timeout)
            .pool_max_idle_per_host(4)
            .tcp_keepalive(Some(Duration::from_secs(60)))
            .build()
            .map_err(|e| CalypsError::Config(format!("cannot build HTTP client: {e}")))?;
        Ok(Self { origin, client })
    }

    /// Origin every request path is joined onto.
    pub fn origin(&self) -> &Url {
        &self.origin
    }

    fn endpoint(&self, path: &str) -> Result<Url, TransportError> {
        self.origin.join(path).map_err(|e| TransportError::Connection {
            url: format!("{}{}", self.origin, path.trim_start_matches('/')),
            details: e.to_string(),
        })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn post(&self, path: &str, form: &[(&str, &str)]) -> Result<String, TransportError> {
        let url = self.endpoint(path)?;
        debug!(url = %url, fields = form.len(), "POST");

        let response = self
            .client
            .post(url.clone())
            .header(reqwest::header::ACCEPT, "application/json, text/plain, */*")
            .form(form)
            .send()
            .await
            .map_err(|e| classify(url.as_str(), &e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(TransportError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        response.text().await.map_err(|e| {
            if e.is_timeout() {
                TransportError::Timeout { url: url.to_string() }
            } else {
                TransportError::Body {
                    url: url.to_string(),
                    details: e.to_string(),
                }
            }
        })
    }
}

/// Map a send failure onto the transport taxonomy.
fn classify(url: &str, err: &reqwest::Error) -> TransportError {
    if err.is_timeout() {
        return TransportError::Timeout { url: url.to_string() };
    }
    if is_connection_reset(err) {
        warn!(url, "connection reset by box, pooled connection was stale");
        return TransportError::ConnectionReset { url: url.to_string() };
    }
    TransportError::Connection {
        url: url.to_string(),
        details: error_chain(err),
    }
}

fn is_connection_reset(err: &reqwest::Error) -> bool {
    let mut source = err.source();
    while let Some(inner) = source {
        if let Some(io_err) = inner.downcast_ref::<io::Error>() {
            if matches!(
                io_err.kind(),
                io::ErrorKind::ConnectionReset
                    | io::ErrorKind::ConnectionAborted
                    | io::ErrorKind::BrokenPipe
            ) {
                return true;
            }
        }
        source = inner.source();
    }
    false
}

// reqwest's Display stops at the outermost layer; the errno is further down.
fn error_chain(err: &reqwest::Error) -> String {
    let mut out = err.to_string();
    let mut source = err.source();
    while let Some(inner) = source {
        out.push_str(": ");
        out.push_str(&inner.to_string());
        source = inner.source();
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_string_contains, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn transport_for(server: &MockServer) -> HttpTransport {
        let mut config = HttpTransportConfig::new(server.uri());
        config.request_timeout = Duration::from_millis(500);
        HttpTransport::new(&config).unwrap()
    }

    #[test]
    fn origin_drops_path_and_query() {
        let url = box_origin("http://192.168.1.20:8080/index.html?x=1#top").unwrap();
        assert_eq!(url.as_str(), "http://192.168.1.20:8080/");
    }

    #[test]
    fn origin_rejects_non_http_schemes() {
        assert!(matches!(box_origin("ftp://box"), Err(CalypsError::Config(_))));
        assert!(matches!(box_origin("not a url"), Err(CalypsError::Config(_))));
    }

    #[tokio::test]
    async fn post_sends_form_and_returns_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/m"))
            .and(query_param("a", "getObjects"))
            .and(header("content-type", "application/x-www-form-urlencoded"))
            .and(body_string_contains("type=Rolling_Shutter"))
            .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"objects":[]}"#))
            .expect(1)
            .mount(&server)
            .await;

        let body = transport_for(&server)
            .post(INVENTORY_PATH, &[("type", "Rolling_Shutter")])
            .await
            .unwrap();
        assert_eq!(body, r#"{"objects":[]}"#);
    }

    #[tokio::test]
    async fn form_values_are_url_encoded() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/m"))
            .and(body_string_contains("args=%7B%22level%22%3A%2242%22%7D"))
            .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
            .expect(1)
            .mount(&server)
            .await;

        let body = transport_for(&server)
            .post(COMMAND_PATH, &[("action", "LEVEL"), ("args", r#"{"level":"42"}"#)])
            .await
            .unwrap();
        assert_eq!(body, "ok");
    }

    #[tokio::test]
    async fn non_success_status_is_a_transport_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let err = transport_for(&server).post(COMMAND_PATH, &[]).await.unwrap_err();
        assert!(matches!(err, TransportError::Status { status: 503, .. }));
    }

    #[tokio::test]
    async fn slow_box_times_out() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(2)))
            .mount(&server)
            .await;

        let err = transport_for(&server).post(INVENTORY_PATH, &[]).await.unwrap_err();
        assert!(matches!(err, TransportError::Timeout { .. }), "{err:?}");
    }

    #[tokio::test]
    async fn unreachable_box_is_a_connection_error() {
        let mut config = HttpTransportConfig::new("http://127.0.0.1:9");
        config.connect_timeout = Duration::from_millis(200);
        config.request_timeout = Duration::from_millis(500);
        let transport = HttpTransport::new(&config).unwrap();

        let err = transport.post(INVENTORY_PATH, &[]).await.unwrap_err();
        assert!(
            matches!(
                err,
                TransportError::Connection { .. }
                    | TransportError::ConnectionReset { .. }
                    | TransportError::Timeout { .. }
            ),
            "{err:?}"
        );
    }
}
