//! [`HttpTransport`] over `reqwest`, for running the collector SDK outside a
//! browser (native hosts, smoke tests against a real collector).

use std::time::Duration;

use async_trait::async_trait;
use collector_core::{HttpMethod, HttpRequest, HttpResponse, HttpTransport, SDK_VERSION, TransportError};
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

pub const DEFAULT_TIMEOUT_MS: u64 = 5_000;
pub const DEFAULT_REQUEST_ATTEMPTS: usize = 2;
pub const REQUEST_ID_HEADER: &str = "x-request-id";

const MIN_TIMEOUT_MS: u64 = 250;

#[derive(Debug, Clone)]
pub struct ReqwestTransportConfig {
    pub timeout_ms: u64,
    /// Attempts for GET requests. POSTs are never retried.
    pub request_attempts: usize,
    pub user_agent: Option<String>,
}

impl Default for ReqwestTransportConfig {
    fn default() -> Self {
        Self {
            timeout_ms: DEFAULT_TIMEOUT_MS,
            request_attempts: DEFAULT_REQUEST_ATTEMPTS,
            user_agent: None,
        }
    }
}

#[derive(Debug, Error)]
pub enum TransportBuildError {
    #[error("collector_http_client_build_failed:{message}")]
    Build { message: String },
}

#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    http: reqwest::Client,
    timeout: Duration,
    request_attempts: usize,
}

impl ReqwestTransport {
    pub fn new(config: ReqwestTransportConfig) -> Result<Self, TransportBuildError> {
        let user_agent = config
            .user_agent
            .unwrap_or_else(|| format!("collector-sdk/{SDK_VERSION}"));
        let http = reqwest::Client::builder()
            .user_agent(user_agent)
            .build()
            .map_err(|error| TransportBuildError::Build {
                message: error.to_string(),
            })?;
        Ok(Self {
            http,
            timeout: Duration::from_millis(config.timeout_ms.max(MIN_TIMEOUT_MS)),
            request_attempts: config.request_attempts.max(1),
        })
    }

    #[must_use]
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    #[must_use]
    pub fn request_attempts(&self) -> usize {
        self.request_attempts
    }

    /// Translates `request` into a `reqwest` request tagged with a fresh request id.
    pub fn build_request(&self, request: &HttpRequest) -> Result<reqwest::Request, TransportError> {
        let mut builder = match request.method {
            HttpMethod::Get => self.http.get(request.url.as_str()),
            HttpMethod::Post => self.http.post(request.url.as_str()),
        };
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = &request.body {
            builder = builder.body(body.clone());
        }
        builder
            .header(REQUEST_ID_HEADER, format!("req_{}", Uuid::new_v4().simple()))
            .timeout(self.timeout)
            .build()
            .map_err(|error| TransportError::Request {
                message: error.to_string(),
            })
    }

    fn attempts_for(&self, method: HttpMethod) -> usize {
        match method {
            HttpMethod::Get => self.request_attempts,
            HttpMethod::Post => 1,
        }
    }

    fn map_error(&self, error: &reqwest::Error) -> TransportError {
        if error.is_timeout() {
            return TransportError::Timeout {
                timeout_ms: u64::try_from(self.timeout.as_millis()).unwrap_or(u64::MAX),
            };
        }
        TransportError::Request {
            message: error.to_string(),
        }
    }
}

#[async_trait(?Send)]
impl HttpTransport for ReqwestTransport {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        let attempts = self.attempts_for(request.method);
        let mut last_error: Option<TransportError> = None;

        for attempt in 0..attempts {
            let outgoing = self.build_request(&request)?;
            match self.http.execute(outgoing).await {
                Ok(response) => {
                    let status = response.status().as_u16();
                    let body = response.text().await.map_err(|error| TransportError::Request {
                        message: format!("read failed: {error}"),
                    })?;
                    debug!(url = %request.url, status, "collector response");
                    return Ok(HttpResponse::new(status, body));
                }
                Err(error) => {
                    debug!(url = %request.url, attempt, %error, "collector request failed");
                    last_error = Some(self.map_error(&error));
                }
            }
        }

        Err(last_error.unwrap_or_else(|| TransportError::Request {
            message: "unknown".to_string(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    fn transport() -> ReqwestTransport {
        ReqwestTransport::new(ReqwestTransportConfig::default()).expect("transport")
    }

    #[test]
    fn config_is_clamped() {
        let transport = ReqwestTransport::new(ReqwestTransportConfig {
            timeout_ms: 10,
            request_attempts: 0,
            user_agent: None,
        })
        .expect("transport");

        assert_eq!(transport.timeout(), Duration::from_millis(250));
        assert_eq!(transport.request_attempts(), 1);
    }

    #[test]
    fn posts_are_attempted_once() {
        let transport = transport();
        assert_eq!(transport.attempts_for(HttpMethod::Get), DEFAULT_REQUEST_ATTEMPTS);
        assert_eq!(transport.attempts_for(HttpMethod::Post), 1);
    }

    #[test]
    fn built_request_carries_headers_body_and_request_id() {
        let request = HttpRequest::post_form(
            "https://tst.kaptcha.com/session/sess-1",
            Some("m=900900".to_string()),
        )
        .with_header("client-id", "900900");

        let built = transport().build_request(&request).expect("request");

        assert_eq!(built.method(), reqwest::Method::POST);
        assert_eq!(built.url().as_str(), "https://tst.kaptcha.com/session/sess-1");
        assert_eq!(
            built.headers().get("client-id").and_then(|value| value.to_str().ok()),
            Some("900900")
        );
        let request_id = built
            .headers()
            .get(REQUEST_ID_HEADER)
            .and_then(|value| value.to_str().ok())
            .expect("request id");
        assert!(request_id.starts_with("req_"));
        assert_eq!(
            built.body().and_then(reqwest::Body::as_bytes),
            Some(b"m=900900".as_slice())
        );
        assert_eq!(built.timeout(), Some(&Duration::from_millis(DEFAULT_TIMEOUT_MS)));
    }

    #[test]
    fn malformed_url_is_a_request_error() {
        let error = transport()
            .build_request(&HttpRequest::get("not a url"))
            .expect_err("invalid url");
        assert!(matches!(error, TransportError::Request { .. }));
    }

    async fn read_request(stream: &mut tokio::net::TcpStream) -> String {
        let mut buffer = Vec::new();
        let mut chunk = [0_u8; 1024];
        loop {
            let read = stream.read(&mut chunk).await.expect("read");
            if read == 0 {
                break;
            }
            buffer.extend_from_slice(&chunk[..read]);
            let text = String::from_utf8_lossy(&buffer);
            if let Some(head_end) = text.find("\r\n\r\n") {
                let content_length = text[..head_end]
                    .lines()
                    .find_map(|line| {
                        let (name, value) = line.split_once(':')?;
                        name.eq_ignore_ascii_case("content-length")
                            .then(|| value.trim().parse::<usize>().ok())
                            .flatten()
                    })
                    .unwrap_or(0);
                if buffer.len() >= head_end + 4 + content_length {
                    break;
                }
            }
        }
        String::from_utf8_lossy(&buffer).to_string()
    }

    #[tokio::test]
    async fn round_trips_against_a_local_collector() {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let address = listener.local_addr().expect("address");
        let server = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.expect("accept");
            let raw = read_request(&mut stream).await;
            stream
                .write_all(
                    b"HTTP/1.1 200 OK\r\ncontent-type: application/json\r\ncontent-length: 16\r\nconnection: close\r\n\r\n{\"value\":\"fp-1\"}",
                )
                .await
                .expect("write");
            raw
        });

        let url = format!("http://{address}/cs/generatecookie?m=900900&s=sess-1");
        let response = transport()
            .send(HttpRequest::get(url))
            .await
            .expect("response");

        assert_eq!(response.status, 200);
        let payload: serde_json::Value = response.json().expect("json");
        assert_eq!(payload["value"], "fp-1");

        let raw = server.await.expect("server");
        assert!(raw.starts_with("GET /cs/generatecookie?m=900900&s=sess-1 HTTP/1.1"));
        assert!(raw.to_ascii_lowercase().contains("x-request-id: req_"));
    }

    #[tokio::test]
    async fn refused_connection_is_a_request_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let address = listener.local_addr().expect("address");
        drop(listener);

        let error = transport()
            .send(HttpRequest::post_form(format!("http://{address}/fin"), None))
            .await
            .expect_err("nothing listening");
        assert!(matches!(error, TransportError::Request { .. }));
    }
}
