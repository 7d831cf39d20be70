//! HTTP boundary: full-body GET for downloads and HEAD for size probes.
//!
//! [`Transport`] is the seam between the engine and the network so the pools
//! can be driven by an in-memory fake in tests. [`HttpTransport`] is the
//! production implementation over `reqwest`.

use bytes::Bytes;
use reqwest::header::CONTENT_LENGTH;

use crate::config::HttpConfig;
use crate::error::{DownloadError, Error, Result};

/// Streamed response body of a successful GET
#[async_trait::async_trait]
pub trait ResponseBody: Send {
    /// Next chunk of the body, `None` at end of stream
    async fn next_chunk(&mut self) -> std::result::Result<Option<Bytes>, DownloadError>;
}

/// Network operations the engine needs
#[async_trait::async_trait]
pub trait Transport: Send + Sync {
    /// Issue a GET; non-2xx statuses are [`DownloadError::BadResponse`]
    async fn get(&self, url: &str) -> std::result::Result<Box<dyn ResponseBody>, DownloadError>;

    /// Issue a HEAD and return the advertised content length
    async fn content_length(&self, url: &str) -> std::result::Result<u64, DownloadError>;
}

/// Production [`Transport`] backed by a shared `reqwest::Client`
#[derive(Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    /// Build a client from the HTTP configuration
    pub fn new(config: &HttpConfig) -> Result<Self> {
        let mut builder = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout)
            .user_agent(config.user_agent.clone());
        if let Some(timeout) = config.request_timeout {
            builder = builder.timeout(timeout);
        }
        let client = builder
            .build()
            .map_err(|e| Error::Other(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self { client })
    }

    /// Wrap an existing client
    pub fn from_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

struct ReqwestBody {
    url: String,
    response: reqwest::Response,
}

#[async_trait::async_trait]
impl ResponseBody for ReqwestBody {
    async fn next_chunk(&mut self) -> std::result::Result<Option<Bytes>, DownloadError> {
        self.response
            .chunk()
            .await
            .map_err(|e| DownloadError::network(&self.url, &e))
    }
}

#[async_trait::async_trait]
impl Transport for HttpTransport {
    async fn get(&self, url: &str) -> std::result::Result<Box<dyn ResponseBody>, DownloadError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| DownloadError::network(url, &e))?;

        if !response.status().is_success() {
            return Err(DownloadError::BadResponse {
                url: url.to_string(),
                status: response.status().as_u16(),
            });
        }

        Ok(Box::new(ReqwestBody {
            url: url.to_string(),
            response,
        }))
    }

    async fn content_length(&self, url: &str) -> std::result::Result<u64, DownloadError> {
        let response = self
            .client
            .head(url)
            .send()
            .await
            .map_err(|e| DownloadError::ProbeFailure {
                url: url.to_string(),
                reason: e.to_string(),
            })?;

        if !response.status().is_success() {
            return Err(DownloadError::ProbeFailure {
                url: url.to_string(),
                reason: format!("HTTP {}", response.status().as_u16()),
            });
        }

        // Response::content_length() reports the body size hint, which is 0 for
        // HEAD; the header carries the real length.
        parse_content_length(response.headers().get(CONTENT_LENGTH)).ok_or_else(|| {
            DownloadError::ProbeFailure {
                url: url.to_string(),
                reason: "missing or invalid Content-Length".to_string(),
            }
        })
    }
}

fn parse_content_length(value: Option<&reqwest::header::HeaderValue>) -> Option<u64> {
    value
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.trim().parse::<u64>().ok())
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn content_length_header_parsing() {
        assert_eq!(
            parse_content_length(Some(&HeaderValue::from_static("1234"))),
            Some(1234)
        );
        assert_eq!(
            parse_content_length(Some(&HeaderValue::from_static("abc"))),
            None
        );
        assert_eq!(parse_content_length(None), None);
    }

    #[tokio::test]
    async fn get_streams_body_in_chunks() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/data.bin"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![7u8; 4096]))
            .mount(&mock_server)
            .await;

        let transport = HttpTransport::new(&HttpConfig::default()).unwrap();
        let mut body = transport
            .get(&format!("{}/data.bin", mock_server.uri()))
            .await
            .unwrap();

        let mut total = 0;
        while let Some(chunk) = body.next_chunk().await.unwrap() {
            assert!(chunk.iter().all(|b| *b == 7));
            total += chunk.len();
        }
        assert_eq!(total, 4096);
    }

    #[tokio::test]
    async fn get_non_success_is_bad_response() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/missing"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&mock_server)
            .await;

        let transport = HttpTransport::new(&HttpConfig::default()).unwrap();
        let result = transport
            .get(&format!("{}/missing", mock_server.uri()))
            .await;

        assert!(matches!(
            result,
            Err(DownloadError::BadResponse { status: 404, .. })
        ));
    }

    #[tokio::test]
    async fn get_connection_refused_is_network_failure() {
        // Bind then drop a listener to get a port nothing is listening on
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let transport = HttpTransport::new(&HttpConfig::default()).unwrap();
        let result = transport.get(&format!("http://{}/file", addr)).await;

        assert!(matches!(result, Err(DownloadError::NetworkFailure { .. })));
    }

    #[tokio::test]
    async fn head_failure_is_probe_failure() {
        let mock_server = MockServer::start().await;
        Mock::given(method("HEAD"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&mock_server)
            .await;

        let transport = HttpTransport::new(&HttpConfig::default()).unwrap();
        let result = transport
            .content_length(&format!("{}/anything", mock_server.uri()))
            .await;

        assert!(matches!(result, Err(DownloadError::ProbeFailure { .. })));
    }
}
