use async_trait::async_trait;
use std::collections::HashMap;
use std::time::Duration;
use tokio::time::timeout;

use crate::config::Config;

/// What the crawl core sees of an HTTP exchange.
#[derive(Debug, Clone, Default)]
pub struct FetchResponse {
    pub status: u16,
    /// URL after redirects.
    pub final_url: String,
    pub body: Vec<u8>,
    /// Header names are lower-cased.
    pub headers: HashMap<String, String>,
}

impl FetchResponse {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_ascii_lowercase()).map(String::as_str)
    }

    /// 2xx and 3xx count as a usable response.
    pub fn is_success(&self) -> bool {
        (200..400).contains(&self.status)
    }
}

/// The fetch capability the crawler consumes. Implementations own
/// timeouts, TLS and redirects; the crawler never retries.
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<FetchResponse, FetchError>;
}

/// Errors that can occur during HTTP fetching
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("Connection refused - server not accepting connections")]
    ConnectionRefused,

    #[error("DNS resolution failed")]
    DnsError,

    #[error("SSL/TLS error - certificate or encryption issue")]
    SslError,

    #[error("Request timeout")]
    Timeout,

    #[error("Failed to read response body: {0}")]
    BodyError(String),

    #[error("Content too large: {0} bytes (max: {1} bytes)")]
    ContentTooLarge(usize, usize),

    #[error("Failed to build HTTP client: {0}")]
    Client(String),
}

/// reqwest-backed fetcher used by the binary
#[derive(Debug)]
pub struct HttpClient {
    client: reqwest::Client,
    timeout_duration: Duration,
    max_content_size: usize,
}

impl HttpClient {
    pub fn new(user_agent: &str, timeout_secs: u64, max_content_size: usize) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .user_agent(user_agent)
            .timeout(Duration::from_secs(timeout_secs))
            .connect_timeout(Duration::from_secs(Config::CONNECT_TIMEOUT_SECS))
            .pool_max_idle_per_host(Config::POOL_IDLE_PER_HOST)
            .http1_only()
            .tcp_nodelay(true)
            .redirect(reqwest::redirect::Policy::limited(Config::MAX_REDIRECTS))
            .build()
            .map_err(|e| FetchError::Client(e.to_string()))?;

        Ok(Self {
            client,
            timeout_duration: Duration::from_secs(timeout_secs),
            max_content_size,
        })
    }

    /// Classify reqwest errors into our FetchError types
    fn classify_error(error: reqwest::Error) -> FetchError {
        if error.is_timeout() {
            return FetchError::Timeout;
        }

        let error_msg = error.to_string().to_lowercase();
        if error_msg.contains("connection refused") {
            return FetchError::ConnectionRefused;
        }
        if error_msg.contains("dns") || error_msg.contains("name resolution") {
            return FetchError::DnsError;
        }
        if error_msg.contains("ssl") || error_msg.contains("tls") || error_msg.contains("certificate") {
            return FetchError::SslError;
        }

        FetchError::NetworkError(error.to_string())
    }
}

#[async_trait]
impl Fetcher for HttpClient {
    async fn fetch(&self, url: &str) -> Result<FetchResponse, FetchError> {
        let response = timeout(
            self.timeout_duration,
            self.client
                .get(url)
                .header(
                    "Accept",
                    "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8",
                )
                .send(),
        )
        .await
        .map_err(|_| FetchError::Timeout)?
        .map_err(Self::classify_error)?;

        let status = response.status().as_u16();
        let final_url = response.url().to_string();
        let headers: HashMap<String, String> = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_ascii_lowercase(), v.to_string()))
            })
            .collect();

        // Check content length header first
        if let Some(length) = headers
            .get("content-length")
            .and_then(|v| v.parse::<usize>().ok())
        {
            if length > self.max_content_size {
                return Err(FetchError::ContentTooLarge(length, self.max_content_size));
            }
        }

        let body = timeout(self.timeout_duration, response.bytes())
            .await
            .map_err(|_| FetchError::Timeout)?
            .map_err(|e| FetchError::BodyError(e.to_string()))?;

        if body.len() > self.max_content_size {
            return Err(FetchError::ContentTooLarge(body.len(), self.max_content_size));
        }

        Ok(FetchResponse {
            status,
            final_url,
            body: body.to_vec(),
            headers,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_fetch_invalid_url() {
        let client = HttpClient::new("TestBot/1.0", 5, Config::MAX_BODY_BYTES).unwrap();
        let result = client.fetch("not-a-url").await;
        assert!(result.is_err());
    }

    #[test]
    fn test_response_helpers() {
        let mut headers = HashMap::new();
        headers.insert("content-type".to_string(), "text/html".to_string());
        let resp = FetchResponse {
            status: 301,
            final_url: "https://example.com/".into(),
            body: Vec::new(),
            headers,
        };
        assert!(resp.is_success());
        assert_eq!(resp.header("Content-Type"), Some("text/html"));

        let failed = FetchResponse {
            status: 404,
            ..Default::default()
        };
        assert!(!failed.is_success());
    }
}
