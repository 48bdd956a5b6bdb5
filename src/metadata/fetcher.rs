use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use tracing::{debug, warn};

use super::{MetadataError, Result};

/// Network access for partner metadata
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MetadataFetcher: Send + Sync {
    /// Download the metadata document published at `url`
    async fn fetch(&self, url: &str) -> Result<String>;
}

/// Fetches metadata over HTTP(S)
#[derive(Debug, Clone)]
pub struct HttpMetadataFetcher {
    client: Client,
    max_size: usize,
}

impl HttpMetadataFetcher {
    /// A fetcher giving up after `timeout` and refusing documents larger
    /// than `max_size` bytes
    pub fn new(timeout: Duration, max_size: usize) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .use_rustls_tls()
            .build()
            .map_err(|e| MetadataError::Fetch {
                url: String::new(),
                reason: format!("Failed to create HTTP client: {e}"),
            })?;
        Ok(Self { client, max_size })
    }
}

#[async_trait]
impl MetadataFetcher for HttpMetadataFetcher {
    async fn fetch(&self, url: &str) -> Result<String> {
        let fetch_error = |reason: String| MetadataError::Fetch {
            url: url.to_string(),
            reason,
        };

        debug!(url, "Fetching metadata");
        let mut response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| fetch_error(e.to_string()))?;

        if !response.status().is_success() {
            warn!(url, status = %response.status(), "Metadata endpoint returned an error");
            return Err(fetch_error(format!("HTTP status {}", response.status())));
        }

        let too_large = || {
            warn!(url, max_size = self.max_size, "Metadata document too large");
            fetch_error(format!("document exceeds {} bytes", self.max_size))
        };
        if response
            .content_length()
            .is_some_and(|length| length > self.max_size as u64)
        {
            return Err(too_large());
        }

        // Content-Length may be absent
        let mut body = Vec::new();
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| fetch_error(e.to_string()))?
        {
            if body.len() + chunk.len() > self.max_size {
                return Err(too_large());
            }
            body.extend_from_slice(&chunk);
        }
        String::from_utf8(body).map_err(|e| fetch_error(format!("metadata is not UTF-8: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Serve one HTTP response and return the URL to fetch it from
    async fn serve_once(response: Vec<u8>) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = [0u8; 1024];
            let _ = socket.read(&mut request).await;
            let _ = socket.write_all(&response).await;
            let _ = socket.shutdown().await;
        });
        format!("http://{addr}/metadata")
    }

    fn with_length(body: &str) -> Vec<u8> {
        format!(
            "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
            body.len()
        )
        .into_bytes()
    }

    fn chunked(body: &str) -> Vec<u8> {
        let mut response =
            b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\nConnection: close\r\n\r\n".to_vec();
        for part in body.as_bytes().chunks(16) {
            response.extend_from_slice(format!("{:x}\r\n", part.len()).as_bytes());
            response.extend_from_slice(part);
            response.extend_from_slice(b"\r\n");
        }
        response.extend_from_slice(b"0\r\n\r\n");
        response
    }

    fn fetcher(max_size: usize) -> HttpMetadataFetcher {
        HttpMetadataFetcher::new(Duration::from_secs(5), max_size).unwrap()
    }

    #[tokio::test]
    async fn test_fetch_within_limit() {
        let body = "<EntityDescriptor/>";
        let url = serve_once(with_length(body)).await;

        assert_eq!(fetcher(64).fetch(&url).await.unwrap(), body);
    }

    #[tokio::test]
    async fn test_declared_length_over_limit() {
        let url = serve_once(with_length(&"x".repeat(100))).await;

        let err = fetcher(64).fetch(&url).await.unwrap_err();
        assert!(matches!(err, MetadataError::Fetch { reason, .. } if reason.contains("64 bytes")));
    }

    #[tokio::test]
    async fn test_chunked_body_over_limit() {
        let url = serve_once(chunked(&"x".repeat(100))).await;

        let err = fetcher(64).fetch(&url).await.unwrap_err();
        assert!(matches!(err, MetadataError::Fetch { reason, .. } if reason.contains("64 bytes")));
    }

    #[tokio::test]
    async fn test_chunked_body_within_limit() {
        let body = "y".repeat(60);
        let url = serve_once(chunked(&body)).await;

        assert_eq!(fetcher(64).fetch(&url).await.unwrap(), body);
    }

    #[tokio::test]
    async fn test_error_status() {
        let url = serve_once(
            b"HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\nConnection: close\r\n\r\n".to_vec(),
        )
        .await;

        let err = fetcher(64).fetch(&url).await.unwrap_err();
        assert!(matches!(err, MetadataError::Fetch { reason, .. } if reason.contains("404")));
    }
}
