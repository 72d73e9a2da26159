// src/repository/transport.rs

//! Scheme-keyed transports for fetching repository payloads
//!
//! A [`TransportRegistry`] maps a URL scheme to a fetch function. The
//! defaults cover `http`, `https` (blocking reqwest with retry) and `file`.
//! Callers can register extra schemes, which is also how tests stub the
//! network out.

use crate::config::NetworkSection;
use crate::error::{Error, Result};
use reqwest::blocking::Client;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

/// Retry delay in milliseconds, multiplied by the attempt number
const RETRY_DELAY_MS: u64 = 1000;

/// A fetch function for one scheme
pub type FetchFn = Arc<dyn Fn(&Url) -> Result<Vec<u8>> + Send + Sync>;

/// Registry of transports keyed by URL scheme
#[derive(Clone, Default)]
pub struct TransportRegistry {
    handlers: HashMap<String, FetchFn>,
}

impl fmt::Debug for TransportRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut schemes: Vec<&String> = self.handlers.keys().collect();
        schemes.sort();
        f.debug_struct("TransportRegistry")
            .field("schemes", &schemes)
            .finish()
    }
}

impl TransportRegistry {
    /// A registry with no handlers at all
    pub fn empty() -> Self {
        Self::default()
    }

    /// `http`, `https` and `file` handlers
    pub fn with_defaults(network: &NetworkSection) -> Result<Self> {
        let http = Arc::new(HttpTransport::new(
            Duration::from_secs(network.timeout_secs),
            network.retries,
        )?);

        let mut registry = Self::empty();
        for scheme in ["http", "https"] {
            let http = Arc::clone(&http);
            registry.register(scheme, move |url| http.fetch(url));
        }
        registry.register("file", fetch_file);
        Ok(registry)
    }

    /// Register (or replace) the handler for `scheme`
    pub fn register<F>(&mut self, scheme: &str, handler: F)
    where
        F: Fn(&Url) -> Result<Vec<u8>> + Send + Sync + 'static,
    {
        self.handlers
            .insert(scheme.to_ascii_lowercase(), Arc::new(handler));
    }

    pub fn supports(&self, scheme: &str) -> bool {
        self.handlers.contains_key(&scheme.to_ascii_lowercase())
    }

    /// Fetch the full body behind `url`
    pub fn fetch(&self, url: &Url) -> Result<Vec<u8>> {
        let handler = self
            .handlers
            .get(url.scheme())
            .ok_or_else(|| Error::NoHandler {
                scheme: url.scheme().to_string(),
                url: url.to_string(),
            })?;
        debug!("Fetching {}", url);
        handler(url)
    }

    /// Parse then fetch
    pub fn fetch_str(&self, url: &str) -> Result<Vec<u8>> {
        self.fetch(&parse_url(url)?)
    }
}

/// Parse a URL string, reporting failures as fetch errors for that URL
pub fn parse_url(url: &str) -> Result<Url> {
    Url::parse(url).map_err(|e| Error::NetworkFetch {
        url: url.to_string(),
        reason: format!("invalid URL: {e}"),
    })
}

/// Blocking HTTP client with bounded retry on transport errors
pub struct HttpTransport {
    client: Client,
    max_retries: u32,
}

impl HttpTransport {
    pub fn new(timeout: Duration, max_retries: u32) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Config(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            max_retries: max_retries.max(1),
        })
    }

    /// GET `url`; HTTP error statuses fail immediately, connection errors retry
    pub fn fetch(&self, url: &Url) -> Result<Vec<u8>> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.client.get(url.as_str()).send() {
                Ok(response) => {
                    if !response.status().is_success() {
                        return Err(Error::NetworkFetch {
                            url: url.to_string(),
                            reason: format!("HTTP {}", response.status()),
                        });
                    }

                    let bytes = response.bytes().map_err(|e| Error::NetworkFetch {
                        url: url.to_string(),
                        reason: format!("failed to read response: {e}"),
                    })?;
                    return Ok(bytes.to_vec());
                }
                Err(e) => {
                    if attempt >= self.max_retries {
                        return Err(Error::NetworkFetch {
                            url: url.to_string(),
                            reason: format!("failed after {attempt} attempts: {e}"),
                        });
                    }
                    warn!("Fetch attempt {} for {} failed: {}, retrying...", attempt, url, e);
                    std::thread::sleep(Duration::from_millis(RETRY_DELAY_MS * attempt as u64));
                }
            }
        }
    }
}

/// Read a `file://` URL from the local filesystem
fn fetch_file(url: &Url) -> Result<Vec<u8>> {
    let path = url.to_file_path().map_err(|_| Error::NetworkFetch {
        url: url.to_string(),
        reason: "not a local file path".to_string(),
    })?;
    std::fs::read(&path).map_err(|e| Error::NetworkFetch {
        url: url.to_string(),
        reason: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_unknown_scheme_is_no_handler() {
        let registry = TransportRegistry::empty();
        let err = registry.fetch_str("gopher://example.org/repo.json.gz").unwrap_err();
        match err {
            Error::NoHandler { scheme, url } => {
                assert_eq!(scheme, "gopher");
                assert!(url.contains("example.org"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_file_scheme_reads_local_files() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("payload.bin");
        std::fs::write(&path, b"hello").unwrap();

        let registry = TransportRegistry::with_defaults(&NetworkSection::default()).unwrap();
        let url = Url::from_file_path(&path).unwrap();
        assert_eq!(registry.fetch(&url).unwrap(), b"hello");

        let missing = Url::from_file_path(dir.path().join("nope")).unwrap();
        assert!(matches!(
            registry.fetch(&missing),
            Err(Error::NetworkFetch { .. })
        ));
    }

    #[test]
    fn test_registered_handler_overrides() {
        let mut registry = TransportRegistry::empty();
        registry.register("mem", |url| Ok(url.path().as_bytes().to_vec()));
        assert!(registry.supports("MEM"));
        assert_eq!(registry.fetch_str("mem:/a/b").unwrap(), b"/a/b");
    }
}
