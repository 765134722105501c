//! HTTP access to SDK listings and archives.
//!
//! [`HttpLoader`] streams archives to disk with progress reporting and
//! honours the proxy, TLS and timeout settings. The cache only talks to it
//! through the [`ArchiveSource`] trait.

use async_trait::async_trait;
use futures::StreamExt;
use glob::{MatchOptions, Pattern};
use reqwest::header::{HeaderMap, ACCEPT};
use reqwest::{Client, Proxy};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};
use url::Url;

use crate::error::{GoSdkError, Result};

/// Response headers returned by a download.
pub type ResponseHeaders = HeaderMap;

/// MIME types accepted for SDK archives.
pub const SDK_ARCHIVE_MIMES: &[&str] = &[
    "application/octet-stream",
    "application/zip",
    "application/x-tar",
    "application/x-gzip",
];

/// MIME types accepted for SDK listings.
pub const SDK_INDEX_MIMES: &[&str] = &["application/xml", "text/plain", "application/json", "text/html"];

/// Default connection timeout.
pub const DEFAULT_CONNECTION_TIMEOUT: Duration = Duration::from_secs(60);

// ============================================================================
// Proxy
// ============================================================================

/// Outbound proxy configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ProxySettings {
    /// Proxy scheme, `http` unless overridden.
    pub protocol: String,
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    /// `|`-separated host patterns that bypass the proxy, e.g. `localhost|*.corp`.
    pub non_proxy_hosts: Option<String>,
}

impl Default for ProxySettings {
    fn default() -> Self {
        Self {
            protocol: "http".to_string(),
            host: String::new(),
            port: 8080,
            username: None,
            password: None,
            non_proxy_hosts: None,
        }
    }
}

impl ProxySettings {
    /// URL of the proxy itself.
    pub fn url(&self) -> Result<Url> {
        let text = format!("{}://{}:{}", self.protocol.trim(), self.host.trim(), self.port);
        Url::parse(&text).map_err(|e| GoSdkError::Config(format!("Invalid proxy {}: {}", text, e)))
    }

    /// Host patterns that bypass the proxy.
    ///
    /// Only `*` and `?` are wildcards; every other character is literal.
    pub fn bypass_patterns(&self) -> Vec<Pattern> {
        self.non_proxy_hosts
            .as_deref()
            .unwrap_or_default()
            .split('|')
            .map(str::trim)
            .filter(|pattern| !pattern.is_empty())
            .filter_map(host_pattern)
            .collect()
    }

    fn to_reqwest(&self) -> Result<Proxy> {
        let proxy_url = self.url()?;
        let bypass = self.bypass_patterns();
        let mut proxy = Proxy::custom(move |target: &Url| {
            let host = target.host_str()?;
            if bypasses(&bypass, host) {
                None
            } else {
                Some(proxy_url.clone())
            }
        });
        if let Some(username) = self.username.as_deref().filter(|u| !u.is_empty()) {
            proxy = proxy.basic_auth(username, self.password.as_deref().unwrap_or_default());
        }
        Ok(proxy)
    }
}

const HOST_MATCH: MatchOptions = MatchOptions {
    case_sensitive: false,
    require_literal_separator: false,
    require_literal_leading_dot: false,
};

fn host_pattern(text: &str) -> Option<Pattern> {
    let escaped: String = text
        .chars()
        .map(|c| match c {
            '*' | '?' => c.to_string(),
            _ => Pattern::escape(c.encode_utf8(&mut [0u8; 4])),
        })
        .collect();
    Pattern::new(&escaped).ok()
}

fn bypasses(patterns: &[Pattern], host: &str) -> bool {
    patterns
        .iter()
        .any(|pattern| pattern.matches_with(host, HOST_MATCH))
}

// ============================================================================
// Download Progress
// ============================================================================

/// Progress information during a download.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadProgress {
    /// Bytes downloaded so far.
    pub bytes_downloaded: u64,
    /// Total bytes expected (if known from Content-Length header).
    pub total_bytes: Option<u64>,
    /// Whole percent, or None if the total is unknown.
    pub percent: Option<u8>,
}

impl DownloadProgress {
    fn new(bytes_downloaded: u64, total_bytes: Option<u64>) -> Self {
        let percent = total_bytes.map(|total| {
            if total > 0 {
                (bytes_downloaded.saturating_mul(100) / total).min(100) as u8
            } else {
                0
            }
        });

        Self {
            bytes_downloaded,
            total_bytes,
            percent,
        }
    }

    fn completed(bytes_downloaded: u64, total_bytes: Option<u64>) -> Self {
        Self {
            bytes_downloaded,
            total_bytes: total_bytes.or(Some(bytes_downloaded)),
            percent: Some(100),
        }
    }
}

/// Throttles progress reports to whole-percent changes.
///
/// The 100% report is held back for [`ProgressThrottle::finish`] so it is
/// emitted exactly once.
#[derive(Debug, Default)]
struct ProgressThrottle {
    last_percent: Option<u8>,
}

impl ProgressThrottle {
    fn update(&mut self, bytes: u64, total: Option<u64>) -> Option<DownloadProgress> {
        let progress = DownloadProgress::new(bytes, total);
        match progress.percent {
            None => Some(progress),
            Some(100) => None,
            Some(percent) if self.last_percent == Some(percent) => None,
            Some(percent) => {
                self.last_percent = Some(percent);
                Some(progress)
            }
        }
    }

    fn finish(&self, bytes: u64, total: Option<u64>) -> DownloadProgress {
        DownloadProgress::completed(bytes, total)
    }
}

// ============================================================================
// Archive Source
// ============================================================================

/// Anything that can serve SDK listings and archives.
#[async_trait]
pub trait ArchiveSource: Send + Sync {
    /// Fetches a text resource, sending `Accept` built from `accepted_mime_types`.
    async fn get_text(&self, url: &str, accepted_mime_types: &[&str]) -> Result<String>;

    /// Streams a resource into `dest` and returns the response headers.
    async fn download(
        &self,
        url: &str,
        dest: &Path,
        on_progress: &(dyn Fn(DownloadProgress) + Send + Sync),
    ) -> Result<ResponseHeaders>;
}

// ============================================================================
// HTTP Loader
// ============================================================================

/// Options for building an [`HttpLoader`].
#[derive(Debug, Clone)]
pub struct HttpOptions {
    pub connection_timeout: Duration,
    pub disable_ssl_check: bool,
    pub proxy: Option<ProxySettings>,
}

impl Default for HttpOptions {
    fn default() -> Self {
        Self {
            connection_timeout: DEFAULT_CONNECTION_TIMEOUT,
            disable_ssl_check: false,
            proxy: None,
        }
    }
}

/// reqwest-backed [`ArchiveSource`].
///
/// Holds a verifying client and one that accepts any certificate; the
/// options decide which one serves requests.
pub struct HttpLoader {
    secure: Client,
    insecure: Client,
    disable_ssl_check: bool,
}

impl HttpLoader {
    /// Builds both clients.
    ///
    /// # Errors
    ///
    /// Returns [`GoSdkError::Config`] for an invalid proxy or if the TLS
    /// backend cannot be initialized.
    pub fn new(options: &HttpOptions) -> Result<Self> {
        Ok(Self {
            secure: build_client(options, false)?,
            insecure: build_client(options, true)?,
            disable_ssl_check: options.disable_ssl_check,
        })
    }

    fn client(&self) -> &Client {
        if self.disable_ssl_check {
            &self.insecure
        } else {
            &self.secure
        }
    }
}

fn build_client(options: &HttpOptions, accept_invalid_certs: bool) -> Result<Client> {
    let mut builder = Client::builder()
        .user_agent(format!("gosdk-wrapper/{}", crate::VERSION))
        .connect_timeout(options.connection_timeout)
        .danger_accept_invalid_certs(accept_invalid_certs);

    if let Some(proxy) = &options.proxy {
        builder = builder.proxy(proxy.to_reqwest()?);
    }

    builder
        .build()
        .map_err(|e| GoSdkError::Config(format!("Can't build HTTP client: {}", e)))
}

fn accept_header(accepted_mime_types: &[&str]) -> String {
    if accepted_mime_types.is_empty() {
        "*/*".to_string()
    } else {
        accepted_mime_types.join(", ")
    }
}

fn check_status(url: &str, response: &reqwest::Response) -> Result<()> {
    let status = response.status();
    if status.is_success() {
        return Ok(());
    }
    Err(GoSdkError::DownloadFailed {
        url: url.to_string(),
        status: Some(status.as_u16()),
        reason: format!(
            "status {}: {}",
            status.as_u16(),
            status.canonical_reason().unwrap_or("Unknown error")
        ),
    })
}

#[async_trait]
impl ArchiveSource for HttpLoader {
    async fn get_text(&self, url: &str, accepted_mime_types: &[&str]) -> Result<String> {
        debug!("GET {}", url);
        let response = self
            .client()
            .get(url)
            .header(ACCEPT, accept_header(accepted_mime_types))
            .send()
            .await
            .map_err(|e| GoSdkError::download(url, e))?;
        check_status(url, &response)?;
        response.text().await.map_err(|e| GoSdkError::download(url, e))
    }

    async fn download(
        &self,
        url: &str,
        dest: &Path,
        on_progress: &(dyn Fn(DownloadProgress) + Send + Sync),
    ) -> Result<ResponseHeaders> {
        info!("Downloading {} to {}", url, dest.display());

        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| GoSdkError::io(parent, e))?;
        }

        let response = self
            .client()
            .get(url)
            .header(ACCEPT, accept_header(SDK_ARCHIVE_MIMES))
            .send()
            .await
            .map_err(|e| GoSdkError::download(url, e))?;
        check_status(url, &response)?;

        let headers = response.headers().clone();
        let total_bytes = response.content_length();
        debug!("Content-Length: {:?}", total_bytes);

        let result = stream_to_file(url, response, dest, total_bytes, on_progress).await;
        if result.is_err() {
            let _ = tokio::fs::remove_file(dest).await;
        }
        let bytes_downloaded = result?;

        info!(
            "Download complete: {} bytes written to {}",
            bytes_downloaded,
            dest.display()
        );
        Ok(headers)
    }
}

async fn stream_to_file(
    url: &str,
    response: reqwest::Response,
    dest: &Path,
    total_bytes: Option<u64>,
    on_progress: &(dyn Fn(DownloadProgress) + Send + Sync),
) -> Result<u64> {
    let mut file = File::create(dest)
        .await
        .map_err(|e| GoSdkError::io(dest, e))?;

    let mut stream = response.bytes_stream();
    let mut bytes_downloaded: u64 = 0;
    let mut throttle = ProgressThrottle::default();

    while let Some(chunk_result) = stream.next().await {
        let chunk = chunk_result.map_err(|e| GoSdkError::download(url, e))?;
        file.write_all(&chunk)
            .await
            .map_err(|e| GoSdkError::io(dest, e))?;

        bytes_downloaded += chunk.len() as u64;
        if let Some(progress) = throttle.update(bytes_downloaded, total_bytes) {
            on_progress(progress);
        }
    }

    file.flush().await.map_err(|e| GoSdkError::io(dest, e))?;
    on_progress(throttle.finish(bytes_downloaded, total_bytes));
    Ok(bytes_downloaded)
}
