use anyhow::Result;
use encoding_rs::Encoding;
use futures::StreamExt;
use lazy_static::lazy_static;
use mime::Mime;
use regex::Regex;
use reqwest::{Client, ClientBuilder, Response, StatusCode};
use std::fs;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Browser-like User-Agent; some CDNs refuse the default reqwest one.
pub const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36";

/// Timeout for the top-level page request.
pub const PAGE_TIMEOUT: Duration = Duration::from_secs(30);
/// Timeout for every subsidiary CSS/image request.
pub const SUBRESOURCE_TIMEOUT: Duration = Duration::from_secs(10);

const DOWNLOAD_CHUNK_BYTES: usize = 8 * 1024;

lazy_static! {
    static ref META_CHARSET_RE: Regex =
        Regex::new(r#"(?i)charset\s*=\s*["']?([a-zA-Z0-9._:-]+)"#).unwrap();
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request for {url} failed: {source}")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("{url} returned HTTP {status}")]
    Status { url: String, status: StatusCode },
    #[error("failed to write {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Thin wrapper around one reqwest client shared by every request of a run.
/// The cookie store is enabled so subresource fetches reuse whatever cookies
/// the page response set.
pub struct Fetcher {
    client: Client,
}

impl Fetcher {
    pub fn new() -> Result<Self> {
        let client = ClientBuilder::new()
            .use_rustls_tls()
            .cookie_store(true)
            .user_agent(USER_AGENT)
            .build()?;

        Ok(Self { client })
    }

    /// Fetch the target page itself and decode it to text. Any transport
    /// error or non-success status is fatal for the whole run.
    pub async fn fetch_page(&self, url: &url::Url) -> Result<String, FetchError> {
        let response = self.send(url, PAGE_TIMEOUT).await?;
        let content_type = header_content_type(&response);
        let bytes = response
            .bytes()
            .await
            .map_err(|source| FetchError::Request {
                url: url.to_string(),
                source,
            })?;

        Ok(decode_body(&bytes, content_type.as_deref()))
    }

    /// Fetch a subsidiary text resource (a linked stylesheet). Failures are
    /// returned to the caller, which decides whether to swallow them.
    pub async fn fetch_text(&self, url: &url::Url) -> Result<String, FetchError> {
        let response = self.send(url, SUBRESOURCE_TIMEOUT).await?;
        let content_type = header_content_type(&response);
        let bytes = response
            .bytes()
            .await
            .map_err(|source| FetchError::Request {
                url: url.to_string(),
                source,
            })?;

        Ok(decode_body(&bytes, content_type.as_deref()))
    }

    /// Stream a binary resource to `dest`, returning the number of bytes
    /// written. A partially written file is removed on failure.
    pub async fn download(&self, url: &url::Url, dest: &Path) -> Result<u64, FetchError> {
        let response = self.send(url, SUBRESOURCE_TIMEOUT).await?;

        let result = write_body(response, url, dest).await;
        if result.is_err() {
            let _ = fs::remove_file(dest);
        }
        result
    }

    async fn send(&self, url: &url::Url, timeout: Duration) -> Result<Response, FetchError> {
        let response = self
            .client
            .get(url.as_str())
            .timeout(timeout)
            .send()
            .await
            .map_err(|source| FetchError::Request {
                url: url.to_string(),
                source,
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                url: url.to_string(),
                status,
            });
        }

        Ok(response)
    }
}

async fn write_body(response: Response, url: &url::Url, dest: &Path) -> Result<u64, FetchError> {
    let io_error = |source| FetchError::Io {
        path: dest.to_path_buf(),
        source,
    };

    let file = fs::File::create(dest).map_err(io_error)?;
    let mut writer = BufWriter::with_capacity(DOWNLOAD_CHUNK_BYTES, file);
    let mut stream = response.bytes_stream();
    let mut written = 0u64;

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|source| FetchError::Request {
            url: url.to_string(),
            source,
        })?;
        writer.write_all(&chunk).map_err(io_error)?;
        written += chunk.len() as u64;
    }

    writer.flush().map_err(io_error)?;
    Ok(written)
}

fn header_content_type(response: &Response) -> Option<String> {
    response
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .map(str::to_owned)
}

/// Decode a response body to text: the declared Content-Type charset wins,
/// then a `<meta charset>` sniffed from the body prefix, then lossy UTF-8.
fn decode_body(bytes: &[u8], content_type: Option<&str>) -> String {
    if let Some(label) = declared_charset(content_type) {
        if let Some(encoding) = Encoding::for_label(label.as_bytes()) {
            let (decoded, _, _) = encoding.decode(bytes);
            return decoded.into_owned();
        }
    }

    if let Some(label) = sniff_meta_charset(bytes) {
        if let Some(encoding) = Encoding::for_label(label.as_bytes()) {
            let (decoded, _, _) = encoding.decode(bytes);
            return decoded.into_owned();
        }
    }

    String::from_utf8_lossy(bytes).into_owned()
}

fn declared_charset(content_type: Option<&str>) -> Option<String> {
    let mime: Mime = content_type?.parse().ok()?;
    mime.get_param(mime::CHARSET)
        .map(|charset| charset.as_str().to_owned())
}

fn sniff_meta_charset(bytes: &[u8]) -> Option<String> {
    let prefix = String::from_utf8_lossy(&bytes[..bytes.len().min(1024)]);
    META_CHARSET_RE
        .captures(&prefix)
        .map(|caps| caps[1].to_owned())
}
