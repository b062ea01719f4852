//! HTTP client wrapper for catalog requests and artifact downloads.
//!
//! Bodies are streamed to a uniquely named `.part` file next to the
//! destination and only renamed into place once fully written and synced. A
//! failed, cancelled or interrupted transfer drops the temporary file, so a
//! truncated artifact is never observable at its final path.

use std::path::Path;
use std::time::Duration;

use futures_util::{Stream, StreamExt};
use reqwest::Client;
use reqwest::header::RETRY_AFTER;
use tempfile::NamedTempFile;
use tokio::fs::File;
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};
use url::Url;

use super::constants::{CONNECT_TIMEOUT_SECS, READ_TIMEOUT_SECS, default_user_agent};
use super::error::DownloadError;

/// HTTP client shared by the harvester, metadata lookups and the pipeline.
///
/// Create once and clone freely; clones share the connection pool.
#[derive(Debug, Clone)]
pub struct HttpClient {
    client: Client,
}

impl Default for HttpClient {
    fn default() -> Self {
        Self::new()
    }
}

impl HttpClient {
    /// Creates a client with default timeouts (30s connect, 5min read).
    ///
    /// # Panics
    ///
    /// Panics if the HTTP client builder fails with the static configuration.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn new() -> Self {
        Self::try_new_with_timeouts(CONNECT_TIMEOUT_SECS, READ_TIMEOUT_SECS)
            .expect("failed to build HTTP client with static configuration")
    }

    /// Creates a client with explicit timeouts.
    ///
    /// # Errors
    ///
    /// Returns the builder error if TLS initialisation fails.
    pub fn try_new_with_timeouts(
        connect_timeout_secs: u64,
        read_timeout_secs: u64,
    ) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(connect_timeout_secs))
            .timeout(Duration::from_secs(read_timeout_secs))
            .gzip(true)
            .user_agent(default_user_agent())
            .build()?;
        Ok(Self { client })
    }

    /// Sends a GET and returns the response if its status is a success.
    ///
    /// # Errors
    ///
    /// Returns [`DownloadError::InvalidUrl`] for malformed URLs,
    /// [`DownloadError::HttpStatus`] (with any `Retry-After`) for non-2xx
    /// responses, and network/timeout errors otherwise.
    #[instrument(level = "debug", skip(self), fields(url = %url))]
    pub async fn get(&self, url: &str) -> Result<reqwest::Response, DownloadError> {
        Url::parse(url).map_err(|_| DownloadError::invalid_url(url))?;

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| DownloadError::network(url, e))?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = response
                .headers()
                .get(RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .map(ToString::to_string);
            debug!(status = status.as_u16(), ?retry_after, "non-success response");
            return Err(DownloadError::http_status_with_retry_after(
                url,
                status.as_u16(),
                retry_after,
            ));
        }

        Ok(response)
    }

    /// Fetches a response body as text.
    ///
    /// # Errors
    ///
    /// See [`get`](Self::get); body read failures map to network errors.
    pub async fn get_text(&self, url: &str) -> Result<String, DownloadError> {
        self.get(url)
            .await?
            .text()
            .await
            .map_err(|e| DownloadError::network(url, e))
    }

    /// Streams `url` to `dest`, revealing the file only when complete.
    ///
    /// Returns the number of bytes written.
    ///
    /// # Errors
    ///
    /// Returns any request, stream or IO error, or
    /// [`DownloadError::Cancelled`]. `dest` is untouched on error.
    #[instrument(skip(self, cancel), fields(url = %url, dest = %dest.display()))]
    pub async fn download_to_path(
        &self,
        url: &str,
        dest: &Path,
        cancel: &CancellationToken,
    ) -> Result<u64, DownloadError> {
        let response = self.get_cancellable(url, cancel).await?;
        let bytes =
            stream_to_path(body_stream(response, url.to_string()), dest, url, cancel).await?;
        info!(bytes, "download complete");
        Ok(bytes)
    }

    /// Streams `url` into an anonymous temporary file inside `dir`.
    ///
    /// The file is deleted when the returned handle drops unless persisted.
    ///
    /// # Errors
    ///
    /// Returns any request, stream or IO error, or [`DownloadError::Cancelled`].
    #[instrument(skip(self, cancel), fields(url = %url, dir = %dir.display()))]
    pub async fn download_to_temp(
        &self,
        url: &str,
        dir: &Path,
        cancel: &CancellationToken,
    ) -> Result<(NamedTempFile, u64), DownloadError> {
        let response = self.get_cancellable(url, cancel).await?;
        let (temp, bytes) =
            stream_to_temp(body_stream(response, url.to_string()), dir, url, cancel).await?;
        debug!(bytes, path = %temp.path().display(), "staged download");
        Ok((temp, bytes))
    }

    async fn get_cancellable(
        &self,
        url: &str,
        cancel: &CancellationToken,
    ) -> Result<reqwest::Response, DownloadError> {
        tokio::select! {
            biased;
            () = cancel.cancelled() => Err(DownloadError::cancelled(url)),
            response = self.get(url) => response,
        }
    }

    /// Returns the underlying reqwest client.
    #[must_use]
    pub fn inner(&self) -> &Client {
        &self.client
    }
}

fn body_stream(
    response: reqwest::Response,
    url: String,
) -> impl Stream<Item = Result<impl AsRef<[u8]>, DownloadError>> {
    response
        .bytes_stream()
        .map(move |chunk| chunk.map_err(|e| DownloadError::network(url.as_str(), e)))
}

/// Writes `stream` to `dest` through a temporary sibling file and an atomic rename.
///
/// Concurrent writers to the same destination each use their own temporary
/// file; the last rename wins and the destination is never partially written.
pub(crate) async fn stream_to_path<S, B>(
    stream: S,
    dest: &Path,
    url: &str,
    cancel: &CancellationToken,
) -> Result<u64, DownloadError>
where
    S: Stream<Item = Result<B, DownloadError>>,
    B: AsRef<[u8]>,
{
    let parent = dest.parent().ok_or_else(|| {
        DownloadError::io(
            dest,
            std::io::Error::new(std::io::ErrorKind::InvalidInput, "destination has no parent"),
        )
    })?;
    tokio::fs::create_dir_all(parent)
        .await
        .map_err(|e| DownloadError::io(parent, e))?;

    let (temp, bytes) = stream_to_temp(stream, parent, url, cancel).await?;
    temp.persist(dest)
        .map_err(|e| DownloadError::io(dest, e.error))?;
    Ok(bytes)
}

/// Writes `stream` into a new temporary file in `dir`.
pub(crate) async fn stream_to_temp<S, B>(
    stream: S,
    dir: &Path,
    url: &str,
    cancel: &CancellationToken,
) -> Result<(NamedTempFile, u64), DownloadError>
where
    S: Stream<Item = Result<B, DownloadError>>,
    B: AsRef<[u8]>,
{
    let temp = tempfile::Builder::new()
        .prefix(".download-")
        .suffix(".part")
        .tempfile_in(dir)
        .map_err(|e| DownloadError::io(dir, e))?;
    let handle = temp
        .reopen()
        .map_err(|e| DownloadError::io(temp.path(), e))?;

    // On error `temp` drops here and removes the partial file.
    let bytes = write_stream(stream, File::from_std(handle), temp.path(), url, cancel).await?;
    Ok((temp, bytes))
}

async fn write_stream<S, B>(
    stream: S,
    file: File,
    path: &Path,
    url: &str,
    cancel: &CancellationToken,
) -> Result<u64, DownloadError>
where
    S: Stream<Item = Result<B, DownloadError>>,
    B: AsRef<[u8]>,
{
    let mut stream = std::pin::pin!(stream);
    let mut writer = BufWriter::new(file);
    let mut bytes_written: u64 = 0;

    loop {
        let next = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(DownloadError::cancelled(url)),
            next = stream.next() => next,
        };
        let Some(chunk) = next else {
            break;
        };
        let chunk = chunk?;
        let chunk = chunk.as_ref();
        writer
            .write_all(chunk)
            .await
            .map_err(|e| DownloadError::io(path, e))?;
        bytes_written += chunk.len() as u64;
    }

    writer.flush().await.map_err(|e| DownloadError::io(path, e))?;
    writer
        .get_ref()
        .sync_all()
        .await
        .map_err(|e| DownloadError::io(path, e))?;

    Ok(bytes_written)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    use futures_util::stream;
    use tempfile::TempDir;
    use wiremock::matchers::{header_exists, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn dir_entries(dir: &Path) -> Vec<String> {
        let mut names: Vec<String> = std::fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }

    #[tokio::test]
    async fn test_download_to_path_success() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/pdf/2301.00001"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"%PDF-1.5 body".to_vec()))
            .mount(&server)
            .await;

        let temp_dir = TempDir::new().unwrap();
        let dest = temp_dir.path().join("2301").join("2301.00001.pdf");
        let client = HttpClient::new();
        let url = format!("{}/pdf/2301.00001", server.uri());

        let bytes = client
            .download_to_path(&url, &dest, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(bytes, 13);
        assert_eq!(std::fs::read(&dest).unwrap(), b"%PDF-1.5 body");
        assert_eq!(
            dir_entries(dest.parent().unwrap()),
            vec!["2301.00001.pdf".to_string()],
            "no temporary files may remain"
        );
    }

    #[tokio::test]
    async fn test_download_404_leaves_nothing() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/pdf/2301.00001"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let temp_dir = TempDir::new().unwrap();
        let dest = temp_dir.path().join("2301.00001.pdf");
        let url = format!("{}/pdf/2301.00001", server.uri());

        let err = HttpClient::new()
            .download_to_path(&url, &dest, &CancellationToken::new())
            .await
            .unwrap_err();

        assert_eq!(err.status(), Some(404));
        assert!(!dest.exists());
    }

    #[tokio::test]
    async fn test_get_captures_retry_after() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/oai2"))
            .respond_with(ResponseTemplate::new(503).insert_header("Retry-After", "7"))
            .mount(&server)
            .await;

        let url = format!("{}/oai2", server.uri());
        let err = HttpClient::new().get(&url).await.unwrap_err();

        assert_eq!(err.status(), Some(503));
        assert_eq!(err.retry_after(), Some("7"));
    }

    #[tokio::test]
    async fn test_get_sends_user_agent() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/query"))
            .and(header_exists("user-agent"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<feed/>"))
            .expect(1)
            .mount(&server)
            .await;

        let url = format!("{}/api/query", server.uri());
        let text = HttpClient::new().get_text(&url).await.unwrap();
        assert_eq!(text, "<feed/>");
    }

    #[test]
    fn test_invalid_url_rejected() {
        let temp_dir = TempDir::new().unwrap();
        let client = HttpClient::new();
        let result = tokio_test::block_on(client.download_to_path(
            "not a url",
            &temp_dir.path().join("out.pdf"),
            &CancellationToken::new(),
        ));
        assert!(matches!(result, Err(DownloadError::InvalidUrl { .. })));
        assert_eq!(std::fs::read_dir(temp_dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_mid_stream_failure_leaves_no_partial_file() {
        let temp_dir = TempDir::new().unwrap();
        let dest = temp_dir.path().join("2301.00001.pdf");
        let chunks: Vec<Result<Vec<u8>, DownloadError>> = vec![
            Ok(b"%PDF-1.5 first half".to_vec()),
            Err(DownloadError::timeout("https://arxiv.org/pdf/2301.00001")),
        ];

        let err = stream_to_path(
            stream::iter(chunks),
            &dest,
            "https://arxiv.org/pdf/2301.00001",
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();

        assert!(matches!(err, DownloadError::Timeout { .. }));
        assert!(!dest.exists());
        assert!(dir_entries(temp_dir.path()).is_empty());
    }

    #[tokio::test]
    async fn test_cancelled_stream_leaves_no_partial_file() {
        let temp_dir = TempDir::new().unwrap();
        let dest = temp_dir.path().join("2301.00001.pdf");
        let cancel = CancellationToken::new();
        cancel.cancel();
        let chunks: Vec<Result<Vec<u8>, DownloadError>> = vec![Ok(b"data".to_vec())];

        let err = stream_to_path(stream::iter(chunks), &dest, "u", &cancel)
            .await
            .unwrap_err();

        assert!(err.is_cancelled());
        assert!(dir_entries(temp_dir.path()).is_empty());
    }

    #[tokio::test]
    async fn test_stream_to_path_replaces_existing_file_atomically() {
        let temp_dir = TempDir::new().unwrap();
        let dest = temp_dir.path().join("a.pdf");
        std::fs::write(&dest, b"old").unwrap();
        let chunks: Vec<Result<&[u8], DownloadError>> = vec![Ok(b"new ".as_slice()), Ok(b"body")];

        stream_to_path(stream::iter(chunks), &dest, "u", &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(std::fs::read(&dest).unwrap(), b"new body");
    }
}
