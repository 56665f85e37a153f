use async_trait::async_trait;
use futures::StreamExt;
use reqwest::{Client, StatusCode};
use tracing::{debug, info, instrument, warn};

use super::transport::{FetchRequest, ResponseInfo, TransferSender, Transport};
use crate::{DownloadError, DownloaderConfig};

/// Create a reqwest Client with the provided configuration
pub fn create_client(config: &DownloaderConfig) -> Result<Client, DownloadError> {
    let mut client_builder = Client::builder()
        .pool_max_idle_per_host(2)
        .user_agent(&config.user_agent)
        .default_headers(config.headers.clone())
        .use_rustls_tls()
        .redirect(if config.follow_redirects {
            reqwest::redirect::Policy::limited(10)
        } else {
            reqwest::redirect::Policy::none()
        });

    if !config.timeout.is_zero() {
        client_builder = client_builder.timeout(config.timeout);
    }

    if !config.connect_timeout.is_zero() {
        client_builder = client_builder.connect_timeout(config.connect_timeout);
    }

    if !config.read_timeout.is_zero() {
        client_builder = client_builder.pool_idle_timeout(config.read_timeout);
    }

    if config.use_system_proxy {
        // reqwest picks up system proxy settings unless told otherwise
        debug!("Using system proxy settings for downloads");
    } else {
        client_builder = client_builder.no_proxy();
        debug!("Proxy disabled for downloads");
    }

    client_builder.build().map_err(DownloadError::from)
}

/// Streaming GET over reqwest, with an optional open-ended `Range`.
///
/// No conditional header (`If-Range`) is sent on resume even when a validator
/// is known.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
}

impl HttpTransport {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    pub fn with_config(config: &DownloaderConfig) -> Result<Self, DownloadError> {
        Ok(Self::new(create_client(config)?))
    }
}

#[async_trait]
impl Transport for HttpTransport {
    #[instrument(skip(self, sender), fields(transfer = %sender.transfer()), level = "debug")]
    async fn fetch(
        &self,
        request: FetchRequest,
        sender: &mut TransferSender,
    ) -> Result<(), DownloadError> {
        let mut builder = self.client.get(request.url.clone());
        if let Some(range) = request.range_header() {
            builder = builder.header(reqwest::header::RANGE, range);
        }

        info!(url = %request.url, range_start = ?request.range_start, "Starting download request");
        let response = builder.send().await?;
        let status = response.status();

        if !status.is_success() {
            return Err(DownloadError::StatusCode(status));
        }

        // a 200 answer to a range request would restart the bytes at zero
        if request.range_start.is_some_and(|start| start > 0) && status != StatusCode::PARTIAL_CONTENT {
            warn!(url = %request.url, %status, "Server ignored the range request");
            return Err(DownloadError::RangeIgnored);
        }

        let info = ResponseInfo::from_headers(status, response.headers(), response.content_length());
        debug!(
            url = %request.url,
            content_length = ?info.content_length,
            total_size = ?info.total_size,
            accept_ranges = ?info.accept_ranges,
            "Response headers received"
        );
        sender.response(info)?;

        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            if chunk.is_empty() {
                continue;
            }
            sender.chunk(chunk).await?;
        }

        debug!(url = %request.url, "Response body finished");
        Ok(())
    }
}
