//! HTTP GET and download-to-disk, with uniform request logging.

use std::path::Path;

use async_trait::async_trait;
use bytes::Bytes;

/// Performs outbound HTTP GETs. The production implementation is
/// [`HttpFetcher`]; tests substitute recording doubles.
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> anyhow::Result<Bytes>;
}

pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new() -> HttpFetcher {
        HttpFetcher {
            client: reqwest::Client::new(),
        }
    }
}

impl Default for HttpFetcher {
    fn default() -> Self {
        HttpFetcher::new()
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> anyhow::Result<Bytes> {
        let response = self.client.get(url).send().await?.error_for_status()?;
        Ok(response.bytes().await?)
    }
}

/// Fetches `url`, logging `STARTED`/`SUCCESS`/`FAILURE` around the request.
pub async fn get_page(fetcher: &dyn Fetcher, url: &str) -> anyhow::Result<Bytes> {
    let description = format!("Request {}", url);
    log::info!("STARTED: {}", description);

    match fetcher.fetch(url).await {
        Ok(body) => {
            log::info!("SUCCESS: {}", description);
            Ok(body)
        }
        Err(err) => {
            log::error!("FAILURE: {}: {}.", description, err);
            Err(err)
        }
    }
}

/// Fetches `url` and writes the body to `dest`, with the same logging
/// contract as [`get_page`]. The resolved filename is part of the log line.
pub async fn download_page(fetcher: &dyn Fetcher, url: &str, dest: &Path) -> anyhow::Result<()> {
    let basename = dest
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| dest.display().to_string());
    let description = format!("Download {} -> {}", url, basename);
    log::info!("STARTED: {}", description);

    let result: anyhow::Result<()> = async {
        let body = fetcher.fetch(url).await?;
        tokio::fs::write(dest, &body).await?;
        Ok(())
    }
    .await;

    match &result {
        Ok(()) => log::info!("SUCCESS: {}", description),
        Err(err) => log::error!("FAILURE: {}: {}.", description, err),
    }

    result
}
