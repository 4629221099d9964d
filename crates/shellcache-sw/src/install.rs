//! Install: pre-cache the application shell.

use std::sync::Arc;

use futures::future::try_join_all;
use http::StatusCode;
use shellcache_net::{Fetcher, Request, Response};
use tracing::{info, warn};

use crate::cache::CacheStorage;
use crate::config::PolicyConfig;
use crate::{Result, ServiceWorkerError};

/// Populates the shell bucket from the asset manifest.
pub struct Installer {
    config: Arc<PolicyConfig>,
    storage: Arc<dyn CacheStorage>,
    fetcher: Arc<dyn Fetcher>,
}

impl Installer {
    pub fn new(
        config: Arc<PolicyConfig>,
        storage: Arc<dyn CacheStorage>,
        fetcher: Arc<dyn Fetcher>,
    ) -> Self {
        Self {
            config,
            storage,
            fetcher,
        }
    }

    /// Fetch every manifest asset and store them in the shell bucket.
    ///
    /// All-or-nothing: every asset is fetched before anything is written, so
    /// a single fetch failure leaves the bucket untouched. If a write fails
    /// partway, the bucket is deleted. Returns the number of assets cached.
    pub async fn precache(&self) -> Result<usize> {
        let urls = self.config.manifest_urls()?;
        let bucket = self.config.shell_cache_name();
        info!(bucket = %bucket, assets = urls.len(), "Pre-caching application shell");

        let fetched = try_join_all(urls.into_iter().map(|url| self.fetch_asset(Request::get(url))))
            .await?;

        let cache = self.storage.open(&bucket).await?;
        for (request, response) in &fetched {
            if let Err(e) = cache.put(request, response.clone()).await {
                warn!(url = %request.url, bucket = %bucket, error = %e, "Shell write failed, discarding bucket");
                if let Err(cleanup) = self.storage.delete(&bucket).await {
                    warn!(bucket = %bucket, error = %cleanup, "Failed to discard partial shell bucket");
                }
                return Err(e.into());
            }
        }

        info!(bucket = %bucket, assets = fetched.len(), "Application shell cached");
        Ok(fetched.len())
    }

    async fn fetch_asset(&self, request: Request) -> Result<(Request, Response)> {
        let response = match self.fetcher.fetch(&request).await {
            Ok(response) => response,
            Err(e) => {
                warn!(url = %request.url, error = %e, "Manifest asset fetch failed");
                return Err(ServiceWorkerError::InstallFailed {
                    url: request.url,
                    reason: e.to_string(),
                });
            }
        };

        if response.status != StatusCode::OK {
            warn!(url = %request.url, status = %response.status, "Manifest asset not cacheable");
            return Err(ServiceWorkerError::InstallFailed {
                url: request.url,
                reason: format!("unexpected status {}", response.status),
            });
        }

        Ok((request, response))
    }
}
