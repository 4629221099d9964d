//! Fetch interception: one handler per [`Strategy`].

use std::sync::Arc;

use http::{header, HeaderValue, StatusCode};
use shellcache_net::{Fetcher, Request, Response};
use tracing::{debug, trace, warn};

use crate::cache::{Cache, CacheError, CacheStorage, MatchOptions};
use crate::config::PolicyConfig;
use crate::event::{FetchEvent, FetchOutcome};
use crate::strategy::{classify, Strategy};
use crate::{Result, ServiceWorkerError};

/// 1×1 transparent GIF.
const PLACEHOLDER_GIF: &[u8] = &[
    0x47, 0x49, 0x46, 0x38, 0x39, 0x61, 0x01, 0x00, 0x01, 0x00, 0x80, 0x00, 0x00, 0x00, 0x00,
    0x00, 0xff, 0xff, 0xff, 0x21, 0xf9, 0x04, 0x01, 0x00, 0x00, 0x00, 0x00, 0x2c, 0x00, 0x00,
    0x00, 0x00, 0x01, 0x00, 0x01, 0x00, 0x00, 0x02, 0x01, 0x44, 0x00, 0x3b,
];

/// Response served in place of a poster image that could not be fetched.
pub fn placeholder_image() -> Response {
    Response::new(StatusCode::OK, PLACEHOLDER_GIF)
        .with_header(header::CONTENT_TYPE, HeaderValue::from_static("image/gif"))
        .with_header(header::CACHE_CONTROL, HeaderValue::from_static("no-store"))
}

/// Evict the oldest-inserted entries until at most `max_entries` remain.
/// Returns the number of entries evicted.
pub async fn trim_cache(cache: &dyn Cache, max_entries: usize) -> std::result::Result<usize, CacheError> {
    let keys = cache.keys().await?;
    if keys.len() <= max_entries {
        return Ok(0);
    }

    let excess = keys.len() - max_entries;
    let mut evicted = 0;
    for url in keys.into_iter().take(excess) {
        if cache.delete(&Request::get(url), MatchOptions::default()).await? {
            evicted += 1;
        }
    }
    Ok(evicted)
}

/// Applies the caching strategies to fetch events.
pub struct RequestInterceptor {
    config: Arc<PolicyConfig>,
    storage: Arc<dyn CacheStorage>,
    fetcher: Arc<dyn Fetcher>,
}

impl RequestInterceptor {
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

    /// Handle a fetch event.
    pub async fn handle(&self, event: &mut FetchEvent) -> Result<FetchOutcome> {
        let strategy = classify(&self.config, &event.request);
        trace!(url = %event.request.url, strategy = strategy.as_str(), "Classified request");

        let response = match strategy {
            Strategy::Bypass => return Ok(FetchOutcome::Passthrough),
            Strategy::RemoteImage => self.cache_first_with_trim(event).await,
            Strategy::Navigation => self.navigate(event).await?,
            Strategy::InScope => self.cache_first_then_store(event).await?,
            Strategy::Network => self.fetcher.fetch(&event.request).await?,
        };
        Ok(FetchOutcome::Respond(response))
    }

    async fn cache_first_with_trim(&self, event: &mut FetchEvent) -> Response {
        let bucket = self.config.image_cache_name();
        if let Some(hit) = self
            .lookup(&bucket, &event.request, MatchOptions::default())
            .await
        {
            return hit;
        }

        let response = match self.fetcher.fetch(&event.request).await {
            Ok(response) => response,
            Err(e) => {
                debug!(url = %event.request.url, error = %e, "Image fetch failed, serving placeholder");
                return placeholder_image();
            }
        };

        if response.status == StatusCode::OK {
            let storage = self.storage.clone();
            let request = event.request.clone();
            let copy = response.clone();
            let max_entries = self.config.image_cache_max_entries;
            event.wait_until(tokio::spawn(async move {
                if let Err(e) = store_and_trim(storage, &bucket, &request, copy, max_entries).await {
                    warn!(url = %request.url, bucket = %bucket, error = %e, "Image cache write failed");
                }
            }));
        }

        response
    }

    async fn navigate(&self, event: &mut FetchEvent) -> Result<Response> {
        let bucket = self.config.shell_cache_name();
        let shell = Request::get(self.config.shell_document_url()?);

        if let Some(hit) = self
            .lookup(&bucket, &shell, MatchOptions::ignore_search())
            .await
        {
            return Ok(hit);
        }

        if self.config.features.navigation_preload {
            if let Some(preload) = event.take_preload() {
                if let Some(response) = preload.resolve().await {
                    debug!(url = %event.request.url, "Serving navigation preload");
                    return Ok(response);
                }
            }
        }

        match self.fetcher.fetch(&event.request).await {
            Ok(response) => Ok(response),
            Err(e) => {
                debug!(url = %event.request.url, error = %e, "Navigation failed, trying shell fallback");
                match self
                    .lookup(&bucket, &shell, MatchOptions::ignore_search())
                    .await
                {
                    Some(fallback) => Ok(fallback),
                    None => Err(ServiceWorkerError::NoResponse {
                        url: event.request.url.clone(),
                        source: e,
                    }),
                }
            }
        }
    }

    async fn cache_first_then_store(&self, event: &mut FetchEvent) -> Result<Response> {
        let bucket = self.config.shell_cache_name();
        if let Some(hit) = self
            .lookup(&bucket, &event.request, MatchOptions::default())
            .await
        {
            return Ok(hit);
        }

        let response = self.fetcher.fetch(&event.request).await?;
        if response.status == StatusCode::OK {
            let storage = self.storage.clone();
            let request = event.request.clone();
            let copy = response.clone();
            event.wait_until(tokio::spawn(async move {
                let result = match storage.open(&bucket).await {
                    Ok(cache) => cache.put(&request, copy).await,
                    Err(e) => Err(e),
                };
                if let Err(e) = result {
                    warn!(url = %request.url, bucket = %bucket, error = %e, "Shell cache write failed");
                }
            }));
        }
        Ok(response)
    }

    /// Look up a request in a bucket. Storage failures count as a miss.
    async fn lookup(&self, bucket: &str, request: &Request, options: MatchOptions) -> Option<Response> {
        let result = match self.storage.open(bucket).await {
            Ok(cache) => cache.match_request(request, options).await,
            Err(e) => Err(e),
        };

        match result {
            Ok(Some(hit)) => {
                debug!(url = %request.url, bucket = %bucket, "Cache hit");
                Some(hit)
            }
            Ok(None) => {
                debug!(url = %request.url, bucket = %bucket, "Cache miss");
                None
            }
            Err(e) => {
                warn!(url = %request.url, bucket = %bucket, error = %e, "Cache lookup failed");
                None
            }
        }
    }
}

async fn store_and_trim(
    storage: Arc<dyn CacheStorage>,
    bucket: &str,
    request: &Request,
    response: Response,
    max_entries: usize,
) -> std::result::Result<(), CacheError> {
    let cache = storage.open(bucket).await?;
    cache.put(request, response).await?;
    let evicted = trim_cache(cache.as_ref(), max_entries).await?;
    if evicted > 0 {
        debug!(bucket = %bucket, evicted, "Trimmed image bucket");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::LocalCacheStorage;
    use url::Url;

    fn image(n: usize) -> Request {
        Request::get(Url::parse(&format!("https://image.tmdb.org/t/p/w342/{n}.jpg")).unwrap())
    }

    #[test]
    fn test_placeholder_is_transparent_gif() {
        let response = placeholder_image();
        assert_eq!(response.status, StatusCode::OK);
        assert_eq!(response.content_type(), Some("image/gif"));
        assert!(response.body.starts_with(b"GIF89a"));
        assert_eq!(response.body.last(), Some(&0x3b));
    }

    #[tokio::test]
    async fn test_trim_evicts_oldest_inserted() {
        let cache = LocalCacheStorage::in_memory().open("images").await.unwrap();
        for n in 0..5 {
            cache
                .put(&image(n), Response::new(StatusCode::OK, "jpg"))
                .await
                .unwrap();
        }
        // Reading an old entry must not protect it: eviction is FIFO.
        cache
            .match_request(&image(0), MatchOptions::default())
            .await
            .unwrap()
            .unwrap();

        let evicted = trim_cache(cache.as_ref(), 3).await.unwrap();
        assert_eq!(evicted, 2);

        let keys = cache.keys().await.unwrap();
        let paths: Vec<&str> = keys.iter().map(|u| u.path()).collect();
        assert_eq!(
            paths,
            vec!["/t/p/w342/2.jpg", "/t/p/w342/3.jpg", "/t/p/w342/4.jpg"]
        );
    }

    #[tokio::test]
    async fn test_trim_under_ceiling_is_noop() {
        let cache = LocalCacheStorage::in_memory().open("images").await.unwrap();
        cache
            .put(&image(1), Response::new(StatusCode::OK, "jpg"))
            .await
            .unwrap();

        assert_eq!(trim_cache(cache.as_ref(), 3).await.unwrap(), 0);
        assert_eq!(cache.len().await.unwrap(), 1);
    }
}
