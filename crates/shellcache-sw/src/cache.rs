//! Cache storage: named buckets of request → response entries.
//!
//! Keys are request URLs without their fragment. Only GET requests are ever
//! stored or matched. Every `put` stamps the entry with a sequence number, so
//! [`Cache::keys`] enumerates in insertion order; overwriting a key moves it
//! to the end.
//!
//! [`LocalCacheStorage`] keeps buckets in memory and, when opened on a
//! directory, mirrors each bucket to `<dir>/<urlencoded name>.json` after
//! every mutation.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use bytes::Bytes;
use hashbrown::HashMap;
use http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode};
use serde::{Deserialize, Serialize};
use shellcache_net::{Request, Response};
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, info, trace, warn};
use url::Url;

/// Errors from cache storage.
#[derive(Error, Debug)]
pub enum CacheError {
    #[error("Only GET requests can be cached, got {0}")]
    MethodNotAllowed(Method),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Corrupt cache data in {bucket}: {reason}")]
    Corrupt { bucket: String, reason: String },
}

/// Options for matching and deleting entries.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MatchOptions {
    /// Ignore the query string of both the request and the stored URLs.
    pub ignore_search: bool,
}

impl MatchOptions {
    pub fn ignore_search() -> Self {
        Self {
            ignore_search: true,
        }
    }
}

/// A single named bucket.
#[async_trait]
pub trait Cache: Send + Sync {
    /// Bucket name.
    fn name(&self) -> &str;

    /// Find the stored response for a request. With `ignore_search`, the
    /// oldest matching entry wins.
    async fn match_request(
        &self,
        request: &Request,
        options: MatchOptions,
    ) -> Result<Option<Response>, CacheError>;

    /// Store a response, replacing any entry with the same key.
    async fn put(&self, request: &Request, response: Response) -> Result<(), CacheError>;

    /// Delete matching entries. Returns whether anything was removed.
    async fn delete(&self, request: &Request, options: MatchOptions) -> Result<bool, CacheError>;

    /// Stored request URLs, oldest insertion first.
    async fn keys(&self) -> Result<Vec<Url>, CacheError>;

    /// Number of stored entries.
    async fn len(&self) -> Result<usize, CacheError> {
        Ok(self.keys().await?.len())
    }
}

/// The set of named buckets (the `caches` global).
#[async_trait]
pub trait CacheStorage: Send + Sync {
    /// Open a bucket, creating it if it does not exist.
    async fn open(&self, name: &str) -> Result<Arc<dyn Cache>, CacheError>;

    /// Check if a bucket exists.
    async fn has(&self, name: &str) -> Result<bool, CacheError>;

    /// Delete a bucket and all its entries. Returns whether it existed.
    async fn delete(&self, name: &str) -> Result<bool, CacheError>;

    /// All bucket names, in creation order. Buckets reloaded from disk have
    /// no recorded creation time; they come first, sorted by name.
    async fn keys(&self) -> Result<Vec<String>, CacheError>;

    /// Match across all buckets, in creation order.
    async fn match_request(
        &self,
        request: &Request,
        options: MatchOptions,
    ) -> Result<Option<Response>, CacheError>;
}

/// A stored request/response pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    /// Request URL (the key).
    pub url: String,

    /// Response status.
    pub status: u16,

    /// Response headers. Values that are not visible ASCII are dropped.
    pub headers: Vec<(String, String)>,

    /// Response body.
    #[serde(with = "base64_body")]
    pub body: Bytes,

    /// Insertion sequence number.
    pub seq: u64,

    /// Cached at timestamp (ms since epoch).
    pub cached_at: u64,
}

impl CacheEntry {
    fn new(url: String, seq: u64, response: &Response) -> Self {
        let headers = response
            .headers
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_string(), v.to_string()))
            })
            .collect();

        Self {
            url,
            status: response.status.as_u16(),
            headers,
            body: response.body.clone(),
            seq,
            cached_at: SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_millis() as u64)
                .unwrap_or_default(),
        }
    }

    fn to_response(&self, bucket: &str) -> Result<Response, CacheError> {
        let status = StatusCode::from_u16(self.status).map_err(|e| CacheError::Corrupt {
            bucket: bucket.to_string(),
            reason: format!("entry {}: {e}", self.url),
        })?;

        let mut headers = HeaderMap::new();
        for (name, value) in &self.headers {
            if let (Ok(n), Ok(v)) = (
                HeaderName::try_from(name.as_str()),
                HeaderValue::try_from(value.as_str()),
            ) {
                headers.append(n, v);
            }
        }

        Ok(Response {
            status,
            headers,
            body: self.body.clone(),
            url: Url::parse(&self.url).ok(),
        })
    }
}

mod base64_body {
    use base64::{engine::general_purpose::STANDARD, Engine as _};
    use bytes::Bytes;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(body: &Bytes, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(body))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Bytes, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded)
            .map(Bytes::from)
            .map_err(serde::de::Error::custom)
    }
}

/// Cache key for a URL: the URL without its fragment.
fn cache_key(url: &Url) -> String {
    let mut url = url.clone();
    url.set_fragment(None);
    url.into()
}

fn strip_search(key: &str) -> &str {
    key.split_once('?').map_or(key, |(base, _)| base)
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct BucketState {
    next_seq: u64,
    entries: HashMap<String, CacheEntry>,
}

impl BucketState {
    fn ordered(&self) -> Vec<&CacheEntry> {
        let mut entries: Vec<&CacheEntry> = self.entries.values().collect();
        entries.sort_by_key(|e| e.seq);
        entries
    }

    fn matches(key: &str, candidate: &str, options: MatchOptions) -> bool {
        if options.ignore_search {
            strip_search(key) == strip_search(candidate)
        } else {
            key == candidate
        }
    }
}

/// A bucket held in memory, optionally mirrored to a JSON file.
///
/// Once the bucket is deleted from its storage, handles still held elsewhere
/// keep working in memory but never write the file again.
#[derive(Debug)]
pub struct LocalCache {
    name: String,
    file: Option<PathBuf>,
    deleted: AtomicBool,
    state: RwLock<BucketState>,
}

impl LocalCache {
    fn new(name: &str, file: Option<PathBuf>, state: BucketState) -> Self {
        Self {
            name: name.to_string(),
            file,
            deleted: AtomicBool::new(false),
            state: RwLock::new(state),
        }
    }

    async fn persist(&self, state: &BucketState) -> Result<(), CacheError> {
        let Some(path) = &self.file else {
            return Ok(());
        };
        if self.deleted.load(Ordering::SeqCst) {
            trace!(bucket = %self.name, "Bucket deleted, skipping persist");
            return Ok(());
        }
        let json = serde_json::to_vec(state)?;
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, json).await?;
        tokio::fs::rename(&tmp, path).await?;
        trace!(bucket = %self.name, path = %path.display(), "Bucket persisted");
        Ok(())
    }
}

#[async_trait]
impl Cache for LocalCache {
    fn name(&self) -> &str {
        &self.name
    }

    async fn match_request(
        &self,
        request: &Request,
        options: MatchOptions,
    ) -> Result<Option<Response>, CacheError> {
        if !request.is_get() {
            return Ok(None);
        }

        let key = cache_key(&request.url);
        let state = self.state.read().await;
        let found = if options.ignore_search {
            state
                .ordered()
                .into_iter()
                .find(|e| BucketState::matches(&key, &e.url, options))
        } else {
            state.entries.get(&key)
        };

        found.map(|e| e.to_response(&self.name)).transpose()
    }

    async fn put(&self, request: &Request, response: Response) -> Result<(), CacheError> {
        if !request.is_get() {
            return Err(CacheError::MethodNotAllowed(request.method.clone()));
        }

        let key = cache_key(&request.url);
        let mut state = self.state.write().await;
        let seq = state.next_seq;
        state.next_seq += 1;
        let entry = CacheEntry::new(key.clone(), seq, &response);
        state.entries.insert(key, entry);
        self.persist(&state).await
    }

    async fn delete(&self, request: &Request, options: MatchOptions) -> Result<bool, CacheError> {
        if !request.is_get() {
            return Ok(false);
        }

        let key = cache_key(&request.url);
        let mut state = self.state.write().await;
        let before = state.entries.len();
        state
            .entries
            .retain(|candidate, _| !BucketState::matches(&key, candidate, options));

        if state.entries.len() == before {
            return Ok(false);
        }
        self.persist(&state).await?;
        Ok(true)
    }

    async fn keys(&self) -> Result<Vec<Url>, CacheError> {
        let state = self.state.read().await;
        Ok(state
            .ordered()
            .into_iter()
            .filter_map(|e| Url::parse(&e.url).ok())
            .collect())
    }

    async fn len(&self) -> Result<usize, CacheError> {
        Ok(self.state.read().await.entries.len())
    }
}

/// Cache storage backed by memory, optionally persisted to a directory.
#[derive(Debug, Default)]
pub struct LocalCacheStorage {
    root: Option<PathBuf>,
    caches: RwLock<Vec<Arc<LocalCache>>>,
}

impl LocalCacheStorage {
    /// Create storage that lives only as long as this value.
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Open storage persisted under `root`, loading any buckets saved there.
    pub async fn open_dir(root: impl Into<PathBuf>) -> Result<Self, CacheError> {
        let root = root.into();
        tokio::fs::create_dir_all(&root).await?;

        let mut caches = Vec::new();
        let mut dir = tokio::fs::read_dir(&root).await?;
        while let Some(entry) = dir.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            let name = urlencoding::decode(stem)
                .map_err(|e| CacheError::Corrupt {
                    bucket: stem.to_string(),
                    reason: e.to_string(),
                })?
                .into_owned();

            let bytes = tokio::fs::read(&path).await?;
            let state: BucketState = match serde_json::from_slice(&bytes) {
                Ok(state) => state,
                Err(e) => {
                    let error = CacheError::Corrupt {
                        bucket: name,
                        reason: e.to_string(),
                    };
                    warn!(path = %path.display(), error = %error, "Skipping unreadable bucket");
                    continue;
                }
            };
            debug!(bucket = %name, entries = state.entries.len(), "Loaded bucket");
            caches.push(Arc::new(LocalCache::new(&name, Some(path), state)));
        }
        caches.sort_by(|a, b| a.name.cmp(&b.name));

        info!(root = %root.display(), buckets = caches.len(), "Cache storage opened");

        Ok(Self {
            root: Some(root),
            caches: RwLock::new(caches),
        })
    }

    /// Directory the buckets are persisted to, if any.
    pub fn root(&self) -> Option<&Path> {
        self.root.as_deref()
    }

    fn bucket_path(&self, name: &str) -> Option<PathBuf> {
        self.root
            .as_ref()
            .map(|root| root.join(format!("{}.json", urlencoding::encode(name))))
    }
}

#[async_trait]
impl CacheStorage for LocalCacheStorage {
    async fn open(&self, name: &str) -> Result<Arc<dyn Cache>, CacheError> {
        let mut caches = self.caches.write().await;
        if let Some(cache) = caches.iter().find(|c| c.name == name) {
            return Ok(cache.clone());
        }

        let cache = Arc::new(LocalCache::new(
            name,
            self.bucket_path(name),
            BucketState::default(),
        ));
        cache.persist(&*cache.state.read().await).await?;
        caches.push(cache.clone());
        debug!(bucket = %name, "Bucket created");
        Ok(cache)
    }

    async fn has(&self, name: &str) -> Result<bool, CacheError> {
        Ok(self.caches.read().await.iter().any(|c| c.name == name))
    }

    async fn delete(&self, name: &str) -> Result<bool, CacheError> {
        let mut caches = self.caches.write().await;
        let Some(index) = caches.iter().position(|c| c.name == name) else {
            return Ok(false);
        };
        let cache = caches.remove(index);

        // Flag under the bucket lock so an in-flight put cannot recreate the file.
        let _state = cache.state.write().await;
        cache.deleted.store(true, Ordering::SeqCst);
        if let Some(path) = &cache.file {
            match tokio::fs::remove_file(path).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        debug!(bucket = %name, "Bucket deleted");
        Ok(true)
    }

    async fn keys(&self) -> Result<Vec<String>, CacheError> {
        Ok(self
            .caches
            .read()
            .await
            .iter()
            .map(|c| c.name.clone())
            .collect())
    }

    async fn match_request(
        &self,
        request: &Request,
        options: MatchOptions,
    ) -> Result<Option<Response>, CacheError> {
        let caches = self.caches.read().await.clone();
        for cache in caches {
            if let Some(response) = cache.match_request(request, options).await? {
                return Ok(Some(response));
            }
        }
        Ok(None)
    }
}
