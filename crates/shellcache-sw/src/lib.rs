//! # Shellcache Service Worker
//!
//! Offline caching policy for the watchlist single-page app.
//!
//! ## Features
//!
//! - **Install**: pre-cache the application shell manifest, all-or-nothing
//! - **Activate**: delete buckets from earlier versions, claim open pages
//! - **Fetch**: classify every request and apply one of four strategies
//! - **Cache API**: named buckets with insertion-ordered keys, in memory or on disk
//!
//! ## Architecture
//!
//! ```text
//! OfflineCachingPolicy
//!     ├── Installer          (install event)
//!     ├── Activator          (activate event)
//!     └── RequestInterceptor (fetch event)
//!             └── classify() → Strategy
//!                   ├── RemoteImage → image bucket, cache-first, FIFO trim, placeholder
//!                   ├── Navigation  → shell document, preload, network, shell fallback
//!                   ├── InScope     → shell bucket, cache-first, store on 200
//!                   └── Network     → uncached
//!
//! CacheStorage (caches)
//!     └── Cache (bucket)
//!             └── Request URL → Response
//! ```

use shellcache_net::NetError;
use thiserror::Error;
use url::Url;

pub mod activate;
pub mod cache;
pub mod config;
pub mod event;
pub mod host;
pub mod install;
pub mod intercept;
pub mod policy;
pub mod strategy;

pub use activate::{ActivationReport, Activator};
pub use cache::{Cache, CacheError, CacheStorage, LocalCache, LocalCacheStorage, MatchOptions};
pub use config::{PolicyConfig, PolicyFeatures};
pub use event::{FetchEvent, FetchOutcome};
pub use host::{HostError, LocalHost, WorkerHost};
pub use install::Installer;
pub use intercept::{placeholder_image, trim_cache, RequestInterceptor};
pub use policy::OfflineCachingPolicy;
pub use strategy::{classify, Strategy};

pub use shellcache_net::{Fetcher, PreloadResponse, Request, RequestMode, Response};

/// Errors that can occur in service worker operations.
#[derive(Error, Debug)]
pub enum ServiceWorkerError {
    #[error("Install failed while caching {url}: {reason}")]
    InstallFailed { url: Url, reason: String },

    #[error("No response available for {url}")]
    NoResponse {
        url: Url,
        #[source]
        source: NetError,
    },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Network error: {0}")]
    Network(#[from] NetError),

    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("Host error: {0}")]
    Host(#[from] HostError),
}

pub type Result<T> = std::result::Result<T, ServiceWorkerError>;
