//! Activate: drop buckets from earlier versions and take over open pages.

use std::sync::Arc;

use futures::future::join_all;
use tracing::{debug, info, warn};

use crate::cache::CacheStorage;
use crate::config::PolicyConfig;
use crate::host::WorkerHost;
use crate::Result;

/// What an activation did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActivationReport {
    /// Navigation preload was enabled on the host.
    pub navigation_preload: bool,
    /// Buckets deleted because their name is not current.
    pub deleted: Vec<String>,
    /// Bucket names kept by this version.
    pub retained: Vec<String>,
}

pub struct Activator {
    config: Arc<PolicyConfig>,
    storage: Arc<dyn CacheStorage>,
    host: Arc<dyn WorkerHost>,
}

impl Activator {
    pub fn new(
        config: Arc<PolicyConfig>,
        storage: Arc<dyn CacheStorage>,
        host: Arc<dyn WorkerHost>,
    ) -> Self {
        Self {
            config,
            storage,
            host,
        }
    }

    /// Run activation.
    ///
    /// Preload and bucket deletion are best-effort; only failing to list the
    /// buckets or to claim clients is an error.
    pub async fn activate(&self) -> Result<ActivationReport> {
        let navigation_preload = self.enable_navigation_preload().await;

        let retained = self.config.retained_caches();
        let stale: Vec<String> = self
            .storage
            .keys()
            .await?
            .into_iter()
            .filter(|name| !retained.contains(name))
            .collect();

        let results = join_all(stale.iter().map(|name| self.storage.delete(name))).await;
        let mut deleted = Vec::new();
        for (name, result) in stale.into_iter().zip(results) {
            match result {
                Ok(true) => {
                    info!(bucket = %name, "Deleted stale bucket");
                    deleted.push(name);
                }
                Ok(false) => debug!(bucket = %name, "Stale bucket already gone"),
                Err(e) => warn!(bucket = %name, error = %e, "Failed to delete stale bucket"),
            }
        }

        self.host.claim_clients().await?;
        info!(retained = ?retained, deleted = deleted.len(), "Worker activated");

        Ok(ActivationReport {
            navigation_preload,
            deleted,
            retained,
        })
    }

    async fn enable_navigation_preload(&self) -> bool {
        if !self.config.features.navigation_preload {
            return false;
        }
        match self.host.enable_navigation_preload().await {
            Ok(()) => {
                debug!("Navigation preload enabled");
                true
            }
            Err(e) => {
                debug!(error = %e, "Navigation preload unavailable");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{Cache, CacheError, LocalCacheStorage, MatchOptions};
    use crate::host::{HostError, LocalHost};
    use crate::ServiceWorkerError;
    use async_trait::async_trait;
    use shellcache_net::{Request, Response};

    /// Storage that refuses to delete one bucket.
    struct StickyStorage {
        inner: LocalCacheStorage,
        sticky: &'static str,
    }

    #[async_trait]
    impl CacheStorage for StickyStorage {
        async fn open(&self, name: &str) -> std::result::Result<Arc<dyn Cache>, CacheError> {
            self.inner.open(name).await
        }

        async fn has(&self, name: &str) -> std::result::Result<bool, CacheError> {
            self.inner.has(name).await
        }

        async fn delete(&self, name: &str) -> std::result::Result<bool, CacheError> {
            if name == self.sticky {
                return Err(CacheError::Io(std::io::Error::other("busy")));
            }
            self.inner.delete(name).await
        }

        async fn keys(&self) -> std::result::Result<Vec<String>, CacheError> {
            self.inner.keys().await
        }

        async fn match_request(
            &self,
            request: &Request,
            options: MatchOptions,
        ) -> std::result::Result<Option<Response>, CacheError> {
            self.inner.match_request(request, options).await
        }
    }

    struct UnclaimableHost;

    #[async_trait]
    impl WorkerHost for UnclaimableHost {
        async fn skip_waiting(&self) -> std::result::Result<(), HostError> {
            Ok(())
        }

        async fn claim_clients(&self) -> std::result::Result<(), HostError> {
            Err(HostError::Failed("no clients api".to_string()))
        }
    }

    fn config() -> Arc<PolicyConfig> {
        Arc::new(PolicyConfig::for_scope("https://watchlist.example/app/").unwrap())
    }

    #[tokio::test]
    async fn test_deletion_failure_is_skipped() {
        let storage = Arc::new(StickyStorage {
            inner: LocalCacheStorage::in_memory(),
            sticky: "watchlist-shell-v1",
        });
        storage.open("watchlist-shell-v1").await.unwrap();
        storage.open("watchlist-images-v1").await.unwrap();
        storage.open("watchlist-shell-v2").await.unwrap();
        let host = Arc::new(LocalHost::new());

        let report = Activator::new(config(), storage.clone(), host.clone())
            .activate()
            .await
            .unwrap();

        assert_eq!(report.deleted, vec!["watchlist-images-v1"]);
        assert_eq!(
            storage.keys().await.unwrap(),
            vec!["watchlist-shell-v1", "watchlist-shell-v2"]
        );
        assert_eq!(host.claim_calls(), 1);
    }

    #[tokio::test]
    async fn test_legacy_features_retain_only_shell() {
        let storage = Arc::new(LocalCacheStorage::in_memory());
        storage.open("watchlist-shell-v2").await.unwrap();
        storage.open("watchlist-images-v2").await.unwrap();
        let config = Arc::new(
            PolicyConfig::for_scope("https://watchlist.example/app/")
                .unwrap()
                .with_features(crate::config::PolicyFeatures::legacy()),
        );

        let report = Activator::new(config, storage.clone(), Arc::new(LocalHost::new()))
            .activate()
            .await
            .unwrap();

        assert_eq!(report.retained, vec!["watchlist-shell-v2"]);
        assert_eq!(report.deleted, vec!["watchlist-images-v2"]);
    }

    #[tokio::test]
    async fn test_claim_failure_is_an_error() {
        let storage = Arc::new(LocalCacheStorage::in_memory());
        let result = Activator::new(config(), storage, Arc::new(UnclaimableHost))
            .activate()
            .await;
        assert!(matches!(
            result,
            Err(ServiceWorkerError::Host(HostError::Failed(_)))
        ));
    }
}
