//! The worker as a whole: lifecycle handlers over shared collaborators.

use std::sync::Arc;

use shellcache_net::{Fetcher, Request};
use tracing::info;

use crate::activate::{ActivationReport, Activator};
use crate::cache::CacheStorage;
use crate::config::PolicyConfig;
use crate::event::{FetchEvent, FetchOutcome};
use crate::host::WorkerHost;
use crate::install::Installer;
use crate::intercept::RequestInterceptor;
use crate::strategy::{classify, Strategy};
use crate::Result;

/// Offline caching policy for one registration.
///
/// The host calls [`on_install`](Self::on_install) once per new version,
/// [`on_activate`](Self::on_activate) when that version takes over, and
/// [`on_fetch`](Self::on_fetch) for every request from a controlled page.
/// Each returned future must be awaited to completion before the host
/// considers the event handled.
pub struct OfflineCachingPolicy {
    config: Arc<PolicyConfig>,
    host: Arc<dyn WorkerHost>,
    installer: Installer,
    activator: Activator,
    interceptor: RequestInterceptor,
}

impl OfflineCachingPolicy {
    /// Create a policy. Fails if the configuration is invalid.
    pub fn new(
        config: PolicyConfig,
        storage: Arc<dyn CacheStorage>,
        fetcher: Arc<dyn Fetcher>,
        host: Arc<dyn WorkerHost>,
    ) -> Result<Self> {
        config.validate()?;
        let config = Arc::new(config);

        info!(
            scope = %config.scope,
            shell = %config.shell_cache_name(),
            images = %config.image_cache_name(),
            "Offline caching policy created"
        );

        Ok(Self {
            installer: Installer::new(config.clone(), storage.clone(), fetcher.clone()),
            activator: Activator::new(config.clone(), storage.clone(), host.clone()),
            interceptor: RequestInterceptor::new(config.clone(), storage, fetcher),
            config,
            host,
        })
    }

    pub fn config(&self) -> &PolicyConfig {
        &self.config
    }

    /// Which strategy a request would be served with.
    pub fn classify(&self, request: &Request) -> Strategy {
        classify(&self.config, request)
    }

    /// Install event: pre-cache the shell, then skip waiting.
    ///
    /// An error means the install failed; the host discards this version and
    /// tries again on the next load.
    pub async fn on_install(&self) -> Result<usize> {
        let cached = self.installer.precache().await?;
        self.host.skip_waiting().await?;
        Ok(cached)
    }

    /// Activate event: enable preload, delete stale buckets, claim pages.
    pub async fn on_activate(&self) -> Result<ActivationReport> {
        self.activator.activate().await
    }

    /// Fetch event.
    pub async fn on_fetch(&self, event: &mut FetchEvent) -> Result<FetchOutcome> {
        self.interceptor.handle(event).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::LocalCacheStorage;
    use crate::host::{HostError, LocalHost};
    use crate::ServiceWorkerError;
    use async_trait::async_trait;
    use http::StatusCode;
    use shellcache_net::{NetError, Response};
    use url::Url;

    struct OnlineFetcher;

    #[async_trait]
    impl Fetcher for OnlineFetcher {
        async fn fetch(&self, request: &Request) -> std::result::Result<Response, NetError> {
            Ok(Response::new(StatusCode::OK, "ok").with_url(request.url.clone()))
        }
    }

    struct StubbornHost;

    #[async_trait]
    impl WorkerHost for StubbornHost {
        async fn skip_waiting(&self) -> std::result::Result<(), HostError> {
            Err(HostError::Failed("waiting worker locked".to_string()))
        }

        async fn claim_clients(&self) -> std::result::Result<(), HostError> {
            Ok(())
        }
    }

    fn policy(host: Arc<dyn WorkerHost>) -> OfflineCachingPolicy {
        OfflineCachingPolicy::new(
            PolicyConfig::for_scope("https://watchlist.example/app/").unwrap(),
            Arc::new(LocalCacheStorage::in_memory()),
            Arc::new(OnlineFetcher),
            host,
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_install_then_skip_waiting() {
        let host = Arc::new(LocalHost::new());
        let policy = policy(host.clone());

        assert_eq!(policy.on_install().await.unwrap(), 2);
        assert_eq!(host.skip_waiting_calls(), 1);
    }

    #[tokio::test]
    async fn test_skip_waiting_failure_fails_install() {
        let policy = policy(Arc::new(StubbornHost));
        assert!(matches!(
            policy.on_install().await,
            Err(ServiceWorkerError::Host(HostError::Failed(_)))
        ));
    }

    #[test]
    fn test_classify_delegates_to_config() {
        let policy = policy(Arc::new(LocalHost::new()));
        let poster = Request::get(Url::parse("https://image.tmdb.org/t/p/w92/a.jpg").unwrap());
        assert_eq!(policy.classify(&poster), Strategy::RemoteImage);
        assert_eq!(policy.config().scope.as_str(), "https://watchlist.example/app/");
    }

    #[test]
    fn test_rejects_invalid_config() {
        let config = PolicyConfig::for_scope("https://watchlist.example/app/")
            .unwrap()
            .with_version("");
        let result = OfflineCachingPolicy::new(
            config,
            Arc::new(LocalCacheStorage::in_memory()),
            Arc::new(OnlineFetcher),
            Arc::new(LocalHost::new()),
        );
        assert!(matches!(result, Err(ServiceWorkerError::InvalidConfig(_))));
    }
}
