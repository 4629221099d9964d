//! The host platform's lifecycle hooks.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use thiserror::Error;

/// Errors reported by the host.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HostError {
    #[error("Operation not supported by host")]
    Unsupported,

    #[error("Host operation failed: {0}")]
    Failed(String),
}

/// Lifecycle operations the policy asks of its host.
#[async_trait]
pub trait WorkerHost: Send + Sync {
    /// Activate this worker as soon as it is installed instead of waiting
    /// for every page using the previous version to close.
    async fn skip_waiting(&self) -> Result<(), HostError>;

    /// Take control of all open pages in scope.
    async fn claim_clients(&self) -> Result<(), HostError>;

    /// Start navigation requests on the network while the worker wakes up.
    async fn enable_navigation_preload(&self) -> Result<(), HostError> {
        Err(HostError::Unsupported)
    }
}

/// In-process host that records what the policy asked of it.
#[derive(Debug, Default)]
pub struct LocalHost {
    preload_supported: bool,
    preload_enabled: AtomicBool,
    skip_waiting_calls: AtomicUsize,
    claim_calls: AtomicUsize,
}

impl LocalHost {
    /// A host without navigation preload support.
    pub fn new() -> Self {
        Self::default()
    }

    /// A host that supports navigation preload.
    pub fn with_navigation_preload() -> Self {
        Self {
            preload_supported: true,
            ..Self::default()
        }
    }

    pub fn navigation_preload_enabled(&self) -> bool {
        self.preload_enabled.load(Ordering::SeqCst)
    }

    pub fn skip_waiting_calls(&self) -> usize {
        self.skip_waiting_calls.load(Ordering::SeqCst)
    }

    pub fn claim_calls(&self) -> usize {
        self.claim_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl WorkerHost for LocalHost {
    async fn skip_waiting(&self) -> Result<(), HostError> {
        self.skip_waiting_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn claim_clients(&self) -> Result<(), HostError> {
        self.claim_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn enable_navigation_preload(&self) -> Result<(), HostError> {
        if !self.preload_supported {
            return Err(HostError::Unsupported);
        }
        self.preload_enabled.store(true, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_local_host_counts_calls() {
        let host = LocalHost::new();
        host.skip_waiting().await.unwrap();
        host.claim_clients().await.unwrap();
        host.claim_clients().await.unwrap();

        assert_eq!(host.skip_waiting_calls(), 1);
        assert_eq!(host.claim_calls(), 2);
    }

    #[tokio::test]
    async fn test_preload_support() {
        let host = LocalHost::new();
        assert_eq!(
            host.enable_navigation_preload().await,
            Err(HostError::Unsupported)
        );
        assert!(!host.navigation_preload_enabled());

        let host = LocalHost::with_navigation_preload();
        host.enable_navigation_preload().await.unwrap();
        assert!(host.navigation_preload_enabled());
    }
}
