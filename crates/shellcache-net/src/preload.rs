//! Navigation preload responses.
//!
//! When navigation preload is enabled the host starts the network request for
//! a page load in parallel with waking the worker. The worker receives the
//! in-flight request as a [`PreloadResponse`] and may await it instead of
//! issuing a second fetch.

use std::fmt;
use std::future::Future;

use futures::future::BoxFuture;
use futures::FutureExt;

use crate::Response;

/// A speculative response the host may have started for a navigation.
pub struct PreloadResponse {
    inner: BoxFuture<'static, Option<Response>>,
}

impl PreloadResponse {
    /// Wrap an in-flight preload. Resolving to `None` means the host had
    /// nothing usable (preload disabled, or the preload itself failed).
    pub fn new<F>(future: F) -> Self
    where
        F: Future<Output = Option<Response>> + Send + 'static,
    {
        Self {
            inner: future.boxed(),
        }
    }

    /// A preload that has already completed.
    pub fn ready(response: Response) -> Self {
        Self::new(futures::future::ready(Some(response)))
    }

    /// A preload that yields nothing.
    pub fn empty() -> Self {
        Self::new(futures::future::ready(None))
    }

    /// Wait for the preload to settle.
    pub async fn resolve(self) -> Option<Response> {
        self.inner.await
    }
}

impl fmt::Debug for PreloadResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PreloadResponse").finish_non_exhaustive()
    }
}
