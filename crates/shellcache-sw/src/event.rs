//! Fetch events and their outcomes.

use shellcache_net::{PreloadResponse, Request, Response};
use tokio::task::JoinHandle;
use tracing::warn;

/// What the worker decided to do with a fetch.
#[derive(Debug)]
pub enum FetchOutcome {
    /// Not handled; the host performs its default network fetch.
    Passthrough,
    /// Respond with this response.
    Respond(Response),
}

impl FetchOutcome {
    pub fn response(self) -> Option<Response> {
        match self {
            FetchOutcome::Respond(response) => Some(response),
            FetchOutcome::Passthrough => None,
        }
    }

    pub fn is_passthrough(&self) -> bool {
        matches!(self, FetchOutcome::Passthrough)
    }
}

/// A fetch event dispatched by the host.
///
/// Background work started while handling the event (cache writes, trimming)
/// is registered with [`FetchEvent::wait_until`]; the host keeps the worker
/// alive until [`FetchEvent::settle`] returns.
#[derive(Debug)]
pub struct FetchEvent {
    pub request: Request,
    preload: Option<PreloadResponse>,
    pending: Vec<JoinHandle<()>>,
}

impl FetchEvent {
    pub fn new(request: Request) -> Self {
        Self {
            request,
            preload: None,
            pending: Vec::new(),
        }
    }

    /// Attach the navigation preload the host started for this request.
    pub fn with_preload(mut self, preload: PreloadResponse) -> Self {
        self.preload = Some(preload);
        self
    }

    /// Take the preload response, if any. It can only be consumed once.
    pub fn take_preload(&mut self) -> Option<PreloadResponse> {
        self.preload.take()
    }

    /// Extend the event's lifetime until `task` finishes.
    pub fn wait_until(&mut self, task: JoinHandle<()>) {
        self.pending.push(task);
    }

    /// Number of background tasks not yet awaited.
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// Await all background work. Returns how many tasks were awaited.
    pub async fn settle(&mut self) -> usize {
        let tasks = std::mem::take(&mut self.pending);
        let count = tasks.len();
        for task in tasks {
            if let Err(e) = task.await {
                warn!(url = %self.request.url, error = %e, "Background task failed");
            }
        }
        count
    }
}
