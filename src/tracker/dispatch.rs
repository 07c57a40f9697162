//! Run dispatch
//!
//! Async callers hand articles to a dispatcher instead of spawning work
//! themselves. The dispatcher bounds how many runs execute at once, keeps a
//! cancellation handle per in-flight article, and always yields the final
//! run state. Because a run is idempotent, dispatching the same article
//! twice is harmless.

use super::cancel::CancellationToken;
use super::engine::EntityTracker;
use super::input::ExtractedEntity;
use crate::model::{Article, ArticleId, TrackingState};
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::debug;

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("dispatcher is shut down")]
    Closed,

    #[error("worker task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

#[async_trait]
pub trait RunDispatcher: Send + Sync {
    /// Process one article and wait for its final state.
    async fn dispatch(&self, article: Article, entities: Vec<ExtractedEntity>) -> Result<TrackingState, DispatchError>;

    /// Ask an in-flight (or queued) run to stop. Returns false if nothing
    /// is running for the article.
    fn cancel(&self, article_id: &ArticleId) -> bool;

    fn in_flight(&self) -> usize;
}

/// Runs articles on tokio's blocking pool, at most `max_concurrent` at a time.
#[derive(Clone)]
pub struct TokioDispatcher {
    tracker: Arc<EntityTracker>,
    permits: Arc<Semaphore>,
    running: Arc<DashMap<ArticleId, CancellationToken>>,
}

impl TokioDispatcher {
    pub fn new(tracker: Arc<EntityTracker>, max_concurrent: usize) -> Self {
        Self {
            tracker,
            permits: Arc::new(Semaphore::new(max_concurrent.max(1))),
            running: Arc::new(DashMap::new()),
        }
    }

    /// Sized from the tracker's `dispatch.max_concurrent_runs`
    pub fn from_tracker(tracker: Arc<EntityTracker>) -> Self {
        let max = tracker.config().dispatch.max_concurrent_runs;
        Self::new(tracker, max)
    }

    /// Spawn a run and return its handle without waiting.
    pub fn spawn(
        &self,
        article: Article,
        entities: Vec<ExtractedEntity>,
    ) -> JoinHandle<Result<TrackingState, DispatchError>> {
        let this = self.clone();
        tokio::spawn(async move { this.dispatch(article, entities).await })
    }

    /// Stop accepting work. Queued dispatches fail with `Closed`.
    pub fn close(&self) {
        self.permits.close();
    }

    async fn run(&self, article: Article, entities: Vec<ExtractedEntity>, token: CancellationToken) -> Result<TrackingState, DispatchError> {
        let permit = self.permits.clone().acquire_owned().await.map_err(|_| DispatchError::Closed)?;
        debug!(article_id = %article.id, "run admitted");

        let tracker = self.tracker.clone();
        let state = tokio::task::spawn_blocking(move || {
            let _permit = permit;
            tracker.process_article_with_cancel(&article, &entities, &token)
        })
        .await?;
        Ok(state)
    }
}

#[async_trait]
impl RunDispatcher for TokioDispatcher {
    async fn dispatch(&self, article: Article, entities: Vec<ExtractedEntity>) -> Result<TrackingState, DispatchError> {
        let article_id = article.id.clone();
        let token = CancellationToken::new();
        self.running.insert(article_id.clone(), token.clone());

        let result = self.run(article, entities, token.clone()).await;

        // A newer dispatch of the same article may have replaced our entry
        self.running.remove_if(&article_id, |_, current| current.same_as(&token));
        result
    }

    fn cancel(&self, article_id: &ArticleId) -> bool {
        match self.running.get(article_id) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    fn in_flight(&self) -> usize {
        self.running.len()
    }
}
