use std::{collections::HashMap, fmt, sync::Arc, time::Duration};

use parking_lot::Mutex;
use serde_json::json;
use shared_logging::LogLevel;
use tokio::task::{JoinError, JoinHandle};

use crate::{
    errors::CommentsError,
    model::{Bucket, CacheKey, Comment},
    orchestrator::{EnrichmentOrchestrator, EnrichmentReport},
    remote::CommentService,
    store::CommentCache,
    telemetry::{log_to, CommentsTelemetry},
};

type FetchLocks = Arc<Mutex<HashMap<CacheKey, Arc<tokio::sync::Mutex<()>>>>>;

/// A fetched list plus the background enrichment started for it.
#[derive(Debug)]
pub struct LoadedComments {
    /// List as it was when the fetch returned.
    pub comments: Vec<Comment>,
    /// Running enrichment; `None` when every comment already had replies.
    pub enrichment: Option<JoinHandle<EnrichmentReport>>,
}

impl LoadedComments {
    /// Waits for the background enrichment. `Ok(None)` when none was
    /// started; an error when the task panicked or was aborted.
    pub async fn enriched(self) -> Result<Option<EnrichmentReport>, JoinError> {
        match self.enrichment {
            Some(handle) => handle.await.map(Some),
            None => Ok(None),
        }
    }
}

/// Fetch-through binding between [`CommentService::fetch_comments`] and the
/// cache, with stale-while-revalidate freshness.
#[derive(Clone)]
pub struct CommentQuery {
    cache: CommentCache,
    service: Arc<dyn CommentService>,
    orchestrator: EnrichmentOrchestrator,
    stale_after: Duration,
    fetch_locks: FetchLocks,
    telemetry: Option<CommentsTelemetry>,
}

impl fmt::Debug for CommentQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommentQuery")
            .field("stale_after", &self.stale_after)
            .finish_non_exhaustive()
    }
}

impl CommentQuery {
    /// Creates a query binding.
    #[must_use]
    pub fn new(
        cache: CommentCache,
        service: Arc<dyn CommentService>,
        orchestrator: EnrichmentOrchestrator,
        stale_after: Duration,
        telemetry: Option<CommentsTelemetry>,
    ) -> Self {
        Self {
            cache,
            service,
            orchestrator,
            stale_after,
            fetch_locks: Arc::default(),
            telemetry,
        }
    }

    /// Cached list, fresh or stale, for immediate rendering.
    #[must_use]
    pub fn peek(&self, subject_id: &str, bucket: Bucket) -> Option<Vec<Comment>> {
        self.cache
            .get(&CacheKey::new(subject_id, bucket))
            .map(|entry| entry.comments)
    }

    /// Returns the cached list while it is fresh, otherwise refetches it.
    ///
    /// Concurrent fetches of one key share a single remote call. Refetched
    /// comments keep recommendations already attached to the same id. A
    /// failed fetch leaves the cache as it was.
    pub async fn fetch(
        &self,
        subject_id: &str,
        bucket: Bucket,
    ) -> Result<Vec<Comment>, CommentsError> {
        if subject_id.trim().is_empty() {
            return Err(CommentsError::MissingSubject);
        }
        let key = CacheKey::new(subject_id, bucket);
        if let Some(fresh) = self.fresh(&key) {
            return Ok(fresh);
        }

        let lock = self.fetch_lock(&key);
        let _guard = lock.lock().await;
        if let Some(fresh) = self.fresh(&key) {
            return Ok(fresh);
        }

        match self.service.fetch_comments(subject_id, bucket).await {
            Ok(fetched) => {
                let comments = self.cache.refresh(&key, fetched);
                log_to(
                    self.telemetry.as_ref(),
                    LogLevel::Debug,
                    "comments.fetch.completed",
                    &json!({ "key": key.to_string(), "count": comments.len() }),
                );
                Ok(comments)
            }
            Err(source) => {
                log_to(
                    self.telemetry.as_ref(),
                    LogLevel::Error,
                    "comments.fetch.failed",
                    &json!({ "key": key.to_string(), "reason": source.to_string() }),
                );
                Err(CommentsError::Fetch { key, source })
            }
        }
    }

    /// Fetches the list and starts enriching it in the background; returns
    /// without waiting for any recommendation.
    pub async fn load(
        &self,
        subject_id: &str,
        bucket: Bucket,
        fanout_limit: usize,
    ) -> Result<LoadedComments, CommentsError> {
        let comments = self.fetch(subject_id, bucket).await?;
        let enrichment = comments.iter().any(Comment::needs_enrichment).then(|| {
            let orchestrator = self.orchestrator.clone();
            let subject_id = subject_id.to_string();
            tokio::spawn(async move {
                orchestrator
                    .ensure_enriched(&subject_id, bucket, fanout_limit)
                    .await
            })
        });
        Ok(LoadedComments {
            comments,
            enrichment,
        })
    }

    fn fresh(&self, key: &CacheKey) -> Option<Vec<Comment>> {
        self.cache
            .get(key)
            .filter(|entry| !entry.is_stale(self.stale_after))
            .map(|entry| entry.comments)
    }

    fn fetch_lock(&self, key: &CacheKey) -> Arc<tokio::sync::Mutex<()>> {
        Arc::clone(self.fetch_locks.lock().entry(key.clone()).or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        errors::RemoteError,
        model::Recommendation,
        remote::scripted::{sample_list, ScriptedService},
    };

    fn query(service: Arc<ScriptedService>, stale_after: Duration) -> (CommentCache, CommentQuery) {
        let cache = CommentCache::new();
        let orchestrator = EnrichmentOrchestrator::new(cache.clone(), service.clone(), None);
        let query = CommentQuery::new(cache.clone(), service, orchestrator, stale_after, None);
        (cache, query)
    }

    fn service() -> Arc<ScriptedService> {
        Arc::new(ScriptedService::new().with_list("p1", Bucket::Negative, sample_list()))
    }

    #[tokio::test]
    async fn fresh_lists_are_served_from_cache() {
        let service = service();
        let (_, query) = query(service.clone(), Duration::from_secs(60));
        query.fetch("p1", Bucket::Negative).await.unwrap();
        query.fetch("p1", Bucket::Negative).await.unwrap();
        assert_eq!(service.fetch_count(), 1);
    }

    #[tokio::test]
    async fn concurrent_fetches_share_one_call() {
        let service = service();
        let (_, query) = query(service.clone(), Duration::from_secs(60));
        let (a, b) = tokio::join!(
            query.fetch("p1", Bucket::Negative),
            query.fetch("p1", Bucket::Negative)
        );
        assert_eq!(a.unwrap().len(), 3);
        assert_eq!(b.unwrap().len(), 3);
        assert_eq!(service.fetch_count(), 1);
    }

    #[tokio::test]
    async fn stale_refetch_keeps_recommendations() {
        let service = service();
        let (cache, query) = query(service.clone(), Duration::ZERO);
        query.fetch("p1", Bucket::Negative).await.unwrap();
        let key = CacheKey::new("p1", Bucket::Negative);
        cache.update(&key, |current| {
            crate::merge::replace_recommendations(
                current,
                "c1",
                vec![Recommendation::new("c1-r0", "kept")],
            )
        });

        let comments = query.fetch("p1", Bucket::Negative).await.unwrap();

        assert_eq!(service.fetch_count(), 2);
        assert_eq!(comments[0].recommendations()[0].reply, "kept");
        assert_eq!(comments[1].recommendations()[0].id, "c2-old");
    }

    #[tokio::test]
    async fn fetch_failures_do_not_touch_the_cache() {
        let service = service();
        service.fail_fetch(RemoteError::Unauthorized("expired token".into()));
        let (cache, query) = query(service, Duration::from_secs(60));
        let err = query.fetch("p1", Bucket::Negative).await.unwrap_err();
        assert!(matches!(
            err,
            CommentsError::Fetch {
                source: RemoteError::Unauthorized(_),
                ..
            }
        ));
        assert!(cache.keys().is_empty());
        assert!(matches!(
            query.fetch("", Bucket::Negative).await,
            Err(CommentsError::MissingSubject)
        ));
    }

    #[tokio::test]
    async fn load_returns_before_enrichment_lands() {
        let service = Arc::new(
            ScriptedService::gated().with_list("p1", Bucket::Negative, sample_list()),
        );
        let (cache, query) = query(service.clone(), Duration::from_secs(60));

        let loaded = query.load("p1", Bucket::Negative, 3).await.unwrap();
        assert!(loaded.comments[0].needs_enrichment());
        assert!(loaded.enrichment.is_some());

        service.release(2);
        let report = loaded.enriched().await.unwrap().unwrap();
        assert_eq!(report.enriched, 2);
        let comments = query.peek("p1", Bucket::Negative).unwrap();
        assert!(comments.iter().all(|c| !c.needs_enrichment()));
        assert_eq!(cache.keys().len(), 1);

        let again = query.load("p1", Bucket::Negative, 3).await.unwrap();
        assert!(again.enrichment.is_none());
        assert_eq!(again.enriched().await.unwrap(), None);
    }

    #[tokio::test]
    async fn aborted_enrichment_is_reported() {
        let service = Arc::new(
            ScriptedService::gated().with_list("p1", Bucket::Negative, sample_list()),
        );
        let (cache, query) = query(service, Duration::from_secs(60));
        let loaded = query.load("p1", Bucket::Negative, 3).await.unwrap();
        loaded.enrichment.as_ref().unwrap().abort();

        let err = loaded.enriched().await.unwrap_err();
        assert!(err.is_cancelled());
        assert!(cache.get(&CacheKey::new("p1", Bucket::Negative)).unwrap().comments[0]
            .needs_enrichment());
    }
}
