use std::{
    collections::{HashMap, HashSet},
    fmt,
    sync::Arc,
};

use futures::future::join_all;
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::json;
use shared_logging::LogLevel;

use crate::{
    merge,
    model::{Bucket, CacheKey, Comment},
    remote::CommentService,
    store::CommentCache,
    telemetry::{event_to, log_to, CommentsTelemetry},
};

type InFlight = Arc<Mutex<HashSet<(CacheKey, String)>>>;

/// Outcome of one [`EnrichmentOrchestrator::ensure_enriched`] run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct EnrichmentReport {
    /// Recommendation calls issued.
    pub requested: usize,
    /// Comments whose recommendations were written.
    pub enriched: usize,
    /// Calls that failed or returned nothing; those comments stay eligible.
    pub failed: usize,
    /// Successful results discarded because the slot was filled meanwhile.
    pub superseded: usize,
    /// Comments skipped because another run already has them in flight.
    pub in_flight: usize,
    /// Successful results discarded because the entry left the cache.
    pub dropped: usize,
}

impl EnrichmentReport {
    /// True when the run issued no remote calls.
    #[must_use]
    pub const fn is_noop(&self) -> bool {
        self.requested == 0
    }
}

/// Attaches recommended replies to cached comments that lack them.
#[derive(Clone)]
pub struct EnrichmentOrchestrator {
    cache: CommentCache,
    service: Arc<dyn CommentService>,
    in_flight: InFlight,
    telemetry: Option<CommentsTelemetry>,
}

impl fmt::Debug for EnrichmentOrchestrator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EnrichmentOrchestrator")
            .field("in_flight", &self.in_flight.lock().len())
            .finish_non_exhaustive()
    }
}

impl EnrichmentOrchestrator {
    /// Creates an orchestrator over a cache and service.
    #[must_use]
    pub fn new(
        cache: CommentCache,
        service: Arc<dyn CommentService>,
        telemetry: Option<CommentsTelemetry>,
    ) -> Self {
        Self {
            cache,
            service,
            in_flight: Arc::default(),
            telemetry,
        }
    }

    /// Requests up to `fanout_limit` replies for every cached comment of
    /// (`subject_id`, `bucket`) that has none, and merges the results in a
    /// single cache write.
    ///
    /// Per-comment failures are logged and counted, never returned: a failed
    /// comment keeps no recommendations and qualifies again on the next run.
    /// Absent entries and fully enriched entries are no-ops.
    pub async fn ensure_enriched(
        &self,
        subject_id: &str,
        bucket: Bucket,
        fanout_limit: usize,
    ) -> EnrichmentReport {
        let mut report = EnrichmentReport::default();
        if subject_id.trim().is_empty() {
            return report;
        }
        let key = CacheKey::new(subject_id, bucket);
        let Some(entry) = self.cache.get(&key) else {
            return report;
        };

        let (tasks, claim) = self.claim(&key, &entry.comments);
        report.in_flight = entry
            .comments
            .iter()
            .filter(|c| c.needs_enrichment())
            .count()
            - tasks.len();
        if tasks.is_empty() {
            return report;
        }
        report.requested = tasks.len();
        let limit = fanout_limit.max(1);
        log_to(
            self.telemetry.as_ref(),
            LogLevel::Debug,
            "comments.enrichment.start",
            &json!({ "key": key.to_string(), "comments": tasks.len(), "limit": limit }),
        );

        let calls = tasks.iter().map(|comment| {
            let service = Arc::clone(&self.service);
            async move {
                let outcome = service.request_recommendations(comment, limit).await;
                (comment.id.as_str(), outcome)
            }
        });
        let outcomes = join_all(calls).await;

        let mut patches = HashMap::new();
        for (comment_id, outcome) in outcomes {
            match outcome {
                Ok(recommendations) if !recommendations.is_empty() => {
                    patches.insert(comment_id.to_string(), recommendations);
                }
                Ok(_) => {
                    report.failed += 1;
                    self.warn(&key, comment_id, "no recommendations returned");
                }
                Err(err) => {
                    report.failed += 1;
                    self.warn(&key, comment_id, &err.to_string());
                }
            }
        }

        let mut applied = 0;
        let written = self.cache.update_existing(&key, |current| {
            let (merged, landed) = merge::fill_missing(current, &patches);
            applied = landed;
            merged
        });
        drop(claim);
        if written.is_some() {
            report.enriched = applied;
            report.superseded = patches.len() - applied;
        } else {
            report.dropped = patches.len();
            log_to(
                self.telemetry.as_ref(),
                LogLevel::Warn,
                "comments.enrichment.dropped",
                &json!({ "key": key.to_string(), "results": patches.len() }),
            );
        }

        let summary = json!({ "key": key.to_string(), "report": report });
        log_to(
            self.telemetry.as_ref(),
            LogLevel::Info,
            "comments.enrichment.completed",
            &summary,
        );
        event_to(
            self.telemetry.as_ref(),
            "comments.enrichment.completed",
            summary,
        )
        .await;
        report
    }

    /// Comments of `key` currently being enriched.
    #[must_use]
    pub fn in_flight(&self, key: &CacheKey) -> Vec<String> {
        self.in_flight
            .lock()
            .iter()
            .filter(|(k, _)| k == key)
            .map(|(_, id)| id.clone())
            .collect()
    }

    fn claim(&self, key: &CacheKey, comments: &[Comment]) -> (Vec<Comment>, Claim) {
        let mut in_flight = self.in_flight.lock();
        let tasks: Vec<Comment> = comments
            .iter()
            .filter(|c| c.needs_enrichment())
            .filter(|c| in_flight.insert((key.clone(), c.id.clone())))
            .cloned()
            .collect();
        let claim = Claim {
            registry: Arc::clone(&self.in_flight),
            key: key.clone(),
            ids: tasks.iter().map(|c| c.id.clone()).collect(),
        };
        (tasks, claim)
    }

    fn warn(&self, key: &CacheKey, comment_id: &str, reason: &str) {
        log_to(
            self.telemetry.as_ref(),
            LogLevel::Warn,
            "comments.enrichment.failed",
            &json!({ "key": key.to_string(), "comment_id": comment_id, "reason": reason }),
        );
    }
}

/// Releases claimed comment ids when the run finishes or is dropped.
struct Claim {
    registry: InFlight,
    key: CacheKey,
    ids: Vec<String>,
}

impl Drop for Claim {
    fn drop(&mut self) {
        let mut registry = self.registry.lock();
        for id in self.ids.drain(..) {
            registry.remove(&(self.key.clone(), id));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        desk::ReplyDesk,
        model::Recommendation,
        remote::scripted::{sample_list, ScriptedService},
    };
    use shared_event_bus::MemoryEventBus;
    use shared_logging::MemoryLogSink;

    fn key() -> CacheKey {
        CacheKey::new("p1", Bucket::Negative)
    }

    fn setup(service: ScriptedService) -> (CommentCache, Arc<ScriptedService>, EnrichmentOrchestrator) {
        let cache = CommentCache::new();
        cache.set(&key(), sample_list());
        let service = Arc::new(service);
        let orchestrator = EnrichmentOrchestrator::new(cache.clone(), service.clone(), None);
        (cache, service, orchestrator)
    }

    fn ids(cache: &CommentCache) -> Vec<String> {
        cache
            .get(&key())
            .unwrap()
            .comments
            .into_iter()
            .map(|c| c.id)
            .collect()
    }

    #[tokio::test]
    async fn enriches_only_comments_without_replies() {
        let (cache, service, orchestrator) = setup(ScriptedService::new());
        let version = cache.get(&key()).unwrap().version;

        let report = orchestrator.ensure_enriched("p1", Bucket::Negative, 3).await;

        let mut calls = service.recommend_calls();
        calls.sort();
        assert_eq!(calls, vec!["c1", "c3"]);
        assert_eq!(report.requested, 2);
        assert_eq!(report.enriched, 2);
        let entry = cache.get(&key()).unwrap();
        assert_eq!(entry.version, version + 1);
        assert_eq!(entry.comments[0].recommendations().len(), 3);
        assert_eq!(entry.comments[1].recommendations()[0].id, "c2-old");
        assert_eq!(entry.comments[2].recommendations().len(), 3);
        assert_eq!(ids(&cache), vec!["c1", "c2", "c3"]);
    }

    #[tokio::test]
    async fn second_run_on_enriched_entry_is_a_noop() {
        let (cache, service, orchestrator) = setup(ScriptedService::new());
        orchestrator.ensure_enriched("p1", Bucket::Negative, 3).await;
        let version = cache.get(&key()).unwrap().version;
        let calls = service.recommend_calls().len();

        let report = orchestrator.ensure_enriched("p1", Bucket::Negative, 3).await;

        assert!(report.is_noop());
        assert_eq!(service.recommend_calls().len(), calls);
        assert_eq!(cache.get(&key()).unwrap().version, version);
    }

    #[tokio::test]
    async fn one_failure_does_not_discard_the_others() {
        let list = vec![
            Comment::new("a", "u", "t", Bucket::Negative),
            Comment::new("b", "u", "t", Bucket::Negative),
            Comment::new("c", "u", "t", Bucket::Negative),
        ];
        let service = ScriptedService::new();
        service.fail_for("b");
        let (cache, service, orchestrator) = setup(service);
        cache.set(&key(), list);

        let report = orchestrator.ensure_enriched("p1", Bucket::Negative, 2).await;

        assert_eq!((report.enriched, report.failed), (2, 1));
        let comments = cache.get(&key()).unwrap().comments;
        assert_eq!(comments[0].recommendations().len(), 2);
        assert!(comments[1].needs_enrichment());
        assert_eq!(comments[2].recommendations().len(), 2);

        service.heal("b");
        let retry = orchestrator.ensure_enriched("p1", Bucket::Negative, 2).await;
        assert_eq!(retry.requested, 1);
        assert!(!cache.get(&key()).unwrap().comments[1].needs_enrichment());
    }

    #[tokio::test]
    async fn absent_entry_is_a_noop() {
        let (_, service, orchestrator) = setup(ScriptedService::new());
        let report = orchestrator.ensure_enriched("p404", Bucket::Positive, 3).await;
        assert!(report.is_noop());
        assert!(orchestrator
            .ensure_enriched("  ", Bucket::Negative, 3)
            .await
            .is_noop());
        assert!(service.recommend_calls().is_empty());
    }

    #[tokio::test]
    async fn zero_limit_is_clamped_to_one() {
        let (cache, _, orchestrator) = setup(ScriptedService::new());
        orchestrator.ensure_enriched("p1", Bucket::Negative, 0).await;
        assert_eq!(cache.get(&key()).unwrap().comments[0].recommendations().len(), 1);
    }

    #[tokio::test]
    async fn manual_save_during_fanout_is_not_lost() {
        let (cache, service, orchestrator) = setup(ScriptedService::gated());
        let desk = ReplyDesk::new(cache.clone(), service.clone(), None);
        let running = {
            let orchestrator = orchestrator.clone();
            tokio::spawn(async move { orchestrator.ensure_enriched("p1", Bucket::Negative, 3).await })
        };
        while service.recommend_calls().len() < 2 {
            tokio::task::yield_now().await;
        }

        let typed = Recommendation::new("manual", "typed by hand");
        desk.save(&key(), "c1", typed.clone()).await.unwrap();
        service.release(2);
        let report = running.await.unwrap();

        assert_eq!(report.superseded, 1);
        assert_eq!(report.enriched, 1);
        let comments = cache.get(&key()).unwrap().comments;
        assert_eq!(comments[0].recommendations(), &[typed]);
        assert_eq!(comments[2].recommendations().len(), 3);
        assert_eq!(ids(&cache), vec!["c1", "c2", "c3"]);
    }

    #[tokio::test]
    async fn overlapping_runs_do_not_duplicate_calls() {
        let (cache, service, orchestrator) = setup(ScriptedService::gated());
        let first = {
            let orchestrator = orchestrator.clone();
            tokio::spawn(async move { orchestrator.ensure_enriched("p1", Bucket::Negative, 3).await })
        };
        while service.recommend_calls().len() < 2 {
            tokio::task::yield_now().await;
        }
        assert_eq!(orchestrator.in_flight(&key()).len(), 2);

        let second = orchestrator.ensure_enriched("p1", Bucket::Negative, 3).await;
        assert_eq!(second.requested, 0);
        assert_eq!(second.in_flight, 2);

        service.release(2);
        first.await.unwrap();
        assert_eq!(service.recommend_calls().len(), 2);
        assert!(orchestrator.in_flight(&key()).is_empty());
        assert!(cache
            .get(&key())
            .unwrap()
            .comments
            .iter()
            .all(|c| !c.needs_enrichment()));
    }

    #[tokio::test]
    async fn failures_are_logged_not_returned() {
        let sink = MemoryLogSink::new();
        let telemetry = CommentsTelemetry::builder("comments")
            .sink(Arc::new(sink.clone()))
            .build()
            .unwrap();
        let cache = CommentCache::new();
        cache.set(&key(), sample_list());
        let service = Arc::new(ScriptedService::new());
        service.fail_for("c3");
        let orchestrator = EnrichmentOrchestrator::new(cache, service, Some(telemetry));

        let report = orchestrator.ensure_enriched("p1", Bucket::Negative, 3).await;

        assert_eq!(report.failed, 1);
        let failures = sink.with_message("comments.enrichment.failed");
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].level, LogLevel::Warn);
        assert_eq!(failures[0].metadata["comment_id"], "c3");
        assert_eq!(sink.with_message("comments.enrichment.completed").len(), 1);
    }

    #[tokio::test]
    async fn results_landing_after_session_end_are_dropped() {
        let (cache, service, orchestrator) = setup(ScriptedService::gated());
        let running = {
            let orchestrator = orchestrator.clone();
            tokio::spawn(async move { orchestrator.ensure_enriched("p1", Bucket::Negative, 3).await })
        };
        while service.recommend_calls().len() < 2 {
            tokio::task::yield_now().await;
        }

        cache.clear();
        service.release(2);
        let report = running.await.unwrap();

        assert_eq!(report.dropped, 2);
        assert_eq!((report.enriched, report.superseded), (0, 0));
        assert!(cache.get(&key()).is_none());
        assert!(cache.keys().is_empty());
        assert!(orchestrator.in_flight(&key()).is_empty());
    }

    #[tokio::test]
    async fn completed_runs_publish_their_report() {
        let bus = Arc::new(MemoryEventBus::new(16));
        let telemetry = CommentsTelemetry::builder("comments")
            .event_publisher(bus.clone())
            .build()
            .unwrap();
        let cache = CommentCache::new();
        cache.set(&key(), sample_list());
        let orchestrator =
            EnrichmentOrchestrator::new(cache, Arc::new(ScriptedService::new()), Some(telemetry));

        orchestrator.ensure_enriched("p1", Bucket::Negative, 3).await;
        orchestrator.ensure_enriched("p1", Bucket::Negative, 3).await;

        let events = bus.events_for("comments.enrichment.completed");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].source, "comments");
        assert_eq!(events[0].payload["key"], "comments/p1/negative");
        assert_eq!(events[0].payload["report"]["requested"], 2);
        assert_eq!(events[0].payload["report"]["enriched"], 2);
    }
}
