//! Session runtime wiring the cache, query, orchestrator and reply actions.

use std::sync::Arc;

use anyhow::{Context, Result};
use shared_event_bus::MemoryEventBus;

use crate::{
    card::CommentCardState,
    config::DashboardConfig,
    desk::ReplyDesk,
    errors::CommentsError,
    http::HttpCommentService,
    model::{Bucket, CacheKey, Comment, Recommendation},
    orchestrator::{EnrichmentOrchestrator, EnrichmentReport},
    query::{CommentQuery, LoadedComments},
    regenerate::RegenerationController,
    remote::CommentService,
    store::{CacheSubscription, CommentCache},
    telemetry::CommentsTelemetry,
};

/// One dashboard session: owns a cache instance for its lifetime and hands
/// out the components that read and write it.
#[derive(Debug)]
pub struct CommentsRuntime {
    config: DashboardConfig,
    cache: CommentCache,
    query: CommentQuery,
    orchestrator: EnrichmentOrchestrator,
    regenerator: RegenerationController,
    desk: ReplyDesk,
    events: Option<Arc<MemoryEventBus>>,
}

impl CommentsRuntime {
    /// Starts a session over an injected service. Logs go to
    /// `logging.path` when set; lifecycle events go to a session bus
    /// readable through [`CommentsRuntime::events`].
    pub fn start(config: DashboardConfig, service: Arc<dyn CommentService>) -> Result<Self> {
        let events = Arc::new(MemoryEventBus::new(config.logging.event_backlog));
        let mut builder = CommentsTelemetry::builder("comments")
            .min_level(config.logging.min_level()?)
            .event_publisher(events.clone());
        if let Some(path) = &config.logging.path {
            builder = builder.log_path(path);
        }
        let telemetry = builder.build().context("opening comments log")?;
        let mut runtime = Self::with_telemetry(config, service, Some(telemetry));
        runtime.events = Some(events);
        Ok(runtime)
    }

    /// Starts a session against the HTTP API configured in `config.api`.
    pub fn from_config(config: DashboardConfig) -> Result<Self> {
        let api = config
            .api
            .as_ref()
            .context("dashboard config has no [api] section")?;
        let service = HttpCommentService::new(api)?;
        Self::start(config, Arc::new(service))
    }

    /// Starts a session with caller-owned telemetry; events reach only the
    /// publisher configured on it.
    #[must_use]
    pub fn with_telemetry(
        config: DashboardConfig,
        service: Arc<dyn CommentService>,
        telemetry: Option<CommentsTelemetry>,
    ) -> Self {
        let cache = CommentCache::new();
        let orchestrator =
            EnrichmentOrchestrator::new(cache.clone(), Arc::clone(&service), telemetry.clone());
        let query = CommentQuery::new(
            cache.clone(),
            Arc::clone(&service),
            orchestrator.clone(),
            config.cache.stale_after(),
            telemetry.clone(),
        );
        let regenerator =
            RegenerationController::new(cache.clone(), Arc::clone(&service), telemetry.clone());
        let desk = ReplyDesk::new(cache.clone(), service, telemetry)
            .with_max_reply_chars(config.replies.max_reply_chars);
        Self {
            config,
            cache,
            query,
            orchestrator,
            regenerator,
            desk,
            events: None,
        }
    }

    /// Session configuration.
    #[must_use]
    pub const fn config(&self) -> &DashboardConfig {
        &self.config
    }

    /// Shared cache.
    #[must_use]
    pub const fn cache(&self) -> &CommentCache {
        &self.cache
    }

    /// Fetch-through query binding.
    #[must_use]
    pub const fn query(&self) -> &CommentQuery {
        &self.query
    }

    /// Enrichment orchestrator.
    #[must_use]
    pub const fn orchestrator(&self) -> &EnrichmentOrchestrator {
        &self.orchestrator
    }

    /// Save/post actions.
    #[must_use]
    pub const fn desk(&self) -> &ReplyDesk {
        &self.desk
    }

    /// Fetches a list and enriches it in the background with the configured
    /// fan-out limit.
    pub async fn load(
        &self,
        subject_id: &str,
        bucket: Bucket,
    ) -> Result<LoadedComments, CommentsError> {
        self.query
            .load(subject_id, bucket, self.config.replies.fanout_limit)
            .await
    }

    /// Enriches the cached list with the configured fan-out limit.
    pub async fn ensure_enriched(&self, subject_id: &str, bucket: Bucket) -> EnrichmentReport {
        self.orchestrator
            .ensure_enriched(subject_id, bucket, self.config.replies.fanout_limit)
            .await
    }

    /// Regenerates one comment's replies with the configured limit.
    pub async fn regenerate(
        &self,
        comment_id: &str,
        key: &CacheKey,
    ) -> Result<Vec<Recommendation>, CommentsError> {
        self.regenerator
            .regenerate(comment_id, key, self.config.replies.regenerate_limit)
            .await
    }

    /// View state for a comment card, using the configured length limit.
    #[must_use]
    pub fn card(&self, comment: &Comment) -> CommentCardState {
        CommentCardState::new(comment).with_max_reply_chars(self.config.replies.max_reply_chars)
    }

    /// Session event bus; `None` for sessions built with
    /// [`CommentsRuntime::with_telemetry`].
    #[must_use]
    pub fn events(&self) -> Option<&MemoryEventBus> {
        self.events.as_deref()
    }

    /// Observes one cached list.
    #[must_use]
    pub fn subscribe(&self, key: &CacheKey) -> CacheSubscription {
        self.cache.subscribe(key)
    }

    /// Ends the session, dropping every cached list.
    pub fn end_session(self) {
        self.cache.clear();
    }
}
