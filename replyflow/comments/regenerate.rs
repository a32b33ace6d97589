use std::{fmt, sync::Arc};

use serde_json::json;
use shared_logging::LogLevel;

use crate::{
    errors::CommentsError,
    merge,
    model::{CacheKey, Recommendation},
    remote::CommentService,
    store::CommentCache,
    telemetry::{event_to, log_to, CommentsTelemetry},
};

/// User-triggered replacement of one comment's recommendations.
#[derive(Clone)]
pub struct RegenerationController {
    cache: CommentCache,
    service: Arc<dyn CommentService>,
    telemetry: Option<CommentsTelemetry>,
}

impl fmt::Debug for RegenerationController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegenerationController").finish_non_exhaustive()
    }
}

impl RegenerationController {
    /// Creates a controller.
    #[must_use]
    pub fn new(
        cache: CommentCache,
        service: Arc<dyn CommentService>,
        telemetry: Option<CommentsTelemetry>,
    ) -> Self {
        Self {
            cache,
            service,
            telemetry,
        }
    }

    /// Requests a fresh set of up to `limit` replies for `comment_id`, even if
    /// it already has some, and swaps them into the cached list. Other
    /// comments are untouched; on failure nothing is written. Results that
    /// arrive after the list left the cache are discarded as
    /// [`CommentsError::CommentNotFound`].
    pub async fn regenerate(
        &self,
        comment_id: &str,
        key: &CacheKey,
        limit: usize,
    ) -> Result<Vec<Recommendation>, CommentsError> {
        let comment = self
            .cache
            .get(key)
            .and_then(|entry| entry.comments.into_iter().find(|c| c.id == comment_id))
            .ok_or_else(|| CommentsError::CommentNotFound {
                key: key.clone(),
                comment_id: comment_id.to_string(),
            })?;

        let recommendations = match self
            .service
            .request_recommendations(&comment, limit.max(1))
            .await
        {
            Ok(recommendations) => recommendations,
            Err(source) => {
                log_to(
                    self.telemetry.as_ref(),
                    LogLevel::Error,
                    "comments.regeneration.failed",
                    &json!({ "key": key.to_string(), "comment_id": comment_id, "reason": source.to_string() }),
                );
                return Err(CommentsError::Regeneration {
                    comment_id: comment_id.to_string(),
                    source,
                });
            }
        };

        let written = self.cache.update_existing(key, |current| {
            merge::replace_recommendations(current, comment_id, recommendations.clone())
        });
        if written.is_none() {
            return Err(CommentsError::CommentNotFound {
                key: key.clone(),
                comment_id: comment_id.to_string(),
            });
        }
        event_to(
            self.telemetry.as_ref(),
            "comments.regeneration.completed",
            json!({ "key": key.to_string(), "comment_id": comment_id, "count": recommendations.len() }),
        )
        .await;
        Ok(recommendations)
    }
}
