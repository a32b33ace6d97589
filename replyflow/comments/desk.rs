use std::{fmt, sync::Arc};

use serde_json::json;
use shared_logging::LogLevel;

use crate::{
    card::CommentCardState,
    errors::CommentsError,
    merge,
    model::{CacheKey, Recommendation, MAX_REPLY_CHARS},
    remote::CommentService,
    store::CommentCache,
    telemetry::{event_to, log_to, CommentsTelemetry},
};

/// Rejects replies longer than `max` characters.
pub fn validate_reply(recommendation: &Recommendation, max: usize) -> Result<(), CommentsError> {
    let length = recommendation.char_count();
    if length > max {
        return Err(CommentsError::Validation { length, max });
    }
    Ok(())
}

/// Save and post actions for individual replies.
#[derive(Clone)]
pub struct ReplyDesk {
    cache: CommentCache,
    service: Arc<dyn CommentService>,
    max_reply_chars: usize,
    telemetry: Option<CommentsTelemetry>,
}

impl fmt::Debug for ReplyDesk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReplyDesk")
            .field("max_reply_chars", &self.max_reply_chars)
            .finish_non_exhaustive()
    }
}

impl ReplyDesk {
    /// Creates a desk with the default reply length limit.
    #[must_use]
    pub fn new(
        cache: CommentCache,
        service: Arc<dyn CommentService>,
        telemetry: Option<CommentsTelemetry>,
    ) -> Self {
        Self {
            cache,
            service,
            max_reply_chars: MAX_REPLY_CHARS,
            telemetry,
        }
    }

    /// Overrides the reply length limit.
    #[must_use]
    pub const fn with_max_reply_chars(mut self, max: usize) -> Self {
        self.max_reply_chars = max;
        self
    }

    /// Reply length limit enforced before saving.
    #[must_use]
    pub const fn max_reply_chars(&self) -> usize {
        self.max_reply_chars
    }

    /// Persists an edited reply and patches that single recommendation in
    /// the cached list. Oversized replies are rejected before any remote
    /// call; remote failures leave the cache untouched. A list no longer
    /// cached is not recreated.
    pub async fn save(
        &self,
        key: &CacheKey,
        comment_id: &str,
        recommendation: Recommendation,
    ) -> Result<(), CommentsError> {
        validate_reply(&recommendation, self.max_reply_chars)?;
        if let Err(source) = self
            .service
            .save_edited_recommendation(&recommendation)
            .await
        {
            log_to(
                self.telemetry.as_ref(),
                LogLevel::Error,
                "comments.reply.save_failed",
                &json!({ "comment_id": comment_id, "recommendation_id": recommendation.id, "reason": source.to_string() }),
            );
            return Err(CommentsError::Save {
                recommendation_id: recommendation.id,
                source,
            });
        }
        if self
            .cache
            .update_existing(key, |current| {
                merge::patch_recommendation(current, comment_id, &recommendation)
            })
            .is_none()
        {
            log_to(
                self.telemetry.as_ref(),
                LogLevel::Debug,
                "comments.reply.saved_uncached",
                &json!({ "key": key.to_string(), "recommendation_id": recommendation.id }),
            );
        }
        event_to(
            self.telemetry.as_ref(),
            "comments.reply.saved",
            json!({ "key": key.to_string(), "comment_id": comment_id, "recommendation_id": recommendation.id }),
        )
        .await;
        Ok(())
    }

    /// Saves the reply currently edited in `state`. On success the editor
    /// closes; on any failure the draft is kept as typed.
    pub async fn save_draft(
        &self,
        key: &CacheKey,
        state: &mut CommentCardState,
    ) -> Result<Recommendation, CommentsError> {
        let draft = state
            .editing_draft()
            .cloned()
            .ok_or(CommentsError::NothingToSave)?;
        let comment_id = state.comment_id().to_string();
        self.save(key, &comment_id, draft.clone()).await?;
        state.mark_saved();
        Ok(draft)
    }

    /// Posts a reply under the comment on the origin platform. The cache is
    /// not modified.
    pub async fn post_to_origin(
        &self,
        comment_id: &str,
        recommendation: &Recommendation,
    ) -> Result<(), CommentsError> {
        match self
            .service
            .post_reply_to_origin(comment_id, recommendation)
            .await
        {
            Ok(()) => {
                event_to(
                    self.telemetry.as_ref(),
                    "comments.reply.posted",
                    json!({ "comment_id": comment_id, "recommendation_id": recommendation.id }),
                )
                .await;
                Ok(())
            }
            Err(source) => {
                log_to(
                    self.telemetry.as_ref(),
                    LogLevel::Error,
                    "comments.reply.post_failed",
                    &json!({ "comment_id": comment_id, "reason": source.to_string() }),
                );
                Err(CommentsError::Post {
                    comment_id: comment_id.to_string(),
                    source,
                })
            }
        }
    }
}
