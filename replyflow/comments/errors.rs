use thiserror::Error;

use crate::model::CacheKey;

/// Failures reported by a [`crate::remote::CommentService`] binding.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RemoteError {
    /// Subject (post) unknown upstream.
    #[error("not found: {0}")]
    NotFound(String),
    /// Caller lacks access.
    #[error("unauthorized: {0}")]
    Unauthorized(String),
    /// Upstream model failed to produce replies.
    #[error("reply generation failed: {0}")]
    Generation(String),
    /// Generation quota exhausted.
    #[error("rate limited: {0}")]
    RateLimited(String),
    /// Origin platform refused the reply.
    #[error("origin rejected reply: {0}")]
    OriginRejected(String),
    /// Server-side length/content validation failed.
    #[error("validation failed: {0}")]
    Validation(String),
    /// The underlying comment no longer exists upstream.
    #[error("conflict: {0}")]
    Conflict(String),
    /// Connection, timeout or decoding failure.
    #[error("transport error: {0}")]
    Transport(String),
}

/// Errors surfaced to callers of the comments core.
#[derive(Debug, Error)]
pub enum CommentsError {
    /// The query was issued without a subject id.
    #[error("subject id is required")]
    MissingSubject,
    /// Base list unavailable; the cache was not touched.
    #[error("fetching {key} failed: {source}")]
    Fetch {
        /// Requested list.
        key: CacheKey,
        /// Remote cause.
        #[source]
        source: RemoteError,
    },
    /// Regenerating one comment's replies failed; the cache was not touched.
    #[error("regenerating replies for {comment_id} failed: {source}")]
    Regeneration {
        /// Target comment.
        comment_id: String,
        /// Remote cause.
        #[source]
        source: RemoteError,
    },
    /// Persisting an edited reply failed; the local edit is kept.
    #[error("saving reply {recommendation_id} failed: {source}")]
    Save {
        /// Edited recommendation.
        recommendation_id: String,
        /// Remote cause.
        #[source]
        source: RemoteError,
    },
    /// Posting a reply to the origin platform failed.
    #[error("posting reply to {comment_id} failed: {source}")]
    Post {
        /// Target comment.
        comment_id: String,
        /// Remote cause.
        #[source]
        source: RemoteError,
    },
    /// Reply rejected locally before any remote call.
    #[error("reply has {length} characters, limit is {max}")]
    Validation {
        /// Characters in the rejected reply.
        length: usize,
        /// Configured maximum.
        max: usize,
    },
    /// Nothing is being edited, so there is nothing to save.
    #[error("no reply is being edited")]
    NothingToSave,
    /// The comment is not part of the cached list.
    #[error("comment {comment_id} not found in {key}")]
    CommentNotFound {
        /// List that was searched.
        key: CacheKey,
        /// Missing comment.
        comment_id: String,
    },
}

impl CommentsError {
    /// Remote cause, if the failure crossed the service boundary.
    #[must_use]
    pub const fn remote(&self) -> Option<&RemoteError> {
        match self {
            Self::Fetch { source, .. }
            | Self::Regeneration { source, .. }
            | Self::Save { source, .. }
            | Self::Post { source, .. } => Some(source),
            _ => None,
        }
    }
}
