#![deny(
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    missing_docs,
    rust_2018_idioms
)]

//! Comment cache with asynchronous AI reply enrichment.
//!
//! Lists of comments are cached per (post, sentiment bucket). Comments that
//! lack suggested replies are enriched by a parallel fan-out whose results
//! are merged back by comment id, so neither slower calls nor concurrent
//! edits overwrite one another.

/// Comments, recommendations and cache keys.
#[path = "../model.rs"]
pub mod model;

/// Error taxonomy.
#[path = "../errors.rs"]
pub mod errors;

/// Remote service contract.
#[path = "../remote.rs"]
pub mod remote;

/// HTTP binding of the remote contract.
#[path = "../http.rs"]
pub mod http;

/// Merge-by-id helpers.
#[path = "../merge.rs"]
pub mod merge;

/// Session cache store.
#[path = "../store.rs"]
pub mod store;

/// Fetch-through query binding.
#[path = "../query.rs"]
pub mod query;

/// Bulk enrichment orchestrator.
#[path = "../orchestrator.rs"]
pub mod orchestrator;

/// Single-comment regeneration.
#[path = "../regenerate.rs"]
pub mod regenerate;

/// Save and post actions.
#[path = "../desk.rs"]
pub mod desk;

/// Per-card view state.
#[path = "../card.rs"]
pub mod card;

/// TOML configuration.
#[path = "../config.rs"]
pub mod config;

/// Telemetry helpers.
#[path = "../telemetry.rs"]
pub mod telemetry;

/// Session runtime entry point.
#[path = "../main.rs"]
pub mod runtime;

pub use card::CommentCardState;
pub use config::DashboardConfig;
pub use desk::{validate_reply, ReplyDesk};
pub use errors::{CommentsError, RemoteError};
pub use http::HttpCommentService;
pub use model::{Bucket, CacheKey, Comment, Recommendation, MAX_REPLY_CHARS};
pub use orchestrator::{EnrichmentOrchestrator, EnrichmentReport};
pub use query::{CommentQuery, LoadedComments};
pub use regenerate::RegenerationController;
pub use remote::CommentService;
pub use runtime::CommentsRuntime;
pub use store::{CacheEntry, CacheSubscription, CommentCache};
pub use telemetry::{CommentsTelemetry, CommentsTelemetryBuilder};
