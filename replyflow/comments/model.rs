use std::{fmt, str::FromStr};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Upper bound on a reply's length, counted in characters.
pub const MAX_REPLY_CHARS: usize = 2200;

/// Sentiment partition of a post's comments.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Bucket {
    /// Comments classified as positive.
    Positive,
    /// Comments classified as negative; shown filtered by default.
    Negative,
}

impl Bucket {
    /// Wire representation (`positive` / `negative`).
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Positive => "positive",
            Self::Negative => "negative",
        }
    }
}

impl fmt::Display for Bucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Bucket {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw {
            "positive" => Ok(Self::Positive),
            "negative" => Ok(Self::Negative),
            other => Err(format!("unknown bucket '{other}'")),
        }
    }
}

/// Identity of a cached comment list.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct CacheKey {
    /// Post the comments belong to.
    pub subject_id: String,
    /// Sentiment bucket.
    pub bucket: Bucket,
}

impl CacheKey {
    /// Creates a key.
    #[must_use]
    pub fn new(subject_id: impl Into<String>, bucket: Bucket) -> Self {
        Self {
            subject_id: subject_id.into(),
            bucket,
        }
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "comments/{}/{}", self.subject_id, self.bucket)
    }
}

/// AI-suggested reply attached to a comment.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Recommendation {
    /// Identifier scoped to the parent comment.
    pub id: String,
    /// Reply text, editable by the user.
    pub reply: String,
}

impl Recommendation {
    /// Creates a recommendation.
    #[must_use]
    pub fn new(id: impl Into<String>, reply: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            reply: reply.into(),
        }
    }

    /// Reply length in characters.
    #[must_use]
    pub fn char_count(&self) -> usize {
        self.reply.chars().count()
    }

    /// Whether the reply fits within `max` characters.
    #[must_use]
    pub fn within_limit(&self, max: usize) -> bool {
        self.char_count() <= max
    }
}

/// A comment fetched from the origin platform.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Comment {
    /// Unique identifier.
    pub id: String,
    /// Author handle.
    pub username: String,
    /// Raw text as posted.
    pub text: String,
    /// Sanitized variant of `text`.
    pub filtered: String,
    /// Posting time.
    pub timestamp: DateTime<Utc>,
    /// Sentiment bucket the comment was fetched under.
    pub bucket: Bucket,
    /// Suggested replies; `None` until enriched.
    #[serde(default)]
    pub recommended_replies: Option<Vec<Recommendation>>,
}

impl Comment {
    /// Creates a comment without recommendations.
    #[must_use]
    pub fn new(
        id: impl Into<String>,
        username: impl Into<String>,
        text: impl Into<String>,
        bucket: Bucket,
    ) -> Self {
        let text = text.into();
        Self {
            id: id.into(),
            username: username.into(),
            filtered: text.clone(),
            text,
            timestamp: Utc::now(),
            bucket,
            recommended_replies: None,
        }
    }

    /// Sets the sanitized text.
    #[must_use]
    pub fn with_filtered(mut self, filtered: impl Into<String>) -> Self {
        self.filtered = filtered.into();
        self
    }

    /// Sets the recommendations.
    #[must_use]
    pub fn with_recommendations(mut self, recommendations: Vec<Recommendation>) -> Self {
        self.recommended_replies = Some(recommendations);
        self
    }

    /// Recommendations, empty when none are attached.
    #[must_use]
    pub fn recommendations(&self) -> &[Recommendation] {
        self.recommended_replies.as_deref().unwrap_or_default()
    }

    /// True when recommendations are absent or empty.
    #[must_use]
    pub fn needs_enrichment(&self) -> bool {
        self.recommendations().is_empty()
    }

    /// Text to display. Negative comments show the filtered variant unless
    /// the original is explicitly requested.
    #[must_use]
    pub fn display_text(&self, show_original: bool) -> &str {
        match self.bucket {
            Bucket::Negative if !show_original => &self.filtered,
            _ => &self.text,
        }
    }

    /// Posting date as `YYYY-MM-DD`.
    #[must_use]
    pub fn posted_on(&self) -> String {
        self.timestamp.format("%Y-%m-%d").to_string()
    }
}
