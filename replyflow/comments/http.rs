use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, RequestBuilder, StatusCode, Url};
use serde::{de::DeserializeOwned, Deserialize};

use crate::{
    config::ApiSettings,
    errors::RemoteError,
    model::{Bucket, Comment, Recommendation},
    remote::CommentService,
};

/// Which operation a failed response belongs to; decides the fallback error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Operation {
    Fetch,
    Recommend,
    Post,
    Save,
}

/// Maps a non-success status to the contract error of `operation`.
fn classify(operation: Operation, status: StatusCode, body: String) -> RemoteError {
    let detail = if body.trim().is_empty() {
        status.to_string()
    } else {
        body
    };
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => RemoteError::Unauthorized(detail),
        StatusCode::NOT_FOUND => RemoteError::NotFound(detail),
        StatusCode::CONFLICT => RemoteError::Conflict(detail),
        StatusCode::TOO_MANY_REQUESTS => RemoteError::RateLimited(detail),
        StatusCode::BAD_REQUEST | StatusCode::UNPROCESSABLE_ENTITY => match operation {
            Operation::Post => RemoteError::OriginRejected(detail),
            _ => RemoteError::Validation(detail),
        },
        _ => match operation {
            Operation::Recommend => RemoteError::Generation(detail),
            Operation::Post => RemoteError::OriginRejected(detail),
            Operation::Fetch | Operation::Save => RemoteError::Transport(detail),
        },
    }
}

fn transport(err: &reqwest::Error) -> RemoteError {
    RemoteError::Transport(err.to_string())
}

/// Comment as returned by the list endpoint; the bucket is implied by the query.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireComment {
    id: String,
    username: String,
    text: String,
    #[serde(default)]
    filtered: Option<String>,
    timestamp: DateTime<Utc>,
    #[serde(default)]
    recommended_replies: Option<Vec<Recommendation>>,
}

impl WireComment {
    fn into_comment(self, bucket: Bucket) -> Comment {
        Comment {
            filtered: self.filtered.unwrap_or_else(|| self.text.clone()),
            id: self.id,
            username: self.username,
            text: self.text,
            timestamp: self.timestamp,
            bucket,
            recommended_replies: self.recommended_replies,
        }
    }
}

/// [`CommentService`] over the dashboard's JSON API.
#[derive(Debug, Clone)]
pub struct HttpCommentService {
    client: Client,
    base_url: Url,
    auth_token: Option<String>,
    timeout: Duration,
}

impl HttpCommentService {
    /// Builds a client from API settings.
    pub fn new(settings: &ApiSettings) -> Result<Self> {
        let base_url = Url::parse(settings.base_url.trim())
            .with_context(|| format!("invalid api.base_url '{}'", settings.base_url))?;
        if base_url.cannot_be_a_base() {
            bail!("api.base_url '{}' cannot carry a path", settings.base_url);
        }
        let client = Client::builder()
            .user_agent("replyflow-comments/0.1")
            .build()
            .context("building http client")?;
        Ok(Self {
            client,
            base_url,
            auth_token: settings.auth_token.clone(),
            timeout: Duration::from_millis(settings.timeout_ms),
        })
    }

    /// Appends percent-encoded path segments to the base URL.
    fn url(&self, segments: &[&str]) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    fn prepare(&self, request: RequestBuilder) -> RequestBuilder {
        let request = request.timeout(self.timeout);
        match &self.auth_token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn execute(
        &self,
        operation: Operation,
        request: RequestBuilder,
    ) -> Result<reqwest::Response, RemoteError> {
        let response = self
            .prepare(request)
            .send()
            .await
            .map_err(|err| transport(&err))?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(classify(operation, status, body))
    }

    async fn json<T: DeserializeOwned>(
        &self,
        operation: Operation,
        request: RequestBuilder,
    ) -> Result<T, RemoteError> {
        self.execute(operation, request)
            .await?
            .json::<T>()
            .await
            .map_err(|err| transport(&err))
    }
}

#[async_trait]
impl CommentService for HttpCommentService {
    async fn fetch_comments(
        &self,
        subject_id: &str,
        bucket: Bucket,
    ) -> Result<Vec<Comment>, RemoteError> {
        let request = self
            .client
            .get(self.url(&["comments", subject_id]))
            .query(&[("type", bucket.as_str())]);
        let wire: Vec<WireComment> = self.json(Operation::Fetch, request).await?;
        Ok(wire.into_iter().map(|c| c.into_comment(bucket)).collect())
    }

    async fn request_recommendations(
        &self,
        comment: &Comment,
        limit: usize,
    ) -> Result<Vec<Recommendation>, RemoteError> {
        let request = self
            .client
            .post(self.url(&["comments", "recommend"]))
            .query(&[("limit", limit)])
            .json(comment);
        self.json(Operation::Recommend, request).await
    }

    async fn post_reply_to_origin(
        &self,
        comment_id: &str,
        recommendation: &Recommendation,
    ) -> Result<(), RemoteError> {
        let request = self
            .client
            .post(self.url(&["comments", comment_id, "reply"]))
            .json(recommendation);
        self.execute(Operation::Post, request).await.map(drop)
    }

    async fn save_edited_recommendation(
        &self,
        recommendation: &Recommendation,
    ) -> Result<(), RemoteError> {
        let request = self
            .client
            .put(self.url(&["comments", "recommend"]))
            .json(recommendation);
        self.execute(Operation::Save, request).await.map(drop)
    }
}
