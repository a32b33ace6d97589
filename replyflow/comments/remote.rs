use async_trait::async_trait;

use crate::{
    errors::RemoteError,
    model::{Bucket, Comment, Recommendation},
};

/// Remote operations the comments core depends on.
///
/// Bindings carry no cache logic; every call is an independent I/O boundary.
#[async_trait]
pub trait CommentService: Send + Sync {
    /// Fetches the comment list of a post for one bucket.
    async fn fetch_comments(
        &self,
        subject_id: &str,
        bucket: Bucket,
    ) -> Result<Vec<Comment>, RemoteError>;

    /// Requests up to `limit` suggested replies for one comment.
    async fn request_recommendations(
        &self,
        comment: &Comment,
        limit: usize,
    ) -> Result<Vec<Recommendation>, RemoteError>;

    /// Posts a reply under the comment on the origin platform.
    async fn post_reply_to_origin(
        &self,
        comment_id: &str,
        recommendation: &Recommendation,
    ) -> Result<(), RemoteError>;

    /// Persists an edited reply.
    async fn save_edited_recommendation(
        &self,
        recommendation: &Recommendation,
    ) -> Result<(), RemoteError>;
}

/// Scripted in-memory service used by unit tests across the crate.
#[cfg(test)]
pub(crate) mod scripted {
    use std::{
        collections::{HashMap, HashSet},
        sync::atomic::{AtomicUsize, Ordering},
    };

    use parking_lot::Mutex;
    use tokio::sync::Semaphore;

    use super::*;

    /// Deterministic [`CommentService`] with failure injection and an
    /// optional gate holding recommendation calls until released.
    #[derive(Default)]
    pub struct ScriptedService {
        lists: Mutex<HashMap<(String, Bucket), Vec<Comment>>>,
        failing: Mutex<HashSet<String>>,
        fetch_failure: Mutex<Option<RemoteError>>,
        save_failure: Mutex<Option<RemoteError>>,
        post_failure: Mutex<Option<RemoteError>>,
        gate: Option<Semaphore>,
        generation: AtomicUsize,
        fetches: AtomicUsize,
        recommend_calls: Mutex<Vec<String>>,
        saved: Mutex<Vec<Recommendation>>,
        posted: Mutex<Vec<(String, Recommendation)>>,
    }

    impl ScriptedService {
        pub fn new() -> Self {
            Self::default()
        }

        /// Recommendation calls block until [`Self::release`] adds permits.
        pub fn gated() -> Self {
            Self {
                gate: Some(Semaphore::new(0)),
                ..Self::default()
            }
        }

        pub fn with_list(self, subject: &str, bucket: Bucket, comments: Vec<Comment>) -> Self {
            self.lists
                .lock()
                .insert((subject.to_string(), bucket), comments);
            self
        }

        pub fn fail_for(&self, comment_id: &str) {
            self.failing.lock().insert(comment_id.to_string());
        }

        pub fn heal(&self, comment_id: &str) {
            self.failing.lock().remove(comment_id);
        }

        pub fn fail_fetch(&self, error: RemoteError) {
            *self.fetch_failure.lock() = Some(error);
        }

        pub fn fail_save(&self, error: Option<RemoteError>) {
            *self.save_failure.lock() = error;
        }

        pub fn fail_post(&self, error: RemoteError) {
            *self.post_failure.lock() = Some(error);
        }

        pub fn release(&self, permits: usize) {
            if let Some(gate) = &self.gate {
                gate.add_permits(permits);
            }
        }

        pub fn recommend_calls(&self) -> Vec<String> {
            self.recommend_calls.lock().clone()
        }

        pub fn fetch_count(&self) -> usize {
            self.fetches.load(Ordering::SeqCst)
        }

        pub fn saved(&self) -> Vec<Recommendation> {
            self.saved.lock().clone()
        }

        pub fn posted(&self) -> Vec<(String, Recommendation)> {
            self.posted.lock().clone()
        }
    }

    #[async_trait]
    impl CommentService for ScriptedService {
        async fn fetch_comments(
            &self,
            subject_id: &str,
            bucket: Bucket,
        ) -> Result<Vec<Comment>, RemoteError> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            tokio::task::yield_now().await;
            if let Some(err) = self.fetch_failure.lock().clone() {
                return Err(err);
            }
            self.lists
                .lock()
                .get(&(subject_id.to_string(), bucket))
                .cloned()
                .ok_or_else(|| RemoteError::NotFound(subject_id.to_string()))
        }

        async fn request_recommendations(
            &self,
            comment: &Comment,
            limit: usize,
        ) -> Result<Vec<Recommendation>, RemoteError> {
            self.recommend_calls.lock().push(comment.id.clone());
            if let Some(gate) = &self.gate {
                gate.acquire()
                    .await
                    .map_err(|err| RemoteError::Transport(err.to_string()))?
                    .forget();
            } else {
                tokio::task::yield_now().await;
            }
            if self.failing.lock().contains(&comment.id) {
                return Err(RemoteError::Generation(format!("model down for {}", comment.id)));
            }
            let generation = self.generation.fetch_add(1, Ordering::SeqCst);
            Ok((0..limit)
                .map(|n| {
                    Recommendation::new(
                        format!("{}-r{n}", comment.id),
                        format!("reply {n} to {} (gen {generation})", comment.id),
                    )
                })
                .collect())
        }

        async fn post_reply_to_origin(
            &self,
            comment_id: &str,
            recommendation: &Recommendation,
        ) -> Result<(), RemoteError> {
            if let Some(err) = self.post_failure.lock().clone() {
                return Err(err);
            }
            self.posted
                .lock()
                .push((comment_id.to_string(), recommendation.clone()));
            Ok(())
        }

        async fn save_edited_recommendation(
            &self,
            recommendation: &Recommendation,
        ) -> Result<(), RemoteError> {
            tokio::task::yield_now().await;
            if let Some(err) = self.save_failure.lock().clone() {
                return Err(err);
            }
            self.saved.lock().push(recommendation.clone());
            Ok(())
        }
    }

    /// `[c1(no recs), c2(has recs), c3(no recs)]`, all negative.
    pub fn sample_list() -> Vec<Comment> {
        vec![
            Comment::new("c1", "amy", "meh", Bucket::Negative),
            Comment::new("c2", "bob", "awful", Bucket::Negative).with_recommendations(vec![
                Recommendation::new("c2-old", "sorry to hear that"),
            ]),
            Comment::new("c3", "cy", "bad", Bucket::Negative),
        ]
    }
}
