//! Merge-by-id patches applied to the freshest cached list.
//!
//! Every writer patches only the slots it owns and never reorders the list.

use std::collections::HashMap;

use crate::model::{Comment, Recommendation};

/// Fills recommendations for comments that still lack them.
///
/// Slots that gained recommendations since the patches were computed are
/// left alone. Returns the merged list and how many patches landed.
#[must_use]
pub fn fill_missing(
    mut current: Vec<Comment>,
    patches: &HashMap<String, Vec<Recommendation>>,
) -> (Vec<Comment>, usize) {
    let mut applied = 0;
    for comment in current.iter_mut().filter(|c| c.needs_enrichment()) {
        if let Some(recommendations) = patches.get(&comment.id) {
            comment.recommended_replies = Some(recommendations.clone());
            applied += 1;
        }
    }
    (current, applied)
}

/// Replaces one comment's recommendations, whatever they were.
#[must_use]
pub fn replace_recommendations(
    mut current: Vec<Comment>,
    comment_id: &str,
    recommendations: Vec<Recommendation>,
) -> Vec<Comment> {
    if let Some(comment) = current.iter_mut().find(|c| c.id == comment_id) {
        comment.recommended_replies = Some(recommendations);
    }
    current
}

/// Writes a single edited recommendation into its comment, matching by
/// recommendation id. Unknown ids are appended so the saved text stays visible.
#[must_use]
pub fn patch_recommendation(
    mut current: Vec<Comment>,
    comment_id: &str,
    edited: &Recommendation,
) -> Vec<Comment> {
    if let Some(comment) = current.iter_mut().find(|c| c.id == comment_id) {
        let replies = comment.recommended_replies.get_or_insert_with(Vec::new);
        match replies.iter_mut().find(|r| r.id == edited.id) {
            Some(slot) => slot.reply.clone_from(&edited.reply),
            None => replies.push(edited.clone()),
        }
    }
    current
}

/// Keeps recommendations from `previous` for refetched comments that arrive
/// without any.
#[must_use]
pub fn carry_over(previous: &[Comment], mut fresh: Vec<Comment>) -> Vec<Comment> {
    let known: HashMap<&str, &[Recommendation]> = previous
        .iter()
        .filter(|c| !c.needs_enrichment())
        .map(|c| (c.id.as_str(), c.recommendations()))
        .collect();
    for comment in fresh.iter_mut().filter(|c| c.needs_enrichment()) {
        if let Some(recommendations) = known.get(comment.id.as_str()) {
            comment.recommended_replies = Some(recommendations.to_vec());
        }
    }
    fresh
}
