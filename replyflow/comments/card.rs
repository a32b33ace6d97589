use crate::model::{Bucket, Comment, Recommendation, MAX_REPLY_CHARS};

/// Per-card view state: local reply drafts, the reply being edited and the
/// original/filtered text toggle.
///
/// Drafts live outside the cache; nothing here is written back until the
/// save path succeeds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommentCardState {
    comment_id: String,
    bucket: Bucket,
    drafts: Vec<Recommendation>,
    editing: Option<usize>,
    show_original: bool,
    out_of_sync: bool,
    max_reply_chars: usize,
}

impl CommentCardState {
    /// Starts from the comment's current recommendations.
    #[must_use]
    pub fn new(comment: &Comment) -> Self {
        Self {
            comment_id: comment.id.clone(),
            bucket: comment.bucket,
            drafts: comment.recommendations().to_vec(),
            editing: None,
            show_original: false,
            out_of_sync: false,
            max_reply_chars: MAX_REPLY_CHARS,
        }
    }

    /// Overrides the reply length limit.
    #[must_use]
    pub const fn with_max_reply_chars(mut self, max: usize) -> Self {
        self.max_reply_chars = max;
        self
    }

    /// Comment this card renders.
    #[must_use]
    pub fn comment_id(&self) -> &str {
        &self.comment_id
    }

    /// Local copies of the recommendations.
    #[must_use]
    pub fn drafts(&self) -> &[Recommendation] {
        &self.drafts
    }

    /// True while no recommendation has arrived yet (placeholder state).
    #[must_use]
    pub fn is_pending(&self) -> bool {
        self.drafts.is_empty()
    }

    /// Index of the reply being edited.
    #[must_use]
    pub const fn editing_index(&self) -> Option<usize> {
        self.editing
    }

    /// True when the cache changed while an edit was pending.
    #[must_use]
    pub const fn is_out_of_sync(&self) -> bool {
        self.out_of_sync
    }

    /// Shows the raw text of a negative comment instead of the filtered one.
    /// Positive comments always show raw text.
    pub fn set_show_original(&mut self, show: bool) {
        self.show_original = show && self.bucket == Bucket::Negative;
    }

    /// Text to render for `comment`.
    #[must_use]
    pub fn display_text<'a>(&self, comment: &'a Comment) -> &'a str {
        comment.display_text(self.show_original)
    }

    /// Opens reply `index` for editing. Returns false for unknown indexes.
    pub fn begin_edit(&mut self, index: usize) -> bool {
        if index >= self.drafts.len() {
            return false;
        }
        self.editing = Some(index);
        true
    }

    /// Replaces the text of the reply being edited.
    pub fn edit_text(&mut self, text: impl Into<String>) {
        if let Some(draft) = self.editing.and_then(|i| self.drafts.get_mut(i)) {
            draft.reply = text.into();
        }
    }

    /// Reply being edited.
    #[must_use]
    pub fn editing_draft(&self) -> Option<&Recommendation> {
        self.editing.and_then(|i| self.drafts.get(i))
    }

    /// Characters in the reply being edited.
    #[must_use]
    pub fn editing_len(&self) -> usize {
        self.editing_draft().map_or(0, Recommendation::char_count)
    }

    /// True when the edited reply exceeds the limit.
    #[must_use]
    pub fn is_over_limit(&self) -> bool {
        self.editing_len() > self.max_reply_chars
    }

    /// Whether the save action is enabled.
    #[must_use]
    pub fn can_save(&self) -> bool {
        self.editing_draft().is_some() && !self.is_over_limit()
    }

    /// Closes the editor after a successful save.
    pub fn mark_saved(&mut self) {
        self.editing = None;
        self.out_of_sync = false;
    }

    /// Drops local changes and adopts the comment's current recommendations.
    pub fn cancel_edit(&mut self, comment: &Comment) {
        self.editing = None;
        self.adopt(comment);
    }

    /// Reconciles with a new cache snapshot of the comment: adopts the new
    /// recommendations when nothing is being edited, otherwise keeps the
    /// pending edit and flags the card as out of sync.
    pub fn reconcile(&mut self, comment: &Comment) {
        if comment.id != self.comment_id {
            return;
        }
        if self.editing.is_none() {
            self.adopt(comment);
        } else if self.drafts_diverge(comment) {
            self.out_of_sync = true;
        }
    }

    fn adopt(&mut self, comment: &Comment) {
        self.drafts = comment.recommendations().to_vec();
        self.out_of_sync = false;
    }

    fn drafts_diverge(&self, comment: &Comment) -> bool {
        let fresh = comment.recommendations();
        fresh.len() != self.drafts.len()
            || fresh
                .iter()
                .zip(&self.drafts)
                .enumerate()
                .any(|(i, (f, d))| f.id != d.id || (Some(i) != self.editing && f.reply != d.reply))
    }
}
