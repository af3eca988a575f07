/// Comment thread - the comment list under one post
///
/// Posting never merges locally: after a successful insert the whole list is
/// fetched again so the thread always shows what the store holds.
use crate::config::CommentsConfig;
use crate::db::ContentRepository;
use crate::error::{ContentError, Result};
use crate::models::{Comment, NewComment};
use tracing::{info, warn};
use uuid::Uuid;

/// What the thread accepts as comment content
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CommentPolicy {
    /// Refuse content that is empty after trimming
    pub reject_blank: bool,
}

impl From<&CommentsConfig> for CommentPolicy {
    fn from(config: &CommentsConfig) -> Self {
        Self {
            reject_blank: config.reject_blank,
        }
    }
}

/// A comment with its author's username, when the profile resolves
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommentView {
    pub comment: Comment,
    pub author: Option<String>,
}

pub struct CommentThread {
    repo: ContentRepository,
    post_id: i64,
    policy: CommentPolicy,
    comments: Vec<CommentView>,
}

impl CommentThread {
    pub fn new(repo: ContentRepository, post_id: i64) -> Self {
        Self::with_policy(repo, post_id, CommentPolicy::default())
    }

    pub fn with_policy(repo: ContentRepository, post_id: i64, policy: CommentPolicy) -> Self {
        Self {
            repo,
            post_id,
            policy,
            comments: Vec::new(),
        }
    }

    pub fn post_id(&self) -> i64 {
        self.post_id
    }

    /// Comments as of the last load, newest first
    pub fn comments(&self) -> &[CommentView] {
        &self.comments
    }

    pub async fn load(&mut self) -> Result<&[CommentView]> {
        let comments = self.repo.fetch_comments(self.post_id).await?;
        let authors: Vec<Uuid> = comments.iter().map(|c| c.user_id).collect();
        let usernames = self.repo.fetch_usernames(&authors).await?;

        self.comments = comments
            .into_iter()
            .map(|comment| CommentView {
                author: usernames.get(&comment.user_id).cloned(),
                comment,
            })
            .collect();
        Ok(&self.comments)
    }

    /// Store a comment by `user_id`, then reload the thread.
    ///
    /// A failed reload after a successful insert is logged and the stored
    /// comment is still returned; the list stays as it was.
    pub async fn post_comment(&mut self, user_id: Uuid, content: &str) -> Result<Comment> {
        if self.policy.reject_blank && content.trim().is_empty() {
            return Err(ContentError::Validation(
                "content: must not be empty".to_string(),
            ));
        }

        let comment = self
            .repo
            .insert_comment(NewComment {
                user_id,
                post_id: self.post_id,
                content: content.to_string(),
            })
            .await?;
        info!(post_id = self.post_id, comment_id = comment.id, %user_id, "comment posted");

        if let Err(err) = self.load().await {
            warn!(post_id = self.post_id, error = %err, "comment thread reload failed");
        }
        Ok(comment)
    }
}
