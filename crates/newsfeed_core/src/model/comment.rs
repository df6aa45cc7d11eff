//! Comment record.
//!
//! # Invariants
//! - A stored comment always names its user and its article.
//! - `comment_text` is never empty.

use crate::model::article::{Article, ArticleId};
use crate::model::user::User;
use crate::model::ValidationError;
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

/// Reader comment on one article.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Comment {
    pub comment_text: String,
    /// Author, referenced by `User::user_name`.
    pub user_name: Option<String>,
    /// Target article, referenced by id.
    pub article_id: Option<ArticleId>,
    pub timestamp: NaiveDateTime,
}

impl Comment {
    /// Checks the record-level invariants that do not need a backend.
    ///
    /// # Errors
    /// - `EmptyCommentText` when the text is blank.
    /// - `MissingCommentUser` / `MissingCommentArticle` when a reference is absent.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.comment_text.trim().is_empty() {
            return Err(ValidationError::EmptyCommentText);
        }
        if self.user_name.is_none() {
            return Err(ValidationError::MissingCommentUser);
        }
        if self.article_id.is_none() {
            return Err(ValidationError::MissingCommentArticle);
        }
        Ok(())
    }
}

/// Builds a comment already associated with `user` and `article`.
///
/// The backend appends it to both owners when `add_comment` succeeds.
pub fn make_comment(
    comment_text: impl Into<String>,
    user: &User,
    article: &Article,
    timestamp: NaiveDateTime,
) -> Comment {
    Comment {
        comment_text: comment_text.into(),
        user_name: Some(user.user_name.clone()),
        article_id: article.id,
        timestamp,
    }
}
