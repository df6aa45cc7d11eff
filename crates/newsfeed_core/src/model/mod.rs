//! Domain records for the news store.
//!
//! # Responsibility
//! - Define the plain records shared by every storage backend.
//! - Provide association helpers that keep both sides of a link consistent.
//!
//! # Invariants
//! - Associations are expressed by keys (tag names, article ids, user names),
//!   never by shared ownership.
//! - A comment is only valid when it names both its user and its article.

pub mod article;
pub mod comment;
pub mod tag;
pub mod user;

use std::error::Error;
use std::fmt::{Display, Formatter};

pub use article::{Article, ArticleId};
pub use comment::{make_comment, Comment};
pub use tag::{make_tag_association, Tag};
pub use user::User;

/// Relationship or shape violations detected before a write is applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// Comment text is empty or whitespace only.
    EmptyCommentText,
    /// Comment does not name its author.
    MissingCommentUser,
    /// Comment does not name the article it belongs to.
    MissingCommentArticle,
    /// Referenced user is not stored in the backend.
    UnknownUser(String),
    /// Referenced article is not stored in the backend.
    UnknownArticle(ArticleId),
    /// Referenced tag is not stored in the backend.
    UnknownTag(String),
    /// Record arrived with comments attached; comments go through `add_comment`.
    UnexpectedComments,
    /// No id is left above the greatest stored article id.
    IdSpaceExhausted,
}

impl Display for ValidationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::EmptyCommentText => write!(f, "comment text must not be empty"),
            Self::MissingCommentUser => write!(f, "comment has no user"),
            Self::MissingCommentArticle => write!(f, "comment has no article"),
            Self::UnknownUser(name) => write!(f, "user not found: `{name}`"),
            Self::UnknownArticle(id) => write!(f, "article not found: {id}"),
            Self::UnknownTag(name) => write!(f, "tag not found: `{name}`"),
            Self::UnexpectedComments => {
                write!(f, "comments must be recorded through add_comment")
            }
            Self::IdSpaceExhausted => write!(f, "article id space exhausted"),
        }
    }
}

impl Error for ValidationError {}
