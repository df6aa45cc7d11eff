//! Storage contract and its two backends.
//!
//! # Responsibility
//! - Define the single `NewsRepository` contract consumed by loaders and
//!   request handlers.
//! - Provide an in-memory and a SQLite implementation with identical
//!   observable behavior.
//!
//! # Invariants
//! - Lookups on missing keys return `None` or an empty `Vec`, never an error.
//! - A failed write leaves every collection as it was before the call.
//! - Natural article order is `(date, id)` ascending in both backends.
//! - "Last" article means greatest id in both backends.

pub mod memory_repo;
pub mod sqlite_repo;

use crate::db::DbError;
use crate::model::{Article, ArticleId, Comment, Tag, User, ValidationError};
use chrono::NaiveDate;
use std::error::Error;
use std::fmt::{Display, Formatter};

pub use memory_repo::MemoryNewsRepository;
pub use sqlite_repo::SqliteNewsRepository;

pub type RepoResult<T> = Result<T, RepoError>;

/// Uniqueness violation rejected by a backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DuplicateKey {
    ArticleId(ArticleId),
    UserName(String),
}

impl Display for DuplicateKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ArticleId(id) => write!(f, "article id {id} already exists"),
            Self::UserName(name) => write!(f, "user name `{name}` already exists"),
        }
    }
}

/// Error returned by storage contract operations.
#[derive(Debug)]
pub enum RepoError {
    /// A required relationship is missing or the record shape is invalid.
    Validation(ValidationError),
    /// A uniqueness invariant would be violated.
    DuplicateKey(DuplicateKey),
    /// The SQLite engine could not be reached or a unit of work failed.
    StorageUnavailable(DbError),
    /// Persisted rows cannot be converted back into records.
    InvalidData(String),
    /// A previous writer panicked while holding the in-memory store lock.
    LockPoisoned(&'static str),
}

impl Display for RepoError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Validation(err) => write!(f, "validation failed: {err}"),
            Self::DuplicateKey(key) => write!(f, "duplicate key: {key}"),
            Self::StorageUnavailable(err) => write!(f, "storage unavailable: {err}"),
            Self::InvalidData(message) => write!(f, "invalid persisted data: {message}"),
            Self::LockPoisoned(what) => write!(f, "lock poisoned: {what}"),
        }
    }
}

impl Error for RepoError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Validation(err) => Some(err),
            Self::StorageUnavailable(err) => Some(err),
            Self::DuplicateKey(_) => None,
            Self::InvalidData(_) => None,
            Self::LockPoisoned(_) => None,
        }
    }
}

impl From<ValidationError> for RepoError {
    fn from(value: ValidationError) -> Self {
        Self::Validation(value)
    }
}

impl From<DbError> for RepoError {
    fn from(value: DbError) -> Self {
        Self::StorageUnavailable(value)
    }
}

impl From<rusqlite::Error> for RepoError {
    fn from(value: rusqlite::Error) -> Self {
        Self::StorageUnavailable(DbError::Sqlite(value))
    }
}

/// Storage contract shared by every backend.
pub trait NewsRepository: Send + Sync {
    /// Stores a user. Fails with `DuplicateKey` when the name is taken.
    fn add_user(&self, user: &User) -> RepoResult<()>;
    fn get_user(&self, user_name: &str) -> RepoResult<Option<User>>;

    /// Stores an article and associates it with the tags it names.
    ///
    /// Returns the stored id; a missing id is assigned as `max id + 1`.
    fn add_article(&self, article: &Article) -> RepoResult<ArticleId>;
    fn get_article(&self, id: ArticleId) -> RepoResult<Option<Article>>;
    /// Articles on exactly `date`, or every article when `date` is `None`,
    /// in natural order.
    fn get_articles_by_date(&self, date: Option<NaiveDate>) -> RepoResult<Vec<Article>>;
    fn get_number_of_articles(&self) -> RepoResult<usize>;
    /// Earliest article in natural order.
    fn get_first_article(&self) -> RepoResult<Option<Article>>;
    /// Article with the greatest id.
    fn get_last_article(&self) -> RepoResult<Option<Article>>;
    /// Stored articles in request order; unknown and repeated ids are dropped.
    fn get_articles_by_id(&self, ids: &[ArticleId]) -> RepoResult<Vec<Article>>;
    /// Ascending ids of articles tagged by the first tag named `tag_name`.
    fn get_article_ids_for_tag(&self, tag_name: &str) -> RepoResult<Vec<ArticleId>>;
    /// Nearest stored date strictly before `article.date`.
    ///
    /// `None` when no such date exists or no stored article has `article.date`.
    fn get_date_of_previous_article(&self, article: &Article) -> RepoResult<Option<NaiveDate>>;
    /// Nearest stored date strictly after `article.date`.
    ///
    /// `None` when no such date exists or no stored article has `article.date`.
    fn get_date_of_next_article(&self, article: &Article) -> RepoResult<Option<NaiveDate>>;

    /// Stores a tag and associates it with every id in `tagged_articles`.
    fn add_tag(&self, tag: &Tag) -> RepoResult<()>;
    /// Tags in insertion order.
    fn get_tags(&self) -> RepoResult<Vec<Tag>>;

    /// Stores a comment and appends it to its user's and article's comments.
    fn add_comment(&self, comment: &Comment) -> RepoResult<()>;
    /// Comments in insertion order.
    fn get_comments(&self) -> RepoResult<Vec<Comment>>;
}

/// Keeps the first occurrence of each id, preserving request order.
pub(crate) fn dedup_ids(ids: &[ArticleId]) -> Vec<ArticleId> {
    let mut seen = std::collections::HashSet::with_capacity(ids.len());
    ids.iter().copied().filter(|id| seen.insert(*id)).collect()
}
