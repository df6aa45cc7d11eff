//! Article record.
//!
//! # Responsibility
//! - Hold article fields and the names of tags attached to it.
//! - Define the natural order used by date-based navigation.
//!
//! # Invariants
//! - Natural order is `(date, id)` ascending; ids are unique per backend,
//!   so sort position is deterministic.
//! - `comments` is append-only and ordered by insertion.

use crate::model::comment::Comment;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeSet;

/// Caller-assigned article identifier.
pub type ArticleId = i64;

/// One published news article.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Article {
    /// `None` until a backend assigns one.
    pub id: Option<ArticleId>,
    /// Publication date; primary sort key.
    pub date: NaiveDate,
    pub title: String,
    pub first_paragraph: String,
    pub hyperlink: String,
    pub image_hyperlink: String,
    /// Names of associated tags.
    pub tags: BTreeSet<String>,
    /// Comments in insertion order.
    pub comments: Vec<Comment>,
}

impl Article {
    /// Creates an article without an id, tags or comments.
    pub fn new(
        date: NaiveDate,
        title: impl Into<String>,
        first_paragraph: impl Into<String>,
        hyperlink: impl Into<String>,
        image_hyperlink: impl Into<String>,
    ) -> Self {
        Self {
            id: None,
            date,
            title: title.into(),
            first_paragraph: first_paragraph.into(),
            hyperlink: hyperlink.into(),
            image_hyperlink: image_hyperlink.into(),
            tags: BTreeSet::new(),
            comments: Vec::new(),
        }
    }

    /// Builder-style id assignment used by loaders that already know the id.
    pub fn with_id(mut self, id: ArticleId) -> Self {
        self.id = Some(id);
        self
    }

    /// Records a tag name on this side of the association only.
    ///
    /// The backend completes the tag side when the article is added.
    pub fn add_tag(&mut self, tag_name: impl Into<String>) {
        self.tags.insert(tag_name.into());
    }

    /// Returns whether this article carries the given tag name.
    pub fn is_tagged_by(&self, tag_name: &str) -> bool {
        self.tags.contains(tag_name)
    }

    /// Sort key for natural order. Unassigned ids sort first within a date.
    pub fn sort_key(&self) -> (NaiveDate, ArticleId) {
        (self.date, self.id.unwrap_or(ArticleId::MIN))
    }

    /// Compares two articles by natural order.
    pub fn natural_cmp(&self, other: &Self) -> Ordering {
        self.sort_key().cmp(&other.sort_key())
    }
}
