//! Tag record and the article/tag association helper.

use crate::model::article::{Article, ArticleId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Named label attached to any number of articles.
///
/// `tag_name` is matched case-sensitively. Backends tolerate duplicate names
/// and resolve lookups to the first tag added.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tag {
    pub tag_name: String,
    /// Ids of tagged articles, iterated in ascending order.
    pub tagged_articles: BTreeSet<ArticleId>,
}

impl Tag {
    pub fn new(tag_name: impl Into<String>) -> Self {
        Self {
            tag_name: tag_name.into(),
            tagged_articles: BTreeSet::new(),
        }
    }

    /// Records an article id on this side of the association only.
    pub fn add_article(&mut self, article_id: ArticleId) {
        self.tagged_articles.insert(article_id);
    }

    pub fn is_applied_to(&self, article_id: ArticleId) -> bool {
        self.tagged_articles.contains(&article_id)
    }

    pub fn number_of_tagged_articles(&self) -> usize {
        self.tagged_articles.len()
    }
}

/// Links one article and one tag on both sides.
///
/// Articles without an assigned id only receive the tag name; the backend
/// fills in the id side once the article is stored.
pub fn make_tag_association(article: &mut Article, tag: &mut Tag) {
    article.add_tag(tag.tag_name.clone());
    if let Some(id) = article.id {
        tag.add_article(id);
    }
}
