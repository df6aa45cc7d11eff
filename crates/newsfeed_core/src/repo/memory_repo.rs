//! In-memory storage backend.
//!
//! # Responsibility
//! - Serve every contract query from hand-maintained collections.
//! - Keep both sides of article/tag and user/comment/article links in step.
//!
//! # Invariants
//! - `order` lists arena slots sorted by `(date, id)` after every write.
//! - `index` maps every stored id to its arena slot; arena slots never move.
//! - Writes validate everything before touching any collection.
//! - One `RwLock` guards the whole store: readers share, writers exclude.

use crate::model::{Article, ArticleId, Comment, Tag, User, ValidationError};
use crate::repo::{dedup_ids, DuplicateKey, NewsRepository, RepoError, RepoResult};
use chrono::NaiveDate;
use log::debug;
use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

const FIRST_ARTICLE_ID: ArticleId = 1;

#[derive(Default)]
struct MemoryState {
    arena: Vec<Article>,
    order: Vec<usize>,
    index: HashMap<ArticleId, usize>,
    tags: Vec<Tag>,
    users: Vec<User>,
    comments: Vec<Comment>,
    max_id: Option<ArticleId>,
}

impl MemoryState {
    /// `max(1, greatest stored id + 1)`, or `None` once `i64::MAX` is taken.
    fn next_id(&self) -> Option<ArticleId> {
        match self.max_id {
            None => Some(FIRST_ARTICLE_ID),
            Some(max) => max
                .checked_add(1)
                .map(|next| next.max(FIRST_ARTICLE_ID)),
        }
    }

    fn at(&self, position: usize) -> &Article {
        &self.arena[self.order[position]]
    }

    fn ordered(&self) -> impl Iterator<Item = &Article> + '_ {
        self.order.iter().map(move |slot| &self.arena[*slot])
    }

    fn by_id(&self, id: ArticleId) -> Option<&Article> {
        self.index.get(&id).map(|slot| &self.arena[*slot])
    }

    /// Binary search for the first position holding `date`.
    fn first_position_on(&self, date: NaiveDate) -> Option<usize> {
        let position = self
            .order
            .partition_point(|slot| self.arena[*slot].date < date);
        (position < self.order.len() && self.at(position).date == date).then_some(position)
    }

    fn first_tag_position(&self, tag_name: &str) -> Option<usize> {
        self.tags.iter().position(|tag| tag.tag_name == tag_name)
    }

    fn insert_article(&mut self, article: Article, id: ArticleId) {
        let key = (article.date, id);
        let position = self
            .order
            .partition_point(|slot| self.arena[*slot].sort_key() <= key);
        let slot = self.arena.len();
        self.arena.push(Article {
            id: Some(id),
            ..article
        });
        self.order.insert(position, slot);
        self.index.insert(id, slot);
        self.max_id = Some(self.max_id.map_or(id, |max| max.max(id)));
    }
}

/// Store that keeps every record in process memory.
///
/// State is discarded when the repository is dropped.
#[derive(Default)]
pub struct MemoryNewsRepository {
    state: RwLock<MemoryState>,
}

impl MemoryNewsRepository {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RepoResult<RwLockReadGuard<'_, MemoryState>> {
        self.state
            .read()
            .map_err(|_| RepoError::LockPoisoned("memory store"))
    }

    fn write(&self) -> RepoResult<RwLockWriteGuard<'_, MemoryState>> {
        self.state
            .write()
            .map_err(|_| RepoError::LockPoisoned("memory store"))
    }
}

impl NewsRepository for MemoryNewsRepository {
    fn add_user(&self, user: &User) -> RepoResult<()> {
        if !user.comments.is_empty() {
            return Err(ValidationError::UnexpectedComments.into());
        }

        let mut state = self.write()?;
        if state.users.iter().any(|u| u.user_name == user.user_name) {
            return Err(RepoError::DuplicateKey(DuplicateKey::UserName(
                user.user_name.clone(),
            )));
        }
        state.users.push(user.clone());
        debug!("event=repo_write module=repo backend=memory op=add_user status=ok");
        Ok(())
    }

    fn get_user(&self, user_name: &str) -> RepoResult<Option<User>> {
        let state = self.read()?;
        Ok(state
            .users
            .iter()
            .find(|user| user.user_name == user_name)
            .cloned())
    }

    fn add_article(&self, article: &Article) -> RepoResult<ArticleId> {
        if !article.comments.is_empty() {
            return Err(ValidationError::UnexpectedComments.into());
        }

        let mut state = self.write()?;
        let id = match article.id {
            Some(id) => id,
            None => state.next_id().ok_or(ValidationError::IdSpaceExhausted)?,
        };
        if state.index.contains_key(&id) {
            return Err(RepoError::DuplicateKey(DuplicateKey::ArticleId(id)));
        }

        let mut tag_positions = Vec::with_capacity(article.tags.len());
        for tag_name in &article.tags {
            let position = state
                .first_tag_position(tag_name)
                .ok_or_else(|| ValidationError::UnknownTag(tag_name.clone()))?;
            tag_positions.push(position);
        }

        for position in tag_positions {
            state.tags[position].add_article(id);
        }
        state.insert_article(article.clone(), id);
        debug!("event=repo_write module=repo backend=memory op=add_article status=ok id={id}");
        Ok(id)
    }

    fn get_article(&self, id: ArticleId) -> RepoResult<Option<Article>> {
        Ok(self.read()?.by_id(id).cloned())
    }

    fn get_articles_by_date(&self, date: Option<NaiveDate>) -> RepoResult<Vec<Article>> {
        let state = self.read()?;
        let Some(date) = date else {
            return Ok(state.ordered().cloned().collect());
        };
        let Some(start) = state.first_position_on(date) else {
            return Ok(Vec::new());
        };

        Ok(state.order[start..]
            .iter()
            .map(|slot| &state.arena[*slot])
            .take_while(|article| article.date == date)
            .cloned()
            .collect())
    }

    fn get_number_of_articles(&self) -> RepoResult<usize> {
        Ok(self.read()?.order.len())
    }

    fn get_first_article(&self) -> RepoResult<Option<Article>> {
        Ok(self.read()?.ordered().next().cloned())
    }

    fn get_last_article(&self) -> RepoResult<Option<Article>> {
        let state = self.read()?;
        let last = state.index.keys().max().and_then(|id| state.by_id(*id));
        Ok(last.cloned())
    }

    fn get_articles_by_id(&self, ids: &[ArticleId]) -> RepoResult<Vec<Article>> {
        let state = self.read()?;
        Ok(dedup_ids(ids)
            .into_iter()
            .filter_map(|id| state.by_id(id).cloned())
            .collect())
    }

    fn get_article_ids_for_tag(&self, tag_name: &str) -> RepoResult<Vec<ArticleId>> {
        let state = self.read()?;
        // BTreeSet iteration is ascending.
        Ok(state
            .first_tag_position(tag_name)
            .map(|position| {
                state.tags[position]
                    .tagged_articles
                    .iter()
                    .copied()
                    .collect()
            })
            .unwrap_or_default())
    }

    fn get_date_of_previous_article(&self, article: &Article) -> RepoResult<Option<NaiveDate>> {
        let state = self.read()?;
        let Some(position) = state.first_position_on(article.date) else {
            return Ok(None);
        };

        Ok((0..position)
            .rev()
            .map(|p| state.at(p).date)
            .find(|date| *date != article.date))
    }

    fn get_date_of_next_article(&self, article: &Article) -> RepoResult<Option<NaiveDate>> {
        let state = self.read()?;
        let Some(position) = state.first_position_on(article.date) else {
            return Ok(None);
        };

        Ok((position..state.order.len())
            .map(|p| state.at(p).date)
            .find(|date| *date != article.date))
    }

    fn add_tag(&self, tag: &Tag) -> RepoResult<()> {
        let mut state = self.write()?;
        let mut slots = Vec::with_capacity(tag.tagged_articles.len());
        for id in &tag.tagged_articles {
            let slot = state
                .index
                .get(id)
                .copied()
                .ok_or(ValidationError::UnknownArticle(*id))?;
            slots.push(slot);
        }

        for slot in slots {
            state.arena[slot].tags.insert(tag.tag_name.clone());
        }
        state.tags.push(tag.clone());
        debug!(
            "event=repo_write module=repo backend=memory op=add_tag status=ok articles={}",
            tag.tagged_articles.len()
        );
        Ok(())
    }

    fn get_tags(&self) -> RepoResult<Vec<Tag>> {
        Ok(self.read()?.tags.clone())
    }

    fn add_comment(&self, comment: &Comment) -> RepoResult<()> {
        comment.validate()?;
        let (Some(user_name), Some(article_id)) = (&comment.user_name, comment.article_id) else {
            return Err(ValidationError::MissingCommentUser.into());
        };

        let mut state = self.write()?;
        let user_position = state
            .users
            .iter()
            .position(|user| &user.user_name == user_name)
            .ok_or_else(|| ValidationError::UnknownUser(user_name.clone()))?;
        let slot = state
            .index
            .get(&article_id)
            .copied()
            .ok_or(ValidationError::UnknownArticle(article_id))?;

        state.users[user_position].comments.push(comment.clone());
        state.arena[slot].comments.push(comment.clone());
        state.comments.push(comment.clone());
        debug!(
            "event=repo_write module=repo backend=memory op=add_comment status=ok article_id={article_id}"
        );
        Ok(())
    }

    fn get_comments(&self) -> RepoResult<Vec<Comment>> {
        Ok(self.read()?.comments.clone())
    }
}
