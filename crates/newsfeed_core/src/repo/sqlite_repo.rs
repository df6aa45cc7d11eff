//! SQLite storage backend.
//!
//! # Responsibility
//! - Implement the storage contract over the `articles/tags/users/comments`
//!   schema.
//! - Run every write inside one unit of work on the bound context's session.
//!
//! # Invariants
//! - Writes commit only after every statement succeeded; any error rolls the
//!   whole call back.
//! - Reads run on the session without opening a transaction and map
//!   "no rows" to `None` / empty.
//! - Natural order is `ORDER BY date ASC, id ASC`, matching the in-memory
//!   backend. `date` holds `num_days_from_ce`, so it compares numerically for
//!   every representable year.

use crate::db::{ContextId, SessionManager};
use crate::model::{Article, ArticleId, Comment, Tag, User, ValidationError};
use crate::repo::{dedup_ids, DuplicateKey, NewsRepository, RepoError, RepoResult};
use chrono::{Datelike, NaiveDate};
use log::{debug, warn};
use rusqlite::types::FromSql;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};
use std::collections::{BTreeSet, HashMap};
use std::path::Path;
use std::sync::Arc;

const FIRST_ARTICLE_ID: ArticleId = 1;
const MAX_IDS_PER_QUERY: usize = 500;

const ARTICLE_SELECT_SQL: &str = "SELECT
    id,
    date,
    title,
    first_paragraph,
    hyperlink,
    image_hyperlink
FROM articles";

const COMMENT_SELECT_SQL: &str = "SELECT
    c.comment,
    u.user_name,
    c.article_id,
    c.timestamp
FROM comments c
INNER JOIN users u ON u.id = c.user_id";

/// SQLite-backed repository bound to one execution context.
///
/// Handles for other contexts share the same [`SessionManager`] through
/// [`SqliteNewsRepository::for_context`].
pub struct SqliteNewsRepository {
    sessions: Arc<SessionManager>,
    context: ContextId,
}

impl SqliteNewsRepository {
    /// Opens (or creates) the database file and binds a fresh context.
    ///
    /// The first session is opened eagerly so bootstrap failures surface here.
    pub fn open(db_path: impl AsRef<Path>) -> RepoResult<Self> {
        let repo = Self::new(Arc::new(SessionManager::new(db_path.as_ref())));
        repo.read(|_| Ok(()))?;
        Ok(repo)
    }

    /// Binds a fresh context on an existing session manager.
    pub fn new(sessions: Arc<SessionManager>) -> Self {
        let context = sessions.new_context();
        Self { sessions, context }
    }

    /// Returns a handle on the same database bound to `context`.
    pub fn for_context(&self, context: ContextId) -> Self {
        Self {
            sessions: Arc::clone(&self.sessions),
            context,
        }
    }

    pub fn context(&self) -> ContextId {
        self.context
    }

    pub fn session_manager(&self) -> &Arc<SessionManager> {
        &self.sessions
    }

    /// Closes the current session and rebinds this handle to a new context.
    pub fn reset_session(&mut self) -> RepoResult<()> {
        self.context = self.sessions.reset(self.context)?;
        Ok(())
    }

    /// Releases the current session; the next call reopens it lazily.
    pub fn close_session(&self) -> RepoResult<()> {
        self.sessions.close(self.context)?;
        Ok(())
    }

    fn read<T>(&self, f: impl FnOnce(&Connection) -> RepoResult<T>) -> RepoResult<T> {
        self.sessions
            .with_session(self.context, |session| f(session.connection()))
    }

    fn write<T>(
        &self,
        op: &'static str,
        f: impl FnOnce(&Connection) -> RepoResult<T>,
    ) -> RepoResult<T> {
        let result = self.sessions.scope(self.context, |unit| {
            let value = f(unit.connection())?;
            unit.commit()?;
            Ok(value)
        });

        match &result {
            Ok(_) => debug!(
                "event=repo_write module=repo backend=sqlite op={op} status=ok context={}",
                self.context
            ),
            Err(err) => warn!(
                "event=repo_write module=repo backend=sqlite op={op} status=error context={} error={}",
                self.context, err
            ),
        }
        result
    }
}

impl NewsRepository for SqliteNewsRepository {
    fn add_user(&self, user: &User) -> RepoResult<()> {
        if !user.comments.is_empty() {
            return Err(ValidationError::UnexpectedComments.into());
        }

        self.write("add_user", |conn| {
            if user_id(conn, &user.user_name)?.is_some() {
                return Err(RepoError::DuplicateKey(DuplicateKey::UserName(
                    user.user_name.clone(),
                )));
            }
            conn.execute(
                "INSERT INTO users (user_name, password) VALUES (?1, ?2);",
                params![user.user_name, user.password],
            )?;
            Ok(())
        })
    }

    fn get_user(&self, user_name: &str) -> RepoResult<Option<User>> {
        self.read(|conn| {
            let Some(id) = user_id(conn, user_name)? else {
                return Ok(None);
            };
            let password: String = conn.query_row(
                "SELECT password FROM users WHERE id = ?1;",
                [id],
                |row| row.get(0),
            )?;
            let comments = query_comments(
                conn,
                &format!("{COMMENT_SELECT_SQL} WHERE c.user_id = ?1 ORDER BY c.id ASC;"),
                [id],
            )?;
            Ok(Some(User {
                user_name: user_name.to_string(),
                password,
                comments,
            }))
        })
    }

    fn add_article(&self, article: &Article) -> RepoResult<ArticleId> {
        if !article.comments.is_empty() {
            return Err(ValidationError::UnexpectedComments.into());
        }

        self.write("add_article", |conn| {
            let id = match article.id {
                Some(id) if article_exists(conn, id)? => {
                    return Err(RepoError::DuplicateKey(DuplicateKey::ArticleId(id)));
                }
                Some(id) => id,
                None => next_article_id(conn)?,
            };

            let mut tag_ids = Vec::with_capacity(article.tags.len());
            for tag_name in &article.tags {
                let tag_id = first_tag_id(conn, tag_name)?
                    .ok_or_else(|| ValidationError::UnknownTag(tag_name.clone()))?;
                tag_ids.push(tag_id);
            }

            conn.execute(
                "INSERT INTO articles (
                    id,
                    date,
                    title,
                    first_paragraph,
                    hyperlink,
                    image_hyperlink
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6);",
                params![
                    id,
                    day_number(article.date),
                    article.title,
                    article.first_paragraph,
                    article.hyperlink,
                    article.image_hyperlink,
                ],
            )?;

            for tag_id in tag_ids {
                link_article_tag(conn, id, tag_id)?;
            }
            Ok(id)
        })
    }

    fn get_article(&self, id: ArticleId) -> RepoResult<Option<Article>> {
        self.read(|conn| {
            let mut articles =
                query_articles(conn, &format!("{ARTICLE_SELECT_SQL} WHERE id = ?1;"), [id])?;
            Ok(articles.pop())
        })
    }

    fn get_articles_by_date(&self, date: Option<NaiveDate>) -> RepoResult<Vec<Article>> {
        self.read(|conn| match date {
            Some(date) => query_articles(
                conn,
                &format!("{ARTICLE_SELECT_SQL} WHERE date = ?1 ORDER BY date ASC, id ASC;"),
                [day_number(date)],
            ),
            None => query_articles(
                conn,
                &format!("{ARTICLE_SELECT_SQL} ORDER BY date ASC, id ASC;"),
                [],
            ),
        })
    }

    fn get_number_of_articles(&self) -> RepoResult<usize> {
        self.read(|conn| {
            let count: i64 = conn.query_row("SELECT COUNT(*) FROM articles;", [], |row| row.get(0))?;
            usize::try_from(count)
                .map_err(|_| RepoError::InvalidData(format!("negative article count {count}")))
        })
    }

    fn get_first_article(&self) -> RepoResult<Option<Article>> {
        self.read(|conn| {
            let mut articles = query_articles(
                conn,
                &format!("{ARTICLE_SELECT_SQL} ORDER BY date ASC, id ASC LIMIT 1;"),
                [],
            )?;
            Ok(articles.pop())
        })
    }

    fn get_last_article(&self) -> RepoResult<Option<Article>> {
        self.read(|conn| {
            let mut articles = query_articles(
                conn,
                &format!("{ARTICLE_SELECT_SQL} ORDER BY id DESC LIMIT 1;"),
                [],
            )?;
            Ok(articles.pop())
        })
    }

    fn get_articles_by_id(&self, ids: &[ArticleId]) -> RepoResult<Vec<Article>> {
        let requested = dedup_ids(ids);
        if requested.is_empty() {
            return Ok(Vec::new());
        }

        self.read(|conn| {
            let mut by_id: HashMap<ArticleId, Article> = HashMap::with_capacity(requested.len());
            // Stay well under SQLite's bound-parameter limit.
            for chunk in requested.chunks(MAX_IDS_PER_QUERY) {
                let placeholders = vec!["?"; chunk.len()].join(", ");
                let found = query_articles(
                    conn,
                    &format!("{ARTICLE_SELECT_SQL} WHERE id IN ({placeholders});"),
                    params_from_iter(chunk.iter()),
                )?;
                by_id.extend(
                    found
                        .into_iter()
                        .filter_map(|article| article.id.map(|id| (id, article))),
                );
            }
            Ok(requested
                .iter()
                .filter_map(|id| by_id.remove(id))
                .collect())
        })
    }

    fn get_article_ids_for_tag(&self, tag_name: &str) -> RepoResult<Vec<ArticleId>> {
        // `article_tags` has no record type of its own, so both lookups are
        // raw statements against the join table.
        self.read(|conn| {
            let Some(tag_id) = first_tag_id(conn, tag_name)? else {
                return Ok(Vec::new());
            };
            tagged_article_ids(conn, tag_id)
        })
    }

    fn get_date_of_previous_article(&self, article: &Article) -> RepoResult<Option<NaiveDate>> {
        self.read(|conn| {
            let date = conn.query_row(
                "SELECT MAX(date)
                 FROM articles
                 WHERE date < ?1
                   AND EXISTS (SELECT 1 FROM articles WHERE date = ?1);",
                [day_number(article.date)],
                |row| row.get::<_, Option<i32>>(0),
            )?;
            date.map(date_from_day_number).transpose()
        })
    }

    fn get_date_of_next_article(&self, article: &Article) -> RepoResult<Option<NaiveDate>> {
        self.read(|conn| {
            let date = conn.query_row(
                "SELECT MIN(date)
                 FROM articles
                 WHERE date > ?1
                   AND EXISTS (SELECT 1 FROM articles WHERE date = ?1);",
                [day_number(article.date)],
                |row| row.get::<_, Option<i32>>(0),
            )?;
            date.map(date_from_day_number).transpose()
        })
    }

    fn add_tag(&self, tag: &Tag) -> RepoResult<()> {
        self.write("add_tag", |conn| {
            for id in &tag.tagged_articles {
                if !article_exists(conn, *id)? {
                    return Err(ValidationError::UnknownArticle(*id).into());
                }
            }

            conn.execute(
                "INSERT INTO tags (tag_name) VALUES (?1);",
                [tag.tag_name.as_str()],
            )?;
            let tag_id = conn.last_insert_rowid();
            for id in &tag.tagged_articles {
                link_article_tag(conn, *id, tag_id)?;
            }
            Ok(())
        })
    }

    fn get_tags(&self) -> RepoResult<Vec<Tag>> {
        self.read(|conn| {
            let mut stmt = conn.prepare("SELECT id, tag_name FROM tags ORDER BY id ASC;")?;
            let rows = stmt
                .query_map([], |row| Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?)))?
                .collect::<Result<Vec<_>, _>>()?;

            let mut tags = Vec::with_capacity(rows.len());
            for (tag_id, tag_name) in rows {
                tags.push(Tag {
                    tag_name,
                    tagged_articles: tagged_article_ids(conn, tag_id)?.into_iter().collect(),
                });
            }
            Ok(tags)
        })
    }

    fn add_comment(&self, comment: &Comment) -> RepoResult<()> {
        comment.validate()?;
        let (Some(user_name), Some(article_id)) = (&comment.user_name, comment.article_id) else {
            return Err(ValidationError::MissingCommentUser.into());
        };

        self.write("add_comment", |conn| {
            let user_id = user_id(conn, user_name)?
                .ok_or_else(|| ValidationError::UnknownUser(user_name.clone()))?;
            if !article_exists(conn, article_id)? {
                return Err(ValidationError::UnknownArticle(article_id).into());
            }

            conn.execute(
                "INSERT INTO comments (user_id, article_id, comment, timestamp)
                 VALUES (?1, ?2, ?3, ?4);",
                params![user_id, article_id, comment.comment_text, comment.timestamp],
            )?;
            Ok(())
        })
    }

    fn get_comments(&self) -> RepoResult<Vec<Comment>> {
        self.read(|conn| {
            query_comments(conn, &format!("{COMMENT_SELECT_SQL} ORDER BY c.id ASC;"), [])
        })
    }
}

fn query_articles(
    conn: &Connection,
    sql: &str,
    params: impl rusqlite::Params,
) -> RepoResult<Vec<Article>> {
    let mut stmt = conn.prepare(sql)?;
    let mut rows = stmt.query(params)?;
    let mut articles = Vec::new();
    while let Some(row) = rows.next()? {
        articles.push(parse_article_row(row)?);
    }

    for article in &mut articles {
        if let Some(id) = article.id {
            article.tags = article_tag_names(conn, id)?;
            article.comments = query_comments(
                conn,
                &format!("{COMMENT_SELECT_SQL} WHERE c.article_id = ?1 ORDER BY c.id ASC;"),
                [id],
            )?;
        }
    }
    Ok(articles)
}

fn query_comments(
    conn: &Connection,
    sql: &str,
    params: impl rusqlite::Params,
) -> RepoResult<Vec<Comment>> {
    let mut stmt = conn.prepare(sql)?;
    let mut rows = stmt.query(params)?;
    let mut comments = Vec::new();
    while let Some(row) = rows.next()? {
        comments.push(Comment {
            comment_text: column(row, "comment")?,
            user_name: Some(column(row, "user_name")?),
            article_id: Some(column(row, "article_id")?),
            timestamp: column(row, "timestamp")?,
        });
    }
    Ok(comments)
}

fn parse_article_row(row: &Row<'_>) -> RepoResult<Article> {
    Ok(Article {
        id: Some(column(row, "id")?),
        date: date_from_day_number(column(row, "date")?)?,
        title: column(row, "title")?,
        first_paragraph: column(row, "first_paragraph")?,
        hyperlink: column(row, "hyperlink")?,
        image_hyperlink: column(row, "image_hyperlink")?,
        tags: BTreeSet::new(),
        comments: Vec::new(),
    })
}

/// Reads one column, reporting unconvertible values as `InvalidData`.
fn column<T: FromSql>(row: &Row<'_>, name: &str) -> RepoResult<T> {
    row.get(name).map_err(|err| match err {
        rusqlite::Error::FromSqlConversionFailure(..)
        | rusqlite::Error::InvalidColumnType(..)
        | rusqlite::Error::IntegralValueOutOfRange(..) => {
            RepoError::InvalidData(format!("column `{name}`: {err}"))
        }
        other => other.into(),
    })
}

fn day_number(date: NaiveDate) -> i32 {
    date.num_days_from_ce()
}

fn date_from_day_number(days: i32) -> RepoResult<NaiveDate> {
    NaiveDate::from_num_days_from_ce_opt(days)
        .ok_or_else(|| RepoError::InvalidData(format!("day number {days} is out of range")))
}

/// `max(1, greatest stored id + 1)`.
fn next_article_id(conn: &Connection) -> RepoResult<ArticleId> {
    let max: Option<ArticleId> =
        conn.query_row("SELECT MAX(id) FROM articles;", [], |row| row.get(0))?;
    match max {
        None => Ok(FIRST_ARTICLE_ID),
        Some(max) => max
            .checked_add(1)
            .map(|next| next.max(FIRST_ARTICLE_ID))
            .ok_or_else(|| ValidationError::IdSpaceExhausted.into()),
    }
}

fn article_tag_names(conn: &Connection, article_id: ArticleId) -> RepoResult<BTreeSet<String>> {
    let mut stmt = conn.prepare(
        "SELECT t.tag_name
         FROM article_tags at
         INNER JOIN tags t ON t.id = at.tag_id
         WHERE at.article_id = ?1;",
    )?;
    let names = stmt
        .query_map([article_id], |row| row.get::<_, String>(0))?
        .collect::<Result<BTreeSet<_>, _>>()?;
    Ok(names)
}

fn tagged_article_ids(conn: &Connection, tag_id: i64) -> RepoResult<Vec<ArticleId>> {
    let mut stmt = conn.prepare(
        "SELECT DISTINCT article_id
         FROM article_tags
         WHERE tag_id = ?1
         ORDER BY article_id ASC;",
    )?;
    let ids = stmt
        .query_map([tag_id], |row| row.get::<_, ArticleId>(0))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(ids)
}

fn first_tag_id(conn: &Connection, tag_name: &str) -> RepoResult<Option<i64>> {
    let id = conn
        .query_row(
            "SELECT id FROM tags WHERE tag_name = ?1 ORDER BY id ASC LIMIT 1;",
            [tag_name],
            |row| row.get(0),
        )
        .optional()?;
    Ok(id)
}

fn user_id(conn: &Connection, user_name: &str) -> RepoResult<Option<i64>> {
    let id = conn
        .query_row(
            "SELECT id FROM users WHERE user_name = ?1;",
            [user_name],
            |row| row.get(0),
        )
        .optional()?;
    Ok(id)
}

fn article_exists(conn: &Connection, id: ArticleId) -> RepoResult<bool> {
    let exists: i64 = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM articles WHERE id = ?1);",
        [id],
        |row| row.get(0),
    )?;
    Ok(exists == 1)
}

fn link_article_tag(conn: &Connection, article_id: ArticleId, tag_id: i64) -> RepoResult<()> {
    conn.execute(
        "INSERT OR IGNORE INTO article_tags (article_id, tag_id) VALUES (?1, ?2);",
        params![article_id, tag_id],
    )?;
    Ok(())
}
