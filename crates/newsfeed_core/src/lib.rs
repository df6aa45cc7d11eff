//! News article storage: one repository contract, an in-memory and a SQLite
//! backend, and context-scoped SQLite sessions.

pub mod config;
pub mod db;
pub mod logging;
pub mod model;
pub mod repo;

pub use config::{open_repository, BackendKind, ConfigError, StoreConfig};
pub use db::{ContextId, DbError, SessionManager, SessionState, UnitOfWork};
pub use logging::{default_log_level, init_logging, logging_status, LoggingError};
pub use model::{
    make_comment, make_tag_association, Article, ArticleId, Comment, Tag, User, ValidationError,
};
pub use repo::{
    DuplicateKey, MemoryNewsRepository, NewsRepository, RepoError, RepoResult,
    SqliteNewsRepository,
};

/// Minimal health-check API for early integration.
pub fn ping() -> &'static str {
    "pong"
}

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
