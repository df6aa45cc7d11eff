//! User record.

use crate::model::comment::Comment;
use serde::{Deserialize, Serialize};

/// Registered reader who can author comments.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    /// Unique per backend.
    pub user_name: String,
    /// Already hashed by the caller; stored verbatim.
    pub password: String,
    /// Authored comments in insertion order.
    pub comments: Vec<Comment>,
}

impl User {
    pub fn new(user_name: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            user_name: user_name.into(),
            password: password.into(),
            comments: Vec::new(),
        }
    }
}
