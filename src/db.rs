use serde::{Deserialize, Serialize};
use sqlx::FromRow;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum MessageKind {
    Text,
    System,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct User {
    pub id: i64,
    pub username: String,
    pub display_name: String,
    pub avatar_url: Option<String>,
    pub is_anonymous: bool,
    pub created_at: String,

    // unique: id
    // unique: username
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct Group {
    pub id: i64,
    pub name: String,
    pub avatar_url: Option<String>,
    pub created_at: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct Membership {
    pub id: i64,
    pub group_id: i64,
    pub user_id: i64,
    pub joined_at: String,

    // unique: group_id, user_id
}

/// A message joined with its sender's display attributes.
///
/// Never stored as such: both the history read and the post-insert re-read
/// build it from the same query, so the two paths serialize identically.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct MessageRow {
    pub id: i64,
    pub group_id: i64,
    pub user_id: i64,
    pub content: String,
    pub message_type: MessageKind,
    pub created_at: String,

    pub display_name: String,
    pub avatar_url: Option<String>,
    pub is_anonymous: bool,
}
