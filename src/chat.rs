//! Message ingestion and history.
//!
//! `submit` is the only way messages are created. It writes, re-reads the
//! denormalized row and publishes that exact row, so the caller's result and
//! the live payload are the same value.

use tracing::instrument;

use crate::{
    appresult::{ChatError, ChatResult},
    db::{MessageKind, MessageRow},
    hub::Hub,
    store::Store,
};

#[derive(Clone)]
pub struct Chat {
    store: Store,
    hub: Hub,
    enforce_membership: bool,
}

impl Chat {
    pub fn new(store: Store, hub: Hub) -> Self {
        Self {
            store,
            hub,
            enforce_membership: false,
        }
    }

    /// Require senders to be members of the group they post to.
    pub fn enforce_membership(mut self, enforce: bool) -> Self {
        self.enforce_membership = enforce;
        self
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn hub(&self) -> &Hub {
        &self.hub
    }

    #[instrument(skip(self))]
    pub async fn read_history(&self, group_id: i64) -> ChatResult<Vec<MessageRow>> {
        self.store.list_messages_by_group(group_id).await
    }

    #[instrument(skip(self, content), fields(content_len = content.len()))]
    pub async fn submit(&self, group_id: i64, user_id: i64, content: &str) -> ChatResult<MessageRow> {
        if content.trim().is_empty() {
            return Err(ChatError::Validation("message content is empty".to_owned()));
        }

        if self.enforce_membership {
            self.check_membership(group_id, user_id).await?;
        }

        let id = self
            .store
            .insert_message(group_id, user_id, content, MessageKind::Text)
            .await?;

        let row = self
            .store
            .get_message_by_id(id)
            .await?
            .ok_or_else(|| {
                tracing::error!(message_id = id, "stored message missing on re-read, not broadcast");
                ChatError::Inconsistent(id)
            })?;

        let delivered = self.hub.publish(group_id, &row).await;
        tracing::debug!(message_id = id, delivered, "message published");

        Ok(row)
    }

    async fn check_membership(&self, group_id: i64, user_id: i64) -> ChatResult<()> {
        if self.store.get_group(group_id).await?.is_none() {
            return Err(ChatError::Reference(format!("group {group_id}")));
        }
        if self.store.get_user(user_id).await?.is_none() {
            return Err(ChatError::Reference(format!("user {user_id}")));
        }
        if !self.store.is_member(group_id, user_id).await? {
            return Err(ChatError::NotAMember { group_id, user_id });
        }
        Ok(())
    }
}
