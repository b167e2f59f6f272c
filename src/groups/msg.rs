use axum::{debug_handler, extract::{Path, State}, Json};
use serde::Deserialize;

use crate::{appresult::ChatError, chat::Chat, db::MessageRow, AppResult};

#[derive(Debug, Deserialize)]
pub(crate) struct SendMessageBody {
    #[serde(default)]
    content: Option<String>,
    #[serde(default, rename = "userId", alias = "user_id")]
    user_id: Option<i64>,
}

#[debug_handler(state = crate::AppState)]
pub(crate) async fn history(
    State(chat): State<Chat>,
    Path(group_id): Path<i64>,
) -> AppResult<Json<Vec<MessageRow>>> {
    Ok(Json(chat.read_history(group_id).await?))
}

#[debug_handler(state = crate::AppState)]
pub(crate) async fn send_msg(
    State(chat): State<Chat>,
    Path(group_id): Path<i64>,
    Json(SendMessageBody { content, user_id }): Json<SendMessageBody>,
) -> AppResult<Json<MessageRow>> {
    let Some(user_id) = user_id else {
        return Err(ChatError::Validation("userId is required".to_owned()))?;
    };
    let content = content.unwrap_or_default();

    // Runs detached: a client hanging up mid-request must not cancel the
    // broadcast of a message that is already stored.
    let row = tokio::spawn(async move { chat.submit(group_id, user_id, &content).await })
        .await??;

    Ok(Json(row))
}
