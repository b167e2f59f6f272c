use std::collections::HashMap;

use axum::{
    debug_handler,
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::IntoResponse,
};
use futures_util::{stream::SplitSink, SinkExt, StreamExt};
use serde::{Deserialize, Serialize};

use crate::{
    appresult::ChatResult,
    chat::Chat,
    db::MessageRow,
    hub::ConnectionId,
};

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub(crate) enum ClientFrame {
    JoinGroup { group_id: i64 },
    LeaveGroup { group_id: i64 },
    SendMessage { group_id: i64, user_id: i64, content: String },
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub(crate) enum ServerFrame<'a> {
    History { group_id: i64, messages: &'a [MessageRow] },
    NewMessage(&'a MessageRow),
    Error { message: String },
}

/// Newest message id in the history snapshot sent on join, per joined group.
///
/// Only the snapshot moves the mark. Live rows are published in commit
/// completion order, which is not id order, so a forwarded row must never
/// hide a lower id that is still in flight.
#[derive(Debug, Default)]
pub(crate) struct Watermarks(HashMap<i64, i64>);

impl Watermarks {
    fn joined(&mut self, group_id: i64, history: &[MessageRow]) {
        let newest = history.iter().map(|row| row.id).max().unwrap_or(0);
        let mark = self.0.entry(group_id).or_insert(0);
        *mark = (*mark).max(newest);
    }

    fn left(&mut self, group_id: i64) {
        self.0.remove(&group_id);
    }

    /// Live rows already covered by a history snapshot, or for groups this
    /// connection is not in, are dropped.
    fn should_forward(&self, row: &MessageRow) -> bool {
        self.0
            .get(&row.group_id)
            .is_some_and(|mark| row.id > *mark)
    }
}

/// Subscribes first and reads history second, so nothing committed in
/// between can fall through the gap. A failed read undoes a fresh binding.
pub(crate) async fn join(
    chat: &Chat,
    connection: ConnectionId,
    group_id: i64,
    watermarks: &mut Watermarks,
) -> ChatResult<Vec<MessageRow>> {
    let newly_bound = chat.hub().subscribe(connection, group_id).await;

    let history = match chat.read_history(group_id).await {
        Ok(history) => history,
        Err(err) => {
            if newly_bound {
                chat.hub().leave(connection, group_id).await;
            }
            return Err(err);
        }
    };

    watermarks.joined(group_id, &history);
    Ok(history)
}

#[debug_handler(state = crate::AppState)]
pub async fn chat_ws(
    State(chat): State<Chat>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |stream| session(chat, stream))
}

async fn session(chat: Chat, stream: WebSocket) {
    let (connection, mut rx) = chat.hub().connect().await;
    tracing::info!(%connection, "user connected");

    let (mut sender, mut receiver) = stream.split();
    let mut watermarks = Watermarks::default();

    loop {
        tokio::select! {
            incoming = receiver.next() => {
                let Some(Ok(msg)) = incoming else {
                    break;
                };
                if matches!(msg, Message::Close(_)) {
                    break;
                }
                if !matches!(msg, Message::Text(_) | Message::Binary(_)) {
                    continue;
                }

                let handled = match serde_json::from_slice::<ClientFrame>(&msg.into_data()) {
                    Ok(frame) => handle_frame(&chat, connection, &mut watermarks, &mut sender, frame).await,
                    Err(err) => send_frame(&mut sender, &ServerFrame::Error { message: err.to_string() }).await,
                };
                if handled.is_err() {
                    break;
                }
            }
            Some(row) = rx.recv() => {
                if !watermarks.should_forward(&row) {
                    continue;
                }
                if send_frame(&mut sender, &ServerFrame::NewMessage(&row)).await.is_err() {
                    break;
                }
            }
        }
    }

    chat.hub().unsubscribe(connection).await;
    tracing::info!(%connection, "user disconnected");
}

async fn handle_frame(
    chat: &Chat,
    connection: ConnectionId,
    watermarks: &mut Watermarks,
    sender: &mut SplitSink<WebSocket, Message>,
    frame: ClientFrame,
) -> Result<(), axum::Error> {
    match frame {
        ClientFrame::JoinGroup { group_id } => match join(chat, connection, group_id, watermarks).await {
            Ok(history) => {
                tracing::info!(%connection, group_id, "user joined group");
                send_frame(sender, &ServerFrame::History { group_id, messages: &history }).await
            }
            Err(err) => send_frame(sender, &ServerFrame::Error { message: err.to_string() }).await,
        },
        ClientFrame::LeaveGroup { group_id } => {
            chat.hub().leave(connection, group_id).await;
            watermarks.left(group_id);
            tracing::info!(%connection, group_id, "user left group");
            Ok(())
        }
        ClientFrame::SendMessage { group_id, user_id, content } => {
            match chat.submit(group_id, user_id, &content).await {
                Ok(_) => Ok(()),
                Err(err) => {
                    tracing::debug!(%connection, group_id, error = %err, "message rejected");
                    send_frame(sender, &ServerFrame::Error { message: err.to_string() }).await
                }
            }
        }
    }
}

async fn send_frame(
    sender: &mut SplitSink<WebSocket, Message>,
    frame: &ServerFrame<'_>,
) -> Result<(), axum::Error> {
    let text = serde_json::to_string(frame).map_err(axum::Error::new)?;
    sender.send(text.into()).await
}
