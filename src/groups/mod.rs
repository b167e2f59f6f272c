mod group;
mod msg;
pub(crate) mod ws;

use axum::{routing::get, Router};

use crate::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/{group_id}", get(group::group))
        .route("/{group_id}/members", get(group::members))
        .route("/{group_id}/messages", get(msg::history).post(msg::send_msg))
}
