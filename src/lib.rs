pub mod appresult;
pub mod chat;
pub mod config;
pub mod db;
pub mod groups;
pub mod hub;
pub mod store;

use axum::{extract::FromRef, http::Method, routing::get, Router};
use tower_http::cors::{Any, CorsLayer};

pub use appresult::{AppError, AppResult, ChatError, ChatResult};
pub use chat::Chat;
pub use config::Config;
pub use hub::Hub;
pub use store::Store;

#[derive(Clone, FromRef)]
pub struct AppState {
    pub chat: Chat,
    pub store: Store,
    pub hub: Hub,
}

impl AppState {
    pub fn new(chat: Chat) -> Self {
        Self {
            store: chat.store().clone(),
            hub: chat.hub().clone(),
            chat,
        }
    }
}

pub fn app(app_state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers(Any);

    Router::new()
        .nest("/api/groups", groups::router())
        .route("/ws", get(groups::ws::chat_ws))
        .with_state(app_state)
        .layer(cors)
}
