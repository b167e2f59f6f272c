use axum::{http::StatusCode, response::{IntoResponse, Response}, Json};
use serde_json::json;
use thiserror::Error;

pub type ChatResult<T> = Result<T, ChatError>;

#[derive(Debug, Error)]
pub enum ChatError {
    #[error("invalid request: {0}")]
    Validation(String),

    #[error("unknown {0}")]
    Reference(String),

    #[error("{0} not found")]
    NotFound(String),

    #[error("user {user_id} is not a member of group {group_id}")]
    NotAMember { group_id: i64, user_id: i64 },

    #[error("message {0} missing right after insert")]
    Inconsistent(i64),

    #[error("store unavailable: {0}")]
    StoreUnavailable(#[source] sqlx::Error),
}

impl From<sqlx::Error> for ChatError {
    fn from(err: sqlx::Error) -> Self {
        if let sqlx::Error::Database(db_err) = &err {
            if db_err.is_foreign_key_violation() {
                return Self::Reference(db_err.message().to_owned());
            }
        }
        Self::StoreUnavailable(err)
    }
}

impl ChatError {
    pub fn status(&self) -> StatusCode {
        use ChatError::*;
        match self {
            Validation(_) => StatusCode::BAD_REQUEST,
            Reference(_) => StatusCode::UNPROCESSABLE_ENTITY,
            NotFound(_) => StatusCode::NOT_FOUND,
            NotAMember { .. } => StatusCode::FORBIDDEN,
            Inconsistent(_) | StoreUnavailable(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

pub type AppResult<T> = Result<T, AppError>;

#[derive(Debug)]
pub struct AppError(pub anyhow::Error);

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self
            .0
            .downcast_ref::<ChatError>()
            .map_or(StatusCode::INTERNAL_SERVER_ERROR, ChatError::status);

        let message = if status.is_server_error() {
            tracing::error!(error = ?self.0, "request failed");
            "internal error".to_owned()
        } else {
            self.0.to_string()
        };

        (status, Json(json!({ "error": message }))).into_response()
    }
}

impl<E> From<E> for AppError
where
    E: Into<anyhow::Error>,
{
    fn from(err: E) -> Self {
        Self(err.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn each_error_kind_has_its_own_status() {
        assert_eq!(ChatError::Validation("empty".into()).status(), StatusCode::BAD_REQUEST);
        assert_eq!(ChatError::Reference("group 9".into()).status(), StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(ChatError::NotFound("group 9".into()).status(), StatusCode::NOT_FOUND);
        assert_eq!(
            ChatError::NotAMember { group_id: 1, user_id: 2 }.status(),
            StatusCode::FORBIDDEN
        );
        assert_eq!(ChatError::Inconsistent(9).status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(
            ChatError::StoreUnavailable(sqlx::Error::PoolTimedOut).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn pool_failures_are_store_unavailable() {
        let err = ChatError::from(sqlx::Error::PoolClosed);
        assert!(matches!(err, ChatError::StoreUnavailable(_)));
    }

    #[test]
    fn chat_errors_keep_their_status_through_app_error() {
        let response = AppError::from(ChatError::NotFound("group 999".into())).into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let response = AppError::from(anyhow::anyhow!("boom")).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
