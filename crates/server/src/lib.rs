//! Reference remote collection store.
//!
//! Serves per-owner `sales` and `expenses` document collections over HTTP
//! and pushes the complete collection to Server-Sent Events subscribers after
//! every change.

use axum::{Json, http::StatusCode, response::IntoResponse};
use sea_orm::DbErr;

pub use api_types::ErrorResponse;
pub use server::{ServerState, router, run_with_listener, spawn_with_listener};

mod collections;
mod documents;
mod identities;
mod server;

pub enum ServerError {
    Unauthorized,
    Forbidden,
    NotFound(String),
    Database(DbErr),
    Generic(String),
}

fn status_for_error(err: &ServerError) -> StatusCode {
    match err {
        ServerError::Unauthorized => StatusCode::UNAUTHORIZED,
        ServerError::Forbidden => StatusCode::FORBIDDEN,
        ServerError::NotFound(_) => StatusCode::NOT_FOUND,
        ServerError::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
        ServerError::Generic(_) => StatusCode::BAD_REQUEST,
    }
}

fn message_for_error(err: ServerError) -> String {
    match err {
        ServerError::Unauthorized => "unauthorized".to_string(),
        ServerError::Forbidden => "forbidden".to_string(),
        ServerError::NotFound(what) => format!("{what} not found"),
        ServerError::Database(db_err) => {
            tracing::error!("database error: {db_err}");
            "internal server error".to_string()
        }
        ServerError::Generic(err) => err,
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> axum::response::Response {
        let status = status_for_error(&self);
        let error = message_for_error(self);
        (status, Json(ErrorResponse { error })).into_response()
    }
}

impl From<DbErr> for ServerError {
    fn from(value: DbErr) -> Self {
        Self::Database(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unauthorized_maps_to_401() {
        let res = ServerError::Unauthorized.into_response();
        assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
    }

    #[test]
    fn forbidden_maps_to_403() {
        let res = ServerError::Forbidden.into_response();
        assert_eq!(res.status(), StatusCode::FORBIDDEN);
    }

    #[test]
    fn not_found_maps_to_404() {
        let res = ServerError::NotFound("document".to_string()).into_response();
        assert_eq!(res.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn database_maps_to_500() {
        let res = ServerError::from(DbErr::Custom("boom".to_string())).into_response();
        assert_eq!(res.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn generic_maps_to_400() {
        let res = ServerError::Generic("bad".to_string()).into_response();
        assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    }
}
