pub mod auth;
pub mod chat;
pub mod config;

use std::sync::Arc;

use axum::{extract::FromRef, http::StatusCode, response::{IntoResponse, Response}, routing::get, Router};
use tower_http::cors::{Any, CorsLayer};

use auth::{IdentityError, MemoryDirectory};
use chat::{Relay, RelayError};
use config::Config;

#[derive(Clone, FromRef)]
pub struct AppState {
    pub relay: Relay,
    pub users: Arc<MemoryDirectory>,
}

impl AppState {
    pub fn new() -> Self {
        let users = Arc::new(MemoryDirectory::new());
        Self {
            relay: Relay::new(users.clone()),
            users,
        }
    }
}

impl Default for AppState {
    fn default() -> Self {
        Self::new()
    }
}

pub fn app(state: AppState, config: &Config) -> anyhow::Result<Router> {
    let cors = match &config.cors_origin {
        Some(origin) => CorsLayer::new().allow_origin(origin.parse::<axum::http::HeaderValue>()?),
        None => CorsLayer::new().allow_origin(Any),
    }
    .allow_methods(Any)
    .allow_headers(Any);

    Ok(Router::new()
        .route("/", get(|| async { "pairwire relay is running" }))
        .route("/health", get(|| async { "OK" }))

        .merge(auth::router())
        .merge(chat::router())

        .with_state(state)
        .layer(cors))
}

pub type AppResult<T> = Result<T, AppError>;
#[derive(Debug)]
pub struct AppError(pub StatusCode, pub anyhow::Error);

impl AppError {
    pub fn new(status: StatusCode, msg: impl Into<String>) -> Self {
        Self(status, anyhow::Error::msg(msg.into()))
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let AppError(status, err) = self;
        if status.is_server_error() {
            tracing::error!("{err:#}\n{}", err.backtrace());
        }
        (status, err.to_string()).into_response()
    }
}

impl From<String> for AppError {
    fn from(err: String) -> Self {
        Self(StatusCode::INTERNAL_SERVER_ERROR, anyhow::Error::msg(err))
    }
}

impl From<&str> for AppError {
    fn from(err: &str) -> Self {
        Self(StatusCode::INTERNAL_SERVER_ERROR, anyhow::Error::msg(err.to_owned()))
    }
}

macro_rules! apperr_impl {
    ($E:ty) => {
        impl From<$E> for AppError {
            fn from(err: $E) -> Self {
                Self(StatusCode::INTERNAL_SERVER_ERROR, anyhow::Error::from(err))
            }
        }
    };
}

apperr_impl!(serde_json::Error);
apperr_impl!(axum::Error);
apperr_impl!(anyhow::Error);

impl From<IdentityError> for AppError {
    fn from(err: IdentityError) -> Self {
        use IdentityError::*;
        let status = match &err {
            InvalidUsername | InvalidEmail | WeakPassword => StatusCode::BAD_REQUEST,
            UsernameTaken(_) => StatusCode::CONFLICT,
            InvalidCredentials => StatusCode::UNAUTHORIZED,
            Hash(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self(status, anyhow::Error::from(err))
    }
}

impl From<RelayError> for AppError {
    fn from(err: RelayError) -> Self {
        // only authentication failures reach http; the rest are websocket replies
        let status = match &err {
            RelayError::Unauthorized => StatusCode::UNAUTHORIZED,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self(status, anyhow::Error::from(err))
    }
}

/// Resolves when `signal` fires. If the signal handler could not be installed
/// it never resolves, so the server keeps running instead of stopping at once.
pub async fn shutdown_signal(signal: impl Future<Output = std::io::Result<()>>) {
    if let Err(e) = signal.await {
        tracing::error!("could not listen for shutdown signal, running until killed: {e}");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutting down");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::UserId;

    #[test]
    fn relay_errors_map_to_status() {
        assert_eq!(AppError::from(RelayError::Unauthorized).0, StatusCode::UNAUTHORIZED);
        assert_eq!(
            AppError::from(RelayError::MalformedFrame("bad".to_owned())).0,
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(AppError::from(RelayError::RecipientOffline(UserId(2))).0, StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn shutdown_waits_for_the_signal() {
        shutdown_signal(async { Ok(()) }).await;

        let failed = shutdown_signal(async { Err(std::io::Error::other("no signal handler")) });
        let outcome = tokio::time::timeout(std::time::Duration::from_millis(50), failed).await;
        assert!(outcome.is_err(), "a failed handler must not trigger shutdown");
    }
}
