mod directory;
mod login;
mod register;

use axum::{http::{header::AUTHORIZATION, HeaderMap, StatusCode}, routing::post, Router};

use crate::{chat::Relay, AppError, AppResult, AppState};

pub use directory::{Directory, IdentityError, MemoryDirectory, SessionToken, User, UserId};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/register", post(register::register))
        .route("/login", post(login::login))
}

/// Resolves `Authorization: Bearer <token>` to the user it was issued for.
pub(crate) fn bearer_user(headers: &HeaderMap, relay: &Relay) -> AppResult<User> {
    let Some(token) = headers
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
    else {
        return Err(AppError::new(StatusCode::UNAUTHORIZED, "missing bearer token"));
    };

    Ok(relay.authenticate(token.trim())?)
}
