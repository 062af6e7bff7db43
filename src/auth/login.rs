use std::sync::Arc;

use axum::{debug_handler, extract::State, Json};
use serde::{Deserialize, Serialize};

use crate::AppResult;

use super::{MemoryDirectory, SessionToken, User};

#[derive(Deserialize)]
pub(crate) struct LoginRequest {
    username: String,
    password: String,
}

#[derive(Serialize)]
pub(crate) struct LoginResponse {
    token: SessionToken,
    user: User,
}

#[debug_handler(state = crate::AppState)]
pub(crate) async fn login(
    State(users): State<Arc<MemoryDirectory>>,
    Json(LoginRequest { username, password }): Json<LoginRequest>,
) -> AppResult<Json<LoginResponse>> {
    let (token, user) = tokio::task::spawn_blocking(move || users.login(username.trim(), &password))
        .await
        .map_err(anyhow::Error::from)??;

    Ok(Json(LoginResponse { token, user }))
}
