use std::sync::Arc;

use axum::{debug_handler, extract::State, Json};
use serde::Deserialize;

use crate::AppResult;

use super::{MemoryDirectory, User};

#[derive(Deserialize)]
pub(crate) struct RegisterRequest {
    username: String,
    email: String,
    password: String,
}

#[debug_handler(state = crate::AppState)]
pub(crate) async fn register(
    State(users): State<Arc<MemoryDirectory>>,
    Json(RegisterRequest { username, email, password }): Json<RegisterRequest>,
) -> AppResult<Json<User>> {
    // argon2 hashing blocks
    let user = tokio::task::spawn_blocking(move || users.register(username.trim(), email.trim(), &password))
        .await
        .map_err(anyhow::Error::from)??;

    Ok(Json(user))
}
