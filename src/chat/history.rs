use std::sync::Arc;

use axum::{debug_handler, extract::{Path, State}, http::{HeaderMap, StatusCode}, Json};
use serde::Serialize;

use crate::{auth::{self, MemoryDirectory, UserId}, AppError, AppResult};

use super::{Message, Relay};

#[derive(Serialize)]
pub(crate) struct RosterEntry {
    id: UserId,
    username: String,
    online: bool,
}

#[debug_handler(state = crate::AppState)]
pub(crate) async fn roster(
    State(relay): State<Relay>,
    State(users): State<Arc<MemoryDirectory>>,
    headers: HeaderMap,
) -> AppResult<Json<Vec<RosterEntry>>> {
    let me = auth::bearer_user(&headers, &relay)?;
    let online = relay.registry().online_users();

    let roster = users
        .users()
        .into_iter()
        .filter(|user| user.id != me.id)
        .map(|user| RosterEntry {
            online: online.contains(&user.id),
            id: user.id,
            username: user.username,
        })
        .collect();

    Ok(Json(roster))
}

#[debug_handler(state = crate::AppState)]
pub(crate) async fn history(
    State(relay): State<Relay>,
    Path(peer_id): Path<u64>,
    headers: HeaderMap,
) -> AppResult<Json<Vec<Message>>> {
    let me = auth::bearer_user(&headers, &relay)?;
    let peer = UserId(peer_id);
    if !relay.directory().user_exists(peer) {
        return Err(AppError::new(StatusCode::NOT_FOUND, format!("no user {peer}")));
    }

    Ok(Json(relay.store().between(me.id, peer)))
}
