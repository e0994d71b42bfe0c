use std::sync::Arc;

use axum::{
    Json, debug_handler,
    extract::{Path, Query, State},
};
use serde::Deserialize;
use serde_json::{Value, json};

use crate::{AppResult, AppState, auth::Bearer, error::RelayError, relay::Relay};

use super::Identity;

#[derive(Debug, Deserialize)]
pub(crate) struct HistoryQuery {
    before: Option<i64>,
    limit: Option<i64>,
}

/// Replay for clients that are not holding a socket open. Only the two
/// participants may read a room.
#[debug_handler(state = AppState)]
pub(crate) async fn history(
    Path((u1, u2)): Path<(String, String)>,
    Query(HistoryQuery { before, limit }): Query<HistoryQuery>,
    State(relay): State<Arc<Relay>>,
    Bearer(caller): Bearer,
) -> AppResult<Json<Value>> {
    let a = Identity::parse(&u1)?;
    let b = Identity::parse(&u2)?;
    if caller != a && caller != b {
        return Err(RelayError::Forbidden("not a participant of this room").into());
    }

    let messages = relay.history(&a, &b, before, limit).await?;
    Ok(Json(json!({ "ok": true, "messages": messages })))
}
