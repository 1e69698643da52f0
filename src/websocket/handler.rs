use axum::{
    extract::{
        ws::{rejection::WebSocketUpgradeRejection, WebSocket},
        Path, Query, State, WebSocketUpgrade,
    },
    http::HeaderMap,
    response::{IntoResponse, Response},
};
use futures::StreamExt;
use serde::Deserialize;

use crate::auth::Identity;
use crate::error::AppError;
use crate::server::AppState;
use crate::store::ChannelInfo;

/// Socket-level cap. Anything between this and `max_frame_bytes` reaches the
/// decoder and gets `INVALID_PAYLOAD` instead of killing the connection.
const MAX_SOCKET_MESSAGE_BYTES: usize = 64 * 1024;

const MAX_CHANNEL_ID_LEN: usize = 64;

#[derive(Debug, Deserialize)]
pub struct WsQuery {
    pub token: Option<String>,
}

/// `GET /channels/{id}/ws`
///
/// Every check runs before the upgrade, so a rejected request never creates a hub.
#[tracing::instrument(
    name = "ws.upgrade",
    skip(ws, state, query, headers),
    fields(has_query_token = query.token.is_some())
)]
pub async fn ws_handler(
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
    Path(channel_id): Path<String>,
    Query(query): Query<WsQuery>,
    headers: HeaderMap,
    State(state): State<AppState>,
) -> Result<Response, AppError> {
    if !state.chat.is_accepting() {
        return Err(AppError::Unavailable("Server is shutting down".to_string()));
    }

    if !is_valid_channel_id(&channel_id) {
        return Err(AppError::NotFound("Channel not found".to_string()));
    }

    let identity = state
        .authenticator
        .authenticate(&headers, query.token.as_deref())
        .await?;

    let channel = state
        .directory
        .lookup(&channel_id)
        .await
        .map_err(|e| AppError::Internal(e.to_string()))?
        .ok_or_else(|| AppError::NotFound("Channel not found".to_string()))?;

    check_not_banned(&state, &channel, &identity).await?;

    let ws = ws.map_err(|e| AppError::Validation(e.body_text()))?;

    tracing::info!(
        user_id = %identity.user_id,
        channel_id = %channel.id,
        "WebSocket upgrade accepted"
    );

    Ok(ws
        .max_message_size(MAX_SOCKET_MESSAGE_BYTES)
        .on_upgrade(move |socket| handle_socket(socket, state, identity, channel))
        .into_response())
}

async fn handle_socket(socket: WebSocket, state: AppState, identity: Identity, channel: ChannelInfo) {
    let (sink, stream) = socket.split();
    state.chat.connect(identity, &channel, sink, stream).await;
}

/// Early ban check so banned users get a 403 instead of an upgrade.
/// The hub checks again on register; backend errors let the request through.
async fn check_not_banned(state: &AppState, channel: &ChannelInfo, identity: &Identity) -> Result<(), AppError> {
    match state.moderation.is_banned(&channel.id, &identity.user_id).await {
        Ok(true) => Err(AppError::Forbidden("Banned from this channel".to_string())),
        Ok(false) => Ok(()),
        Err(e) => {
            tracing::warn!(
                channel_id = %channel.id,
                user_id = %identity.user_id,
                error = %e,
                "Ban pre-check failed"
            );
            Ok(())
        }
    }
}

/// Letters, digits, `-`, `_` and `.`; at most 64 characters
pub fn is_valid_channel_id(id: &str) -> bool {
    !id.is_empty()
        && id.len() <= MAX_CHANNEL_ID_LEN
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
}
