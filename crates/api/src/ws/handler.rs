use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::response::IntoResponse;
use futures::{SinkExt, StreamExt};
use manimai_core::types::DbId;
use manimai_events::JobEventStream;

use crate::error::AppResult;
use crate::handlers::workspaces::find_workspace;
use crate::state::AppState;

/// GET /api/v1/workspaces/{id}/events
///
/// Upgrades to a WebSocket that streams the workspace's [`JobEvent`]s as
/// JSON text frames. The subscription is taken before the upgrade so no
/// event published in between is missed.
///
/// [`JobEvent`]: manimai_events::JobEvent
pub async fn events_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Path(workspace_id): Path<DbId>,
) -> AppResult<impl IntoResponse> {
    find_workspace(&state, workspace_id).await?;
    let events = state.event_bus.subscribe(Some(workspace_id));
    Ok(ws.on_upgrade(move |socket| handle_socket(socket, workspace_id, events)))
}

/// Manage a single WebSocket connection after upgrade.
///
/// A sender task forwards bus events to the sink while inbound frames are
/// drained on the current task. Either side ending closes the connection.
async fn handle_socket(socket: WebSocket, workspace_id: DbId, mut events: JobEventStream) {
    let conn_id = uuid::Uuid::new_v4().to_string();
    tracing::info!(conn_id = %conn_id, workspace_id, "Event stream connected");

    let (mut sink, mut stream) = socket.split();

    let sender_conn_id = conn_id.clone();
    let mut send_task = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            let text = match serde_json::to_string(&event) {
                Ok(text) => text,
                Err(e) => {
                    tracing::error!(conn_id = %sender_conn_id, error = %e, "Failed to serialize job event");
                    continue;
                }
            };
            if sink.send(Message::Text(text.into())).await.is_err() {
                tracing::debug!(conn_id = %sender_conn_id, "WebSocket sink closed");
                break;
            }
        }
    });

    let receive = async {
        while let Some(result) = stream.next().await {
            match result {
                Ok(Message::Close(_)) => break,
                Ok(_) => {}
                Err(e) => {
                    tracing::debug!(conn_id = %conn_id, error = %e, "WebSocket receive error");
                    break;
                }
            }
        }
    };

    tokio::select! {
        _ = &mut send_task => {}
        () = receive => send_task.abort(),
    }
    tracing::info!(conn_id = %conn_id, workspace_id, "Event stream disconnected");
}
