//! Live room summary over plain HTTP.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::Json;
use tracing::warn;
use uuid::Uuid;

use crate::services::RoomError;
use crate::state::AppState;
use crate::wire::RoomSummary;

/// `GET /api/rooms/:id/live`: same data as the `room-info` event.
pub async fn live_summary(
    State(state): State<AppState>,
    Path(room_id): Path<Uuid>,
) -> Result<Json<RoomSummary>, StatusCode> {
    let summary = state
        .rooms
        .room_info(room_id, false)
        .await
        .map_err(room_error_to_status)?;
    Ok(Json(summary))
}

pub(crate) fn room_error_to_status(err: RoomError) -> StatusCode {
    match err {
        RoomError::NotFound(_) => StatusCode::NOT_FOUND,
        RoomError::NotMember(_) => StatusCode::FORBIDDEN,
        RoomError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        RoomError::Store(e) => {
            warn!(error = %e, "rooms: store failure");
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

#[cfg(test)]
#[path = "rooms_test.rs"]
mod tests;
