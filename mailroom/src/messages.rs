use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::Json;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::api::{ApiError, ApiResponse};
use crate::database::{Database, Message};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageBody {
    #[serde(default)]
    pub message: String,
}

/// `POST /data`: store one message, answering with its row id.
///
/// Validation happens before the insert; a rejected request leaves the
/// store untouched.
#[instrument(skip_all)]
pub async fn submit(
    State(db): State<Database>,
    payload: Result<Json<MessageBody>, JsonRejection>,
) -> Result<Json<ApiResponse<i64>>, ApiError> {
    let Json(body) = payload.map_err(|rejection| ApiError::InvalidBody(rejection.body_text()))?;

    if body.message.is_empty() {
        return Err(ApiError::EmptyMessage);
    }

    let id = db.insert_message(&body.message).await?;
    debug!(id, "stored message");
    Ok(Json(ApiResponse::new(id)))
}

/// `GET /data`: every stored message, in insertion order.
#[instrument(skip_all)]
pub async fn list(
    State(db): State<Database>,
) -> Result<Json<ApiResponse<Vec<Message>>>, ApiError> {
    let messages = db.list_messages().await?;
    Ok(Json(ApiResponse::new(messages)))
}
