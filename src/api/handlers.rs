use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use tracing::warn;

use crate::storage::{cancel::Cancellation, models::Mail, StorageBackend};

/// Response body of the get-mails-of endpoint
#[derive(Debug, Serialize)]
pub struct MailsOfRecipient {
    pub mails: Vec<Mail>,
    pub query_at: DateTime<Utc>,
}

/// Get all retained mails for a recipient address
pub async fn get_mails_of_recipient(
    Path(address): Path<String>,
    State(storage): State<Arc<dyn StorageBackend>>,
) -> Result<Json<MailsOfRecipient>, (StatusCode, &'static str)> {
    let listing = storage.list_mails(&address, Cancellation::new()).await;

    match listing.and_then(|listing| listing.into_result()) {
        Ok(mails) => Ok(Json(MailsOfRecipient {
            mails,
            query_at: Utc::now(),
        })),
        Err(e) => {
            warn!("Failed to fetch mails of [{}]: {}", address, e);
            Err((StatusCode::INTERNAL_SERVER_ERROR, "storage error"))
        }
    }
}
