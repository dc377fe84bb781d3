use axum::{
    body::Bytes,
    extract::{Query, State},
    Json,
};
use serde::Deserialize;

use crate::{
    auth::AuthSession,
    errors::ServiceError,
    handlers::ApiResponse,
    services::import::{FileUpload, ImportReport},
    AppState,
};

#[derive(Debug, Deserialize)]
pub struct ImportQuery {
    /// Original file name of the upload, used for the extension check
    pub filename: String,
}

pub async fn import_products(
    State(state): State<AppState>,
    session: AuthSession,
    Query(query): Query<ImportQuery>,
    body: Bytes,
) -> Result<Json<ApiResponse<ImportReport>>, ServiceError> {
    let upload = FileUpload {
        file_name: query.filename,
        bytes: body.to_vec(),
    };

    let report = state
        .services
        .import
        .bulk_upsert_products(&session, upload)
        .await?;
    Ok(Json(ApiResponse::new(report)))
}
