use crate::{AppState, photo::PhotoError};
use axum::{Json, extract::State};
use photofinder::app;
use serde::Serialize;

#[derive(Serialize, Debug)]
pub struct DeleteResponse {
    pub status: &'static str,
    pub files_deleted: Vec<String>,
}

#[derive(Serialize, Debug)]
pub struct PurgeResponse {
    pub deleted: Vec<String>,
}

pub async fn delete_data(State(state): State<AppState>) -> Result<Json<DeleteResponse>, PhotoError> {
    let files_deleted = app::delete_all(&state.storage, &state.db).await?;

    Ok(Json(DeleteResponse {
        status: "deleted",
        files_deleted,
    }))
}

pub async fn purge_old(State(state): State<AppState>) -> Result<Json<PurgeResponse>, PhotoError> {
    let deleted = app::purge_old(&state.storage, &state.db, state.config.purge_after_days).await?;

    Ok(Json(PurgeResponse { deleted }))
}
