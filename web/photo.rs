use crate::AppState;
use axum::{
    Json,
    body::Bytes,
    extract::{
        ConnectInfo, Multipart, Path, State,
        multipart::{MultipartError, MultipartRejection},
    },
    http::{HeaderMap, StatusCode, header},
    response::IntoResponse,
};
use bytes::BytesMut;
use futures::TryStreamExt;
use photofinder::{
    app::{
        AnalysisReport, AnalyzePhotoCommand, AppError, RequestContext, UploadPhotoCommand,
        consent_from_json, consent_from_token, open_upload,
    },
    storage::StorageError,
};
use serde::Serialize;
use serde_json::Value;
use std::net::SocketAddr;

#[derive(Serialize, Debug)]
pub struct UploadResponse {
    pub status: &'static str,
    pub filename: String,
    pub url: String,
}

/// Builds `scheme://host` as the client addressed it.
fn request_origin(headers: &HeaderMap, fallback_host: &str) -> String {
    let scheme = headers
        .get("x-forwarded-proto")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .unwrap_or("http");
    let host = headers
        .get(header::HOST)
        .and_then(|v| v.to_str().ok())
        .unwrap_or(fallback_host);

    format!("{scheme}://{host}")
}

fn request_context(state: &AppState, addr: SocketAddr, headers: &HeaderMap) -> RequestContext {
    RequestContext {
        client_address: Some(addr.ip().to_string()),
        client_agent: headers
            .get(header::USER_AGENT)
            .and_then(|v| v.to_str().ok())
            .map(String::from),
        origin: request_origin(headers, &state.fallback_host),
    }
}

pub async fn upload_photo(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<UploadResponse>, PhotoError> {
    let mut photo = None;
    let mut consent = None;

    // A body that is not multipart is treated as an empty form. Errors while
    // reading a multipart body abort the upload so a cut-off file is never stored.
    if let Ok(mut multipart) = multipart {
        while let Some(field) = multipart.next_field().await? {
            let name = field.name().unwrap_or_default().to_string();

            match name.as_str() {
                "photo" => {
                    let original_name = field.file_name().map(str::to_string);
                    let mut data = BytesMut::new();
                    let mut stream = field.into_stream();
                    while let Some(chunk) = stream.try_next().await? {
                        data.extend_from_slice(&chunk);
                    }
                    photo = Some((original_name, data.freeze().to_vec()));
                }
                "consent" => {
                    consent = Some(field.text().await?);
                }
                _ => {}
            }
        }
    }

    let cmd = UploadPhotoCommand::new(consent_from_token(consent.as_deref()))
        .with_context(request_context(&state, addr, &headers));

    let cmd = match photo {
        Some((original_name, bytes)) => cmd.with_file(original_name, bytes),
        None => cmd,
    };

    let uploaded = cmd.execute(&state.storage, &state.db, &state.urls).await?;

    Ok(Json(UploadResponse {
        status: "ok",
        filename: uploaded.filename,
        url: uploaded.url,
    }))
}

pub async fn describe_and_search(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<AnalysisReport>, PhotoError> {
    let request: Value = serde_json::from_slice(&body).map_err(|_| PhotoError::InvalidJson)?;
    if !request.is_object() {
        return Err(PhotoError::InvalidJson);
    }

    let filename = request
        .get("filename")
        .and_then(Value::as_str)
        .map(String::from);
    let flag = |key: &str| request.get(key).and_then(Value::as_bool).unwrap_or(true);

    let report = AnalyzePhotoCommand::new(filename, consent_from_json(request.get("consent")))
        .with_visual_search(flag("use_bing"))
        .with_yandex(flag("use_yandex"))
        .with_context(request_context(&state, addr, &headers))
        .execute(&state.storage, &state.db, &state.providers, &state.urls)
        .await?;

    Ok(Json(report))
}

pub async fn get_upload(
    State(state): State<AppState>,
    Path(filename): Path<String>,
) -> Result<impl IntoResponse, PhotoError> {
    let (bytes, mime) = open_upload(&state.storage, &filename)?;

    Ok(([(header::CONTENT_TYPE, mime)], bytes))
}

pub enum PhotoError {
    App(AppError),

    InvalidJson,

    Multipart(MultipartError),
}

impl From<AppError> for PhotoError {
    fn from(value: AppError) -> Self {
        PhotoError::App(value)
    }
}

impl From<MultipartError> for PhotoError {
    fn from(value: MultipartError) -> Self {
        PhotoError::Multipart(value)
    }
}

impl IntoResponse for PhotoError {
    fn into_response(self) -> axum::response::Response {
        #[derive(Serialize)]
        struct ErrorResponse {
            error: &'static str,
        }

        let (status, error) = match self {
            PhotoError::App(app_error) => match app_error {
                AppError::ConsentRequired => (StatusCode::BAD_REQUEST, "consent_required"),
                AppError::MissingFile => (StatusCode::BAD_REQUEST, "no_file"),
                AppError::MissingFilename => (StatusCode::BAD_REQUEST, "missing_filename"),
                AppError::NotFound { .. } => (StatusCode::NOT_FOUND, "not_found"),
                AppError::Storage(StorageError::FileNotFound { .. }) => {
                    (StatusCode::NOT_FOUND, "not_found")
                }
                e @ (AppError::Storage(_) | AppError::Database(_)) => {
                    tracing::error!(error = %e, "request failed");
                    (StatusCode::INTERNAL_SERVER_ERROR, "internal_error")
                }
            },
            PhotoError::InvalidJson => (StatusCode::BAD_REQUEST, "invalid_json"),
            PhotoError::Multipart(e) => {
                let status = e.status();
                tracing::warn!(%status, error = %e.body_text(), "multipart body rejected");
                if status == StatusCode::PAYLOAD_TOO_LARGE {
                    (status, "payload_too_large")
                } else {
                    (status, "invalid_multipart")
                }
            }
        };

        (status, Json(ErrorResponse { error })).into_response()
    }
}
