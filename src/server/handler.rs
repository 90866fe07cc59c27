//! Request handlers.

use crate::error::ExportError;
use crate::output::ExportResult;
use crate::request::{normalize, ExportForm};
use crate::server::AppState;
use axum::async_trait;
use axum::extract::{FromRequest, Request, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::{Form, Json};
use serde_json::json;

/// The export fields, read as JSON when the request says so and as a
/// url-encoded form otherwise.
///
/// Oversized bodies keep axum's `413`; any other rejection becomes
/// [`ExportError::MalformedRequest`].
#[derive(Debug)]
pub struct ExportBody(pub ExportForm);

#[async_trait]
impl<S> FromRequest<S> for ExportBody
where
    S: Send + Sync,
{
    type Rejection = Response;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let rejected = |status: StatusCode, text: String, response: Response| {
            if status == StatusCode::PAYLOAD_TOO_LARGE {
                response
            } else {
                ExportError::MalformedRequest(text).into_response()
            }
        };

        if is_json(req.headers()) {
            match Json::<ExportForm>::from_request(req, state).await {
                Ok(Json(form)) => Ok(Self(form)),
                Err(r) => Err(rejected(r.status(), r.body_text(), r.into_response())),
            }
        } else {
            match Form::<ExportForm>::from_request(req, state).await {
                Ok(Form(form)) => Ok(Self(form)),
                Err(r) => Err(rejected(r.status(), r.body_text(), r.into_response())),
            }
        }
    }
}

/// `POST /`
///
/// Download: the converted bytes as an attachment. Save: the status record,
/// as `key=value` text or as JSON when the client accepts `application/json`.
pub async fn export(
    State(state): State<AppState>,
    headers: HeaderMap,
    ExportBody(form): ExportBody,
) -> Result<Response, ExportError> {
    let request = normalize(form)?;

    match state.exporter.export(&request).await? {
        ExportResult::Download(file) => Ok((
            StatusCode::OK,
            [
                (header::CONTENT_TYPE, file.content_type().to_string()),
                (header::CONTENT_DISPOSITION, file.content_disposition()),
            ],
            file.bytes,
        )
            .into_response()),
        ExportResult::Saved(status) if accepts_json(&headers) => {
            Ok((StatusCode::OK, Json(status)).into_response())
        }
        ExportResult::Saved(status) => Ok((
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
            status.to_query_string(),
        )
            .into_response()),
    }
}

/// `GET /health`
pub async fn health() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}

fn is_json(headers: &HeaderMap) -> bool {
    headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.contains("application/json"))
}

fn accepts_json(headers: &HeaderMap) -> bool {
    headers
        .get_all(header::ACCEPT)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .any(|v| v.contains("application/json"))
}
