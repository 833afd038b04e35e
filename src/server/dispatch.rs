//! Request validation and outcome mapping for the HTTP surface.

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use tracing::{error, warn};

use super::AppState;
use crate::error::PrintdError;
use crate::pipeline::{sanitize_filename, RenderJob, RenderOptions, RenderOutput};
use crate::pool::PoolStats;

pub const MISSING_INPUT: &str = "Either HTML content or URL is required";

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConvertRequest {
    pub html: Option<String>,
    pub url: Option<String>,
    #[serde(default)]
    pub options: RenderOptions,
}

impl ConvertRequest {
    /// Exactly one non-blank input is accepted.
    pub fn into_job(self) -> Result<RenderJob, PrintdError> {
        let html = self.html.filter(|h| !h.trim().is_empty());
        let url = self.url.filter(|u| !u.trim().is_empty());
        match (html, url) {
            (Some(html), None) => Ok(RenderJob::HtmlToPdf {
                html,
                options: self.options,
            }),
            (None, Some(url)) => Ok(RenderJob::UrlToPdf {
                url,
                options: self.options,
            }),
            _ => Err(PrintdError::validation(MISSING_INPUT)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthBody {
    pub status: &'static str,
    pub pool: PoolStats,
}

/// A failed request, already mapped to its status and client-facing message.
#[derive(Debug)]
pub struct DispatchError {
    status: StatusCode,
    message: String,
}

impl DispatchError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl From<PrintdError> for DispatchError {
    fn from(err: PrintdError) -> Self {
        match &err {
            PrintdError::Validation(_) | PrintdError::Serialization(_) => {
                Self::bad_request(err.reason())
            }
            PrintdError::Fetch { .. } => {
                Self::bad_request(format!("Failed to fetch URL: {}", err.reason()))
            }
            _ => Self {
                status: StatusCode::INTERNAL_SERVER_ERROR,
                message: format!("Failed to convert to PDF: {}", err.reason()),
            },
        }
    }
}

impl IntoResponse for DispatchError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            error!(status = self.status.as_u16(), error = %self.message, "request failed");
        } else {
            warn!(status = self.status.as_u16(), error = %self.message, "request rejected");
        }
        let body = ErrorBody {
            error: self.message,
        };
        (self.status, Json(body)).into_response()
    }
}

pub async fn convert(
    State(state): State<AppState>,
    payload: Result<Json<ConvertRequest>, JsonRejection>,
) -> Result<Response, DispatchError> {
    let Json(request) =
        payload.map_err(|rejection| DispatchError::bad_request(rejection.body_text()))?;
    let filename = sanitize_filename(request.options.filename.as_deref());
    let job = request.into_job()?;

    match state.pipeline.run(job).await? {
        RenderOutput::Pdf(bytes) => Ok(pdf_response(bytes, &filename)),
        RenderOutput::Markup(_) => Err(PrintdError::render("renderer returned markup").into()),
    }
}

fn pdf_response(bytes: Vec<u8>, filename: &str) -> Response {
    let value = format!("attachment; filename=\"{filename}\"");
    let disposition = HeaderValue::from_bytes(value.as_bytes())
        .unwrap_or_else(|_| HeaderValue::from_static("attachment; filename=\"document.pdf\""));
    (
        [
            (header::CONTENT_TYPE, HeaderValue::from_static("application/pdf")),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        bytes,
    )
        .into_response()
}

pub async fn health(State(state): State<AppState>) -> Response {
    let pool = state.pipeline.pool();
    let stats = pool.stats();
    if pool.is_accepting() {
        (StatusCode::OK, Json(HealthBody { status: "ok", pool: stats })).into_response()
    } else {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(HealthBody {
                status: "draining",
                pool: stats,
            }),
        )
            .into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn requires_exactly_one_input() {
        let neither = ConvertRequest::default();
        assert_eq!(neither.into_job().unwrap_err().reason(), MISSING_INPUT);

        let both = ConvertRequest {
            html: Some("<p/>".into()),
            url: Some("https://example.com".into()),
            ..ConvertRequest::default()
        };
        assert_eq!(both.into_job().unwrap_err().reason(), MISSING_INPUT);

        let blank = ConvertRequest {
            html: Some("   ".into()),
            ..ConvertRequest::default()
        };
        assert!(blank.into_job().is_err());

        let url = ConvertRequest {
            url: Some("https://example.com".into()),
            ..ConvertRequest::default()
        };
        assert!(matches!(url.into_job(), Ok(RenderJob::UrlToPdf { .. })));
    }

    #[test]
    fn maps_errors_to_status_and_message() {
        let fetch = DispatchError::from(PrintdError::fetch("https://x", "net::ERR_FAILED"));
        assert_eq!(fetch.status(), StatusCode::BAD_REQUEST);
        assert_eq!(fetch.message(), "Failed to fetch URL: net::ERR_FAILED");

        let render = DispatchError::from(PrintdError::render("Printing failed"));
        assert_eq!(render.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(render.message(), "Failed to convert to PDF: Printing failed");

        let exhausted = DispatchError::from(PrintdError::PoolExhausted { waiting: 2 });
        assert_eq!(exhausted.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let invalid = DispatchError::from(PrintdError::validation(MISSING_INPUT));
        assert_eq!(invalid.status(), StatusCode::BAD_REQUEST);
        assert_eq!(invalid.message(), MISSING_INPUT);
    }

    #[test]
    fn disposition_uses_given_filename() {
        let response = pdf_response(b"%PDF-1.7".to_vec(), "custom_report.pdf");
        assert_eq!(
            response.headers()[header::CONTENT_DISPOSITION],
            "attachment; filename=\"custom_report.pdf\""
        );
        assert_eq!(response.headers()[header::CONTENT_TYPE], "application/pdf");
    }
}
