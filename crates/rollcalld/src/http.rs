//! HTTP routes.
//!
//! | route                   | body                                        |
//! |-------------------------|---------------------------------------------|
//! | `GET /video_feed`       | `multipart/x-mixed-replace; boundary=frame` |
//! | `POST /stop_attendance` | JSON `{message, ...}` or `{error}`          |
//! | `POST /register_user`   | form `name, age, email` -> JSON             |
//! | `GET /status`           | JSON status report                          |

use crate::error::SessionError;
use crate::service::{Registration, Service};
use crate::session::FinalizeOutcome;
use crate::stream::BOUNDARY;
use axum::body::Body;
use axum::extract::{Form, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;
use std::convert::Infallible;

pub fn router(service: Service) -> Router {
    Router::new()
        .route("/video_feed", get(video_feed))
        .route("/stop_attendance", post(stop_attendance))
        .route("/register_user", post(register_user))
        .route("/status", get(status))
        .with_state(service)
}

impl SessionError {
    fn status_code(&self) -> StatusCode {
        match self {
            SessionError::RegistryUnavailable(_) | SessionError::CaptureUnavailable(_) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            SessionError::NoFaceDetected => StatusCode::UNPROCESSABLE_ENTITY,
            SessionError::NoActiveSession => StatusCode::CONFLICT,
            SessionError::InvalidRegistration(_) => StatusCode::BAD_REQUEST,
            SessionError::PersistenceFailure(_)
            | SessionError::Export(_)
            | SessionError::Analysis(_)
            | SessionError::Worker(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for SessionError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::warn!(error = %self, status = status.as_u16(), "request failed");
        }
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

/// Run blocking service work off the async runtime.
async fn blocking<T, F>(service: Service, f: F) -> Result<T, SessionError>
where
    T: Send + 'static,
    F: FnOnce(&Service) -> Result<T, SessionError> + Send + 'static,
{
    tokio::task::spawn_blocking(move || f(&service))
        .await
        .map_err(|e| SessionError::Worker(e.to_string()))?
}

async fn video_feed(State(service): State<Service>) -> Result<Response, SessionError> {
    let rx = blocking(service, |s| s.open_stream()).await?;
    let parts = futures::stream::unfold(rx, |mut rx| async move {
        rx.recv().await.map(|part| (Ok::<_, Infallible>(part), rx))
    });
    Ok((
        [
            (header::CONTENT_TYPE, format!("multipart/x-mixed-replace; boundary={BOUNDARY}")),
            (header::CACHE_CONTROL, "no-cache".to_string()),
        ],
        Body::from_stream(parts),
    )
        .into_response())
}

async fn stop_attendance(State(service): State<Service>) -> Result<Response, SessionError> {
    let outcome = blocking(service, |s| s.stop_attendance()).await?;
    let body = match outcome {
        FinalizeOutcome::AlreadySaved => json!({ "message": "Attendance already saved." }),
        FinalizeOutcome::Saved(summary) => json!({
            "message": "Attendance saved.",
            "file": summary.file.display().to_string(),
            "timestamp": summary.timestamp,
            "present": summary.present,
            "absent": summary.absent,
        }),
    };
    Ok(Json(body).into_response())
}

#[derive(Debug, Deserialize)]
struct RegisterForm {
    #[serde(default)]
    name: String,
    #[serde(default)]
    age: String,
    #[serde(default)]
    email: String,
}

async fn register_user(
    State(service): State<Service>,
    Form(form): Form<RegisterForm>,
) -> Result<Response, SessionError> {
    let registration = Registration::parse(&form.name, &form.age, &form.email)?;
    let name = registration.name.clone();
    blocking(service, move |s| s.register(registration)).await?;
    Ok(Json(json!({ "message": format!("{name} registered successfully!") })).into_response())
}

async fn status(State(service): State<Service>) -> Json<crate::service::StatusReport> {
    Json(service.status())
}
