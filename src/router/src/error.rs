use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use maintenance::MaintenanceError;
use thiserror::Error;

/// Failure of an admin request. Internal details are logged, never returned.
#[derive(Error, Debug)]
pub enum AdminRequestError {
    #[error(transparent)]
    Maintenance(#[from] MaintenanceError),
}

impl AdminRequestError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            AdminRequestError::Maintenance(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AdminRequestError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let message = match self {
            AdminRequestError::Maintenance(e) => {
                tracing::error!(error = %e, "Admin request failed");
                "Internal server error"
            }
        };
        (status, Json(serde_json::json!({ "error": message }))).into_response()
    }
}
