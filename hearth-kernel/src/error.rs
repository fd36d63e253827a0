use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use tracing::error;

use crate::store::StoreError;
use crate::transport::TransportError;

/// Erreurs remontées par les opérations du kernel.
/// Aucune n'est fatale : chaque handler les convertit en réponse d'erreur.
#[derive(Debug, thiserror::Error)]
pub enum KernelError {
    #[error("validation error: {0}")]
    Validation(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),
    #[error("persistence error: {0}")]
    Persistence(#[from] StoreError),
}

impl KernelError {
    pub fn status(&self) -> StatusCode {
        match self {
            KernelError::Validation(_) => StatusCode::BAD_REQUEST,
            KernelError::NotFound(_) => StatusCode::NOT_FOUND,
            KernelError::Transport(_) => StatusCode::BAD_GATEWAY,
            KernelError::Persistence(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for KernelError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!("[kernel] {self}");
        }
        (status, Json(serde_json::json!({ "error": self.to_string() }))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_mapping() {
        assert_eq!(KernelError::Validation("x".into()).status(), StatusCode::BAD_REQUEST);
        assert_eq!(KernelError::NotFound("x".into()).status(), StatusCode::NOT_FOUND);
        assert_eq!(KernelError::from(TransportError::Timeout).status(), StatusCode::BAD_GATEWAY);
        let io = std::io::Error::new(std::io::ErrorKind::Other, "disk full");
        assert_eq!(
            KernelError::from(StoreError::from(io)).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
