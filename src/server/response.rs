// src/server/response.rs
use hyper::header::{HeaderValue, CONTENT_TYPE};
use hyper::{Body, Response, StatusCode};
use serde::Serialize;
use serde_json::json;
use tracing::error;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    NotFound(&'static str),

    #[error("{0}")]
    BadRequest(String),

    #[error("Request body too large")]
    PayloadTooLarge,

    /// `message` goes to the client, `detail` only to the log.
    #[error("{message}: {detail}")]
    Internal { message: &'static str, detail: String },
}

impl ApiError {
    pub fn internal(message: &'static str, detail: impl std::fmt::Display) -> Self {
        ApiError::Internal {
            message,
            detail: detail.to_string(),
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::PayloadTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            ApiError::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<ApiError> for Response<Body> {
    fn from(err: ApiError) -> Self {
        let status = err.status();
        let message = match &err {
            ApiError::Internal { message, detail } => {
                error!("{}: {}", message, detail);
                message.to_string()
            }
            other => other.to_string(),
        };

        json_response(status, &json!({ "error": message }))
    }
}

pub fn json_response<T: Serialize + ?Sized>(status: StatusCode, value: &T) -> Response<Body> {
    let (status, bytes) = match serde_json::to_vec(value) {
        Ok(bytes) => (status, bytes),
        Err(e) => {
            error!("Failed to serialize response: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                br#"{"error":"Internal server error"}"#.to_vec(),
            )
        }
    };

    let mut response = Response::new(Body::from(bytes));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    response
}

pub fn success(message: &str) -> Response<Body> {
    json_response(StatusCode::OK, &json!({ "success": true, "message": message }))
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn body_json(response: Response<Body>) -> serde_json::Value {
        let bytes = hyper::body::to_bytes(response.into_body()).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_internal_error_hides_detail() {
        let response: Response<Body> =
            ApiError::internal("Failed to fetch apps", "disk I/O error").into();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(
            response.headers()[CONTENT_TYPE],
            HeaderValue::from_static("application/json")
        );
        assert_eq!(body_json(response).await, json!({"error": "Failed to fetch apps"}));
    }

    #[tokio::test]
    async fn test_not_found_message() {
        let response: Response<Body> = ApiError::NotFound("App not found").into();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(body_json(response).await, json!({"error": "App not found"}));
    }
}
