// src/server/routes.rs
use crate::health::HealthChecker;
use crate::server::response::{json_response, success, ApiError};
use crate::store::{AppRegistry, NewApp, NewUpload, SettingsStore, StoreError, Upload, UploadStore};
use crate::uploads::{content_type_for, FileStorage, StoredFile, UploadError, MAX_FILES};
use hyper::body::HttpBody;
use hyper::header::{HeaderValue, CONTENT_TYPE};
use hyper::{Body, Method, Request, Response, StatusCode};
use percent_encoding::percent_decode_str;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};
use std::sync::Arc;

pub const MAX_BODY_BYTES: usize = 10 * 1024 * 1024;

const DEFAULT_UPLOAD_PAGE: i64 = 50;

/// Everything a request handler can reach.
pub struct ApiState {
    pub registry: Arc<dyn AppRegistry>,
    pub settings: Arc<dyn SettingsStore>,
    pub checker: Arc<HealthChecker>,
    pub uploads: Arc<dyn UploadStore>,
    pub files: Arc<FileStorage>,
}

/// Upload row as returned to clients, with its public location.
#[derive(Debug, Serialize)]
struct UploadView {
    #[serde(flatten)]
    upload: Upload,
    url: String,
    path: String,
}

impl From<Upload> for UploadView {
    fn from(upload: Upload) -> Self {
        let path = upload.public_path();
        Self {
            url: path.clone(),
            path,
            upload,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    HealthCheck,
    ListApps,
    CreateApp,
    BulkCreateApps,
    GetApp(String),
    UpdateApp(String),
    DeleteApp(String),
    TogglePin(String),
    ListSettings,
    UpdateSettings,
    GetSetting(String),
    UploadFile,
    UploadFiles,
    ListUploads,
    GetUpload(String),
    ServeUpload(String),
    NotFound,
}

impl Route {
    pub fn resolve(method: &Method, path: &str) -> Self {
        let decoded: Vec<String> = path
            .trim_matches('/')
            .split('/')
            .map(|segment| percent_decode_str(segment).decode_utf8_lossy().into_owned())
            .collect();
        let segments: Vec<&str> = decoded.iter().map(String::as_str).collect();

        match (method, segments.as_slice()) {
            (&Method::GET, ["api", "apps", "health", "check"]) => Route::HealthCheck,
            (&Method::GET, ["api", "apps"]) => Route::ListApps,
            (&Method::POST, ["api", "apps"]) => Route::CreateApp,
            (&Method::POST, ["api", "apps", "bulk"]) => Route::BulkCreateApps,
            (&Method::GET, ["api", "apps", id]) => Route::GetApp(id.to_string()),
            (&Method::PUT, ["api", "apps", id]) => Route::UpdateApp(id.to_string()),
            (&Method::DELETE, ["api", "apps", id]) => Route::DeleteApp(id.to_string()),
            (&Method::PATCH, ["api", "apps", id, "pin"]) => Route::TogglePin(id.to_string()),
            (&Method::GET, ["api", "settings"]) => Route::ListSettings,
            (&Method::PUT, ["api", "settings"]) => Route::UpdateSettings,
            (&Method::GET, ["api", "settings", key]) => Route::GetSetting(key.to_string()),
            (&Method::POST, ["api", "uploads"]) => Route::UploadFile,
            (&Method::POST, ["api", "uploads", "multiple"]) => Route::UploadFiles,
            (&Method::GET, ["api", "uploads"]) => Route::ListUploads,
            (&Method::GET, ["api", "uploads", id]) => Route::GetUpload(id.to_string()),
            (&Method::GET, ["uploads", file]) => Route::ServeUpload(file.to_string()),
            _ => Route::NotFound,
        }
    }

    /// Low-cardinality label for metrics and logs.
    pub fn pattern(&self) -> &'static str {
        match self {
            Route::HealthCheck => "/api/apps/health/check",
            Route::ListApps | Route::CreateApp => "/api/apps",
            Route::BulkCreateApps => "/api/apps/bulk",
            Route::GetApp(_) | Route::UpdateApp(_) | Route::DeleteApp(_) => "/api/apps/:id",
            Route::TogglePin(_) => "/api/apps/:id/pin",
            Route::ListSettings | Route::UpdateSettings => "/api/settings",
            Route::GetSetting(_) => "/api/settings/:key",
            Route::UploadFile | Route::ListUploads => "/api/uploads",
            Route::UploadFiles => "/api/uploads/multiple",
            Route::GetUpload(_) => "/api/uploads/:id",
            Route::ServeUpload(_) => "/uploads/:file",
            Route::NotFound => "unmatched",
        }
    }
}

pub async fn dispatch(
    state: &ApiState,
    route: Route,
    req: Request<Body>,
) -> Result<Response<Body>, ApiError> {
    match route {
        Route::HealthCheck => check_health(state).await,
        Route::ListApps => {
            let apps = state
                .registry
                .list_apps()
                .await
                .map_err(|e| ApiError::internal("Failed to fetch apps", e))?;
            Ok(json_response(StatusCode::OK, &apps))
        }
        Route::CreateApp => {
            let payload: NewApp = read_json(req.into_body()).await?;
            let app = state
                .registry
                .create_app(payload)
                .await
                .map_err(|e| store_error("Failed to create app", e))?;
            Ok(json_response(StatusCode::CREATED, &app))
        }
        Route::BulkCreateApps => {
            let body: Value = read_json(req.into_body()).await?;
            let Value::Array(items) = body else {
                return Err(ApiError::BadRequest(
                    "Request body must be an array of apps".to_string(),
                ));
            };
            let result = state
                .registry
                .bulk_create(items)
                .await
                .map_err(|e| ApiError::internal("Failed to bulk create apps", e))?;
            Ok(json_response(StatusCode::CREATED, &result))
        }
        Route::GetApp(id) => {
            let app = match parse_id(&id) {
                Some(id) => state
                    .registry
                    .get_app(id)
                    .await
                    .map_err(|e| ApiError::internal("Failed to fetch app", e))?,
                None => None,
            };
            app.map(|app| json_response(StatusCode::OK, &app))
                .ok_or(ApiError::NotFound("App not found"))
        }
        Route::UpdateApp(id) => {
            let payload: NewApp = read_json(req.into_body()).await?;
            let updated = match parse_id(&id) {
                Some(id) => state
                    .registry
                    .update_app(id, payload)
                    .await
                    .map_err(|e| store_error("Failed to update app", e))?,
                None => None,
            };
            updated
                .map(|app| json_response(StatusCode::OK, &app))
                .ok_or(ApiError::NotFound("App not found"))
        }
        Route::DeleteApp(id) => {
            let deleted = match parse_id(&id) {
                Some(id) => state
                    .registry
                    .delete_app(id)
                    .await
                    .map_err(|e| ApiError::internal("Failed to delete app", e))?,
                None => false,
            };
            if deleted {
                Ok(success("App deleted successfully"))
            } else {
                Err(ApiError::NotFound("App not found"))
            }
        }
        Route::TogglePin(id) => {
            let toggled = match parse_id(&id) {
                Some(id) => state
                    .registry
                    .toggle_pin(id)
                    .await
                    .map_err(|e| ApiError::internal("Failed to toggle pin", e))?,
                None => None,
            };
            toggled
                .map(|app| json_response(StatusCode::OK, &app))
                .ok_or(ApiError::NotFound("App not found"))
        }
        Route::ListSettings => {
            let settings = state
                .settings
                .all_settings()
                .await
                .map_err(|e| ApiError::internal("Failed to fetch settings", e))?;
            Ok(json_response(StatusCode::OK, &settings))
        }
        Route::UpdateSettings => {
            let body: Value = read_json(req.into_body()).await?;
            let Value::Object(settings) = body else {
                return Err(ApiError::BadRequest(
                    "Settings must be a JSON object".to_string(),
                ));
            };
            state
                .settings
                .put_settings(settings)
                .await
                .map_err(|e| ApiError::internal("Failed to update settings", e))?;
            Ok(success("Settings updated successfully"))
        }
        Route::GetSetting(key) => {
            let value = state
                .settings
                .get_setting(&key)
                .await
                .map_err(|e| ApiError::internal("Failed to fetch setting", e))?
                .ok_or(ApiError::NotFound("Setting not found"))?;

            let mut body = Map::new();
            body.insert(key, value);
            Ok(json_response(StatusCode::OK, &body))
        }
        Route::UploadFile => {
            let mut stored = receive_uploads(state, req, "file", 1, "Failed to upload file").await?;
            let Some(file) = stored.pop() else {
                return Err(ApiError::BadRequest("No file uploaded".to_string()));
            };
            let upload = save_upload(state, file.into(), "Failed to upload file").await?;
            Ok(json_response(StatusCode::CREATED, &UploadView::from(upload)))
        }
        Route::UploadFiles => {
            let stored =
                receive_uploads(state, req, "files", MAX_FILES, "Failed to upload files").await?;
            if stored.is_empty() {
                return Err(ApiError::BadRequest("No files uploaded".to_string()));
            }

            let mut views = Vec::with_capacity(stored.len());
            let mut pending = stored.into_iter();
            while let Some(file) = pending.next() {
                match save_upload(state, file.into(), "Failed to upload files").await {
                    Ok(upload) => views.push(UploadView::from(upload)),
                    Err(e) => {
                        for file in pending {
                            state.files.remove(&file.filename).await;
                        }
                        return Err(e);
                    }
                }
            }
            Ok(json_response(StatusCode::CREATED, &views))
        }
        Route::ListUploads => {
            let (limit, offset) = page_params(req.uri().query());
            let uploads = state
                .uploads
                .list_uploads(limit, offset)
                .await
                .map_err(|e| ApiError::internal("Failed to fetch uploads", e))?;
            let views: Vec<UploadView> = uploads.into_iter().map(UploadView::from).collect();
            Ok(json_response(StatusCode::OK, &views))
        }
        Route::GetUpload(id) => {
            let upload = match parse_id(&id) {
                Some(id) => state
                    .uploads
                    .get_upload(id)
                    .await
                    .map_err(|e| ApiError::internal("Failed to fetch upload", e))?,
                None => None,
            };
            upload
                .map(|upload| json_response(StatusCode::OK, &UploadView::from(upload)))
                .ok_or(ApiError::NotFound("Upload not found"))
        }
        Route::ServeUpload(file) => {
            let bytes = state
                .files
                .read(&file)
                .await
                .map_err(|e| ApiError::internal("Failed to read upload", e))?
                .ok_or(ApiError::NotFound("Not found"))?;

            let mut response = Response::new(Body::from(bytes));
            response
                .headers_mut()
                .insert(CONTENT_TYPE, HeaderValue::from_static(content_type_for(&file)));
            Ok(response)
        }
        Route::NotFound => Err(ApiError::NotFound("Not found")),
    }
}

async fn receive_uploads(
    state: &ApiState,
    req: Request<Body>,
    field: &str,
    max_files: usize,
    message: &'static str,
) -> Result<Vec<StoredFile>, ApiError> {
    let content_type = req
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .map(str::to_owned);

    state
        .files
        .receive(req.into_body(), content_type.as_deref(), field, max_files)
        .await
        .map_err(|e| upload_error(message, e))
}

/// Records the row, removing the file again when that fails.
async fn save_upload(
    state: &ApiState,
    upload: NewUpload,
    message: &'static str,
) -> Result<Upload, ApiError> {
    let filename = upload.filename.clone();
    match state.uploads.insert_upload(upload).await {
        Ok(upload) => Ok(upload),
        Err(e) => {
            state.files.remove(&filename).await;
            Err(ApiError::internal(message, e))
        }
    }
}

fn upload_error(message: &'static str, err: UploadError) -> ApiError {
    if err.is_client_error() {
        ApiError::BadRequest(err.to_string())
    } else {
        ApiError::internal(message, err)
    }
}

/// `limit` defaults to 50 unless positive, `offset` to 0 unless non-negative.
fn page_params(query: Option<&str>) -> (i64, i64) {
    let mut limit = DEFAULT_UPLOAD_PAGE;
    let mut offset = 0;

    for (key, value) in url::form_urlencoded::parse(query.unwrap_or("").as_bytes()) {
        match key.as_ref() {
            "limit" => {
                limit = value
                    .parse()
                    .ok()
                    .filter(|n: &i64| *n > 0)
                    .unwrap_or(DEFAULT_UPLOAD_PAGE)
            }
            "offset" => offset = value.parse().ok().filter(|n: &i64| *n >= 0).unwrap_or(0),
            _ => {}
        }
    }

    (limit, offset)
}

async fn check_health(state: &ApiState) -> Result<Response<Body>, ApiError> {
    // registry snapshot is taken before any probe starts
    let apps = state
        .registry
        .list_app_refs()
        .await
        .map_err(|e| ApiError::internal("Failed to check app health", e))?;

    let report = state.checker.check_health(apps).await;
    Ok(json_response(StatusCode::OK, &report))
}

fn parse_id(raw: &str) -> Option<i64> {
    raw.parse().ok()
}

fn store_error(message: &'static str, err: StoreError) -> ApiError {
    match err {
        StoreError::InvalidInput(msg) => ApiError::BadRequest(msg),
        other => ApiError::internal(message, other),
    }
}

async fn read_json<T: DeserializeOwned>(mut body: Body) -> Result<T, ApiError> {
    let mut buf = Vec::new();

    while let Some(chunk) = body.data().await {
        let chunk =
            chunk.map_err(|e| ApiError::BadRequest(format!("Failed to read request body: {}", e)))?;
        if buf.len() + chunk.len() > MAX_BODY_BYTES {
            return Err(ApiError::PayloadTooLarge);
        }
        buf.extend_from_slice(&chunk);
    }

    serde_json::from_slice(&buf).map_err(|e| ApiError::BadRequest(format!("Invalid JSON body: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_route_resolution() {
        assert_eq!(
            Route::resolve(&Method::GET, "/api/apps/health/check"),
            Route::HealthCheck
        );
        assert_eq!(Route::resolve(&Method::GET, "/api/apps/"), Route::ListApps);
        assert_eq!(Route::resolve(&Method::POST, "/api/apps/bulk"), Route::BulkCreateApps);
        assert_eq!(
            Route::resolve(&Method::GET, "/api/apps/12"),
            Route::GetApp("12".to_string())
        );
        assert_eq!(
            Route::resolve(&Method::PATCH, "/api/apps/12/pin"),
            Route::TogglePin("12".to_string())
        );
        assert_eq!(
            Route::resolve(&Method::GET, "/api/settings/weatherLat"),
            Route::GetSetting("weatherLat".to_string())
        );
        assert_eq!(Route::resolve(&Method::POST, "/api/uploads"), Route::UploadFile);
        assert_eq!(
            Route::resolve(&Method::POST, "/api/uploads/multiple"),
            Route::UploadFiles
        );
        assert_eq!(
            Route::resolve(&Method::GET, "/api/uploads/3"),
            Route::GetUpload("3".to_string())
        );
        assert_eq!(
            Route::resolve(&Method::GET, "/uploads/1-ab.svg"),
            Route::ServeUpload("1-ab.svg".to_string())
        );
        assert_eq!(Route::resolve(&Method::POST, "/api/apps/health/check"), Route::NotFound);
        assert_eq!(Route::resolve(&Method::GET, "/"), Route::NotFound);
    }

    #[test]
    fn test_segments_are_percent_decoded() {
        assert_eq!(
            Route::resolve(&Method::GET, "/api/settings/my%20key"),
            Route::GetSetting("my key".to_string())
        );
        assert_eq!(
            Route::resolve(&Method::GET, "/api/settings/a%2Fb"),
            Route::GetSetting("a/b".to_string())
        );
        assert_eq!(
            Route::resolve(&Method::GET, "/api/%61pps"),
            Route::ListApps
        );
        assert_eq!(
            Route::resolve(&Method::GET, "/uploads/%2E%2E%2Fdb%2Fapp.db"),
            Route::ServeUpload("../db/app.db".to_string())
        );
    }

    #[test]
    fn test_page_params() {
        assert_eq!(page_params(None), (50, 0));
        assert_eq!(page_params(Some("limit=5&offset=10")), (5, 10));
        assert_eq!(page_params(Some("limit=0&offset=-3")), (50, 0));
        assert_eq!(page_params(Some("limit=abc")), (50, 0));
    }

    #[test]
    fn test_patterns_hide_ids() {
        assert_eq!(Route::GetApp("7".to_string()).pattern(), "/api/apps/:id");
        assert_eq!(Route::GetSetting("x".to_string()).pattern(), "/api/settings/:key");
        assert_eq!(Route::ServeUpload("a.png".to_string()).pattern(), "/uploads/:file");
    }

    #[tokio::test]
    async fn test_read_json_rejects_garbage() {
        let err = read_json::<Value>(Body::from("{nope")).await.unwrap_err();
        assert!(matches!(err, ApiError::BadRequest(_)));
    }

    #[tokio::test]
    async fn test_read_json_enforces_limit() {
        let big = vec![b' '; MAX_BODY_BYTES + 1];
        let err = read_json::<Value>(Body::from(big)).await.unwrap_err();
        assert!(matches!(err, ApiError::PayloadTooLarge));
    }
}
