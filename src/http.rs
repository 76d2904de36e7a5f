//! JSON request handlers for the roadmap API.

use bytes::Bytes;
use http_body_util::{BodyExt, Full, LengthLimitError, Limited};
use hyper::body::Body;
use hyper::header::{CONTENT_TYPE, HeaderMap, HeaderValue};
use hyper::{Method, Request, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::time::Instant;
use thiserror::Error;

use crate::auth;
use crate::config::ServerConfig;
use crate::error::ServiceError;
use crate::metadata::PKG_VERSION;
use crate::progress::ProgressService;
use crate::types::NodeInput;

pub type ResponseBody = Full<Bytes>;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

const ROUTES: &[&str] = &[
    "/health",
    "/api/roadmap",
    "/api/roadmap/generate",
    "/api/roadmap/progress",
    "/api/roadmap/update",
];

pub struct AppState {
    pub service: ProgressService,
    pub config: ServerConfig,
    started_at: Instant,
}

impl AppState {
    pub fn new(service: ProgressService, config: ServerConfig) -> Self {
        Self {
            service,
            config,
            started_at: Instant::now(),
        }
    }
}

#[derive(Debug, Error)]
enum ApiError {
    #[error(transparent)]
    Service(#[from] ServiceError),
    #[error("Invalid JSON body: {0}")]
    BadBody(String),
    #[error("Request body too large")]
    PayloadTooLarge,
    #[error("Not found")]
    RouteNotFound,
    #[error("Method not allowed")]
    MethodNotAllowed,
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::Service(ServiceError::InvalidInput(_))
            | ApiError::Service(ServiceError::AlreadyExists(_))
            | ApiError::BadBody(_) => StatusCode::BAD_REQUEST,
            ApiError::Service(ServiceError::Unauthorized) => StatusCode::UNAUTHORIZED,
            ApiError::Service(ServiceError::NotFound(_)) | ApiError::RouteNotFound => {
                StatusCode::NOT_FOUND
            }
            ApiError::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
            ApiError::PayloadTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            ApiError::Service(ServiceError::Storage(_)) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn into_response(self, failure: &str, expose_detail: bool) -> Response<ResponseBody> {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, "{failure}");
            let body = if expose_detail {
                json!({ "message": failure, "error": self.to_string() })
            } else {
                json!({ "message": failure })
            };
            return json_response(status, &body);
        }
        tracing::debug!(status = status.as_u16(), error = %self, "Request rejected");
        json_response(status, &json!({ "message": self.to_string() }))
    }
}

#[derive(Debug, Deserialize)]
struct RoadmapRequest {
    #[serde(default)]
    interest: Option<String>,
    #[serde(default)]
    nodes: Option<Vec<NodeInput>>,
}

impl RoadmapRequest {
    fn into_parts(self) -> Result<(String, Vec<NodeInput>), ApiError> {
        match (self.interest, self.nodes) {
            (Some(interest), Some(nodes)) if !interest.trim().is_empty() => Ok((interest, nodes)),
            _ => Err(ServiceError::InvalidInput("Interest and nodes are required".into()).into()),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProgressRequest {
    #[serde(default)]
    node_id: Option<String>,
    #[serde(default)]
    status: Option<String>,
}

/// Dispatch one request. Never fails; errors become JSON error responses.
pub async fn route<B>(state: &AppState, req: Request<B>) -> Response<ResponseBody>
where
    B: Body<Data = Bytes>,
    B::Error: Into<BoxError>,
{
    let started = Instant::now();
    let method = req.method().clone();
    let path = normalize(req.uri().path()).to_string();

    let (outcome, failure) = match (&method, path.as_str()) {
        (&Method::GET, "/health") => (Ok(health(state)), "Health check failed"),
        (&Method::POST, "/api/roadmap/generate") => {
            (generate(state, req).await, "Failed to generate roadmap")
        }
        (&Method::GET, "/api/roadmap") => (fetch(state, req).await, "Failed to fetch roadmap"),
        (&Method::PUT, "/api/roadmap/progress") => {
            (progress(state, req).await, "Failed to update progress")
        }
        (&Method::PUT, "/api/roadmap/update") => {
            (update(state, req).await, "Failed to update roadmap")
        }
        (_, p) if ROUTES.contains(&p) => (Err(ApiError::MethodNotAllowed), "Method not allowed"),
        _ => (Err(ApiError::RouteNotFound), "Not found"),
    };

    let response = outcome
        .unwrap_or_else(|err| err.into_response(failure, state.config.expose_error_detail));
    tracing::info!(
        method = %method,
        path = %path,
        status = response.status().as_u16(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "Handled request"
    );
    response
}

fn normalize(path: &str) -> &str {
    match path.trim_end_matches('/') {
        "" => "/",
        p => p,
    }
}

fn health(state: &AppState) -> Response<ResponseBody> {
    json_response(
        StatusCode::OK,
        &json!({
            "status": "ok",
            "version": PKG_VERSION,
            "uptimeSeconds": state.started_at.elapsed().as_secs(),
            "store": state.service.store().backend_name(),
        }),
    )
}

async fn generate<B>(state: &AppState, req: Request<B>) -> Result<Response<ResponseBody>, ApiError>
where
    B: Body<Data = Bytes>,
    B::Error: Into<BoxError>,
{
    let user = authenticate(state, req.headers()).await?;
    let (interest, nodes) = read_json::<_, RoadmapRequest>(req, state.config.max_body_bytes)
        .await?
        .into_parts()?;
    let roadmap = state.service.create(&user, &interest, nodes).await?;
    Ok(json_response(StatusCode::CREATED, &roadmap))
}

async fn fetch<B>(state: &AppState, req: Request<B>) -> Result<Response<ResponseBody>, ApiError> {
    let user = authenticate(state, req.headers()).await?;
    match state.service.fetch(&user).await {
        Ok(view) => Ok(json_response(StatusCode::OK, &view)),
        Err(ServiceError::NotFound(message)) => Ok(json_response(
            StatusCode::NOT_FOUND,
            &json!({ "message": message, "userId": user }),
        )),
        Err(err) => Err(err.into()),
    }
}

async fn progress<B>(state: &AppState, req: Request<B>) -> Result<Response<ResponseBody>, ApiError>
where
    B: Body<Data = Bytes>,
    B::Error: Into<BoxError>,
{
    let user = authenticate(state, req.headers()).await?;
    let body: ProgressRequest = read_json(req, state.config.max_body_bytes).await?;
    let (Some(node_id), Some(status)) = (body.node_id, body.status) else {
        return Err(ServiceError::InvalidInput("Invalid nodeId or status".into()).into());
    };
    let node = state
        .service
        .set_node_status(&user, &node_id, &status)
        .await?;
    Ok(json_response(
        StatusCode::OK,
        &json!({ "message": "Progress updated", "node": node }),
    ))
}

async fn update<B>(state: &AppState, req: Request<B>) -> Result<Response<ResponseBody>, ApiError>
where
    B: Body<Data = Bytes>,
    B::Error: Into<BoxError>,
{
    let user = authenticate(state, req.headers()).await?;
    let (interest, nodes) = read_json::<_, RoadmapRequest>(req, state.config.max_body_bytes)
        .await?
        .into_parts()?;
    let roadmap = state.service.replace(&user, &interest, nodes).await?;
    Ok(json_response(StatusCode::OK, &roadmap))
}

async fn authenticate(state: &AppState, headers: &HeaderMap) -> Result<String, ApiError> {
    let user = auth::caller(
        state.service.store().as_ref(),
        headers,
        &state.config.session_cookie,
        state.config.session_ttl,
    )
    .await?;
    Ok(user)
}

async fn read_json<B, T>(req: Request<B>, limit: usize) -> Result<T, ApiError>
where
    B: Body<Data = Bytes>,
    B::Error: Into<BoxError>,
    T: DeserializeOwned,
{
    let collected = Limited::new(req.into_body(), limit)
        .collect()
        .await
        .map_err(|err: BoxError| {
            if err.downcast_ref::<LengthLimitError>().is_some() {
                ApiError::PayloadTooLarge
            } else {
                ApiError::BadBody(err.to_string())
            }
        })?;
    let bytes = collected.to_bytes();
    // an absent body reads like `{}` so required-field checks report it
    let raw: &[u8] = if bytes.iter().all(u8::is_ascii_whitespace) {
        b"{}"
    } else {
        &bytes
    };
    serde_json::from_slice(raw).map_err(|e| ApiError::BadBody(e.to_string()))
}

fn json_response<T: Serialize>(status: StatusCode, body: &T) -> Response<ResponseBody> {
    match serde_json::to_vec(body) {
        Ok(bytes) => build_response(status, bytes),
        Err(err) => {
            tracing::error!(error = %err, "Failed to encode response body");
            build_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                br#"{"message":"Internal server error"}"#.to_vec(),
            )
        }
    }
}

fn build_response(status: StatusCode, bytes: Vec<u8>) -> Response<ResponseBody> {
    let mut response = Response::new(Full::new(Bytes::from(bytes)));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{JsonFileStore, MemoryStore, RoadmapEdit, RoadmapStore, StorageError};
    use crate::types::{Roadmap, Session};
    use async_trait::async_trait;
    use chrono::{DateTime, Utc};
    use hyper::header::COOKIE;
    use serde_json::Value;
    use std::sync::Arc;

    async fn state_with(store: Arc<dyn RoadmapStore>, config: ServerConfig) -> (AppState, String) {
        let session = auth::issue_session(store.as_ref(), "u1", ServerConfig::default().session_ttl)
            .await
            .unwrap();
        (
            AppState::new(ProgressService::new(store), config),
            session.token,
        )
    }

    async fn state() -> (AppState, String) {
        state_with(Arc::new(MemoryStore::new()), ServerConfig::default()).await
    }

    async fn send(
        state: &AppState,
        method: Method,
        path: &str,
        token: Option<&str>,
        body: Option<&str>,
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(path);
        if let Some(token) = token {
            builder = builder.header(COOKIE, format!("roadmap.sid={token}"));
        }
        let body = Full::new(Bytes::from(body.unwrap_or_default().to_string()));
        let response = route(state, builder.body(body).unwrap()).await;
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, value)
    }

    const DSA: &str = r#"{"interest":"DSA","nodes":[
        {"id":"n1","title":"Learn Arrays","resources":["https://a"],"status":"completed"},
        {"id":"n2","title":"Learn Trees","task":"Solve 5 tree problems"}]}"#;

    #[tokio::test]
    async fn requests_without_session_are_unauthorized() {
        let (state, _) = state().await;
        let (status, body) = send(&state, Method::GET, "/api/roadmap", None, None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["message"], "User not authenticated");

        let (status, _) = send(
            &state,
            Method::POST,
            "/api/roadmap/generate",
            Some("forged"),
            Some(DSA),
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn generate_then_fetch() {
        let (state, token) = state().await;
        let (status, created) = send(
            &state,
            Method::POST,
            "/api/roadmap/generate",
            Some(token.as_str()),
            Some(DSA),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(created["user"], "u1");
        assert_eq!(created["nodes"][0]["status"], "not-started");
        assert_eq!(created["nodes"][1]["task"], "Solve 5 tree problems");

        let (status, view) = send(&state, Method::GET, "/api/roadmap/", Some(token.as_str()), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(view["roadmap"]["interest"], "DSA");
        assert_eq!(
            view["progress"],
            json!({"n1": "not-started", "n2": "not-started"})
        );
        assert_eq!(view["summary"]["total"], 2);
        assert_eq!(view["summary"]["percentComplete"], 0);
    }

    #[tokio::test]
    async fn second_generate_is_rejected() {
        let (state, token) = state().await;
        send(&state, Method::POST, "/api/roadmap/generate", Some(token.as_str()), Some(DSA)).await;

        let other = r#"{"interest":"ML","nodes":[{"id":"m1","title":"Linear models"}]}"#;
        let (status, body) = send(
            &state,
            Method::POST,
            "/api/roadmap/generate",
            Some(token.as_str()),
            Some(other),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["message"].as_str().unwrap().contains("already exists"));

        let (_, view) = send(&state, Method::GET, "/api/roadmap", Some(token.as_str()), None).await;
        assert_eq!(view["roadmap"]["interest"], "DSA");
    }

    #[tokio::test]
    async fn generate_requires_interest_and_nodes() {
        let (state, token) = state().await;
        for body in [r#"{"interest":"DSA"}"#, r#"{"nodes":[]}"#, ""] {
            let (status, resp) = send(
                &state,
                Method::POST,
                "/api/roadmap/generate",
                Some(token.as_str()),
                Some(body),
            )
            .await;
            assert_eq!(status, StatusCode::BAD_REQUEST);
            assert_eq!(resp["message"], "Interest and nodes are required");
        }

        let (status, _) = send(
            &state,
            Method::POST,
            "/api/roadmap/generate",
            Some(token.as_str()),
            Some("{not json"),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn progress_updates_one_node() {
        let (state, token) = state().await;
        send(&state, Method::POST, "/api/roadmap/generate", Some(token.as_str()), Some(DSA)).await;

        let (status, body) = send(
            &state,
            Method::PUT,
            "/api/roadmap/progress",
            Some(token.as_str()),
            Some(r#"{"nodeId":"n1","status":"in_progress"}"#),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["message"], "Progress updated");
        assert_eq!(body["node"]["id"], "n1");
        assert_eq!(body["node"]["status"], "in-progress");

        let (_, view) = send(&state, Method::GET, "/api/roadmap", Some(token.as_str()), None).await;
        assert_eq!(view["progress"]["n1"], "in-progress");
        assert_eq!(view["progress"]["n2"], "not-started");
        assert_eq!(view["roadmap"]["nodes"][0]["status"], "in-progress");
    }

    #[tokio::test]
    async fn progress_rejects_bad_status_and_unknown_node() {
        let (state, token) = state().await;
        send(&state, Method::POST, "/api/roadmap/generate", Some(token.as_str()), Some(DSA)).await;

        let (status, body) = send(
            &state,
            Method::PUT,
            "/api/roadmap/progress",
            Some(token.as_str()),
            Some(r#"{"nodeId":"n1","status":"archived"}"#),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["message"], "Invalid nodeId or status");

        let (status, _) = send(
            &state,
            Method::PUT,
            "/api/roadmap/progress",
            Some(token.as_str()),
            Some(r#"{"status":"completed"}"#),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, body) = send(
            &state,
            Method::PUT,
            "/api/roadmap/progress",
            Some(token.as_str()),
            Some(r#"{"nodeId":"ghost","status":"completed"}"#),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["message"], "Node not found");

        let (_, view) = send(&state, Method::GET, "/api/roadmap", Some(token.as_str()), None).await;
        assert_eq!(view["progress"]["n1"], "not-started");
    }

    #[tokio::test]
    async fn missing_roadmap_is_not_found() {
        let (state, token) = state().await;
        let (status, body) = send(&state, Method::GET, "/api/roadmap", Some(token.as_str()), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert!(body["message"].as_str().unwrap().starts_with("No roadmap found"));
        assert_eq!(body["userId"], "u1");

        let (status, _) = send(
            &state,
            Method::PUT,
            "/api/roadmap/progress",
            Some(token.as_str()),
            Some(r#"{"nodeId":"n1","status":"completed"}"#),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, body) = send(
            &state,
            Method::PUT,
            "/api/roadmap/update",
            Some(token.as_str()),
            Some(DSA),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["message"], "No roadmap to update");
    }

    #[tokio::test]
    async fn update_replaces_nodes_and_resets_progress() {
        let (state, token) = state().await;
        send(&state, Method::POST, "/api/roadmap/generate", Some(token.as_str()), Some(DSA)).await;
        send(
            &state,
            Method::PUT,
            "/api/roadmap/progress",
            Some(token.as_str()),
            Some(r#"{"nodeId":"n1","status":"completed"}"#),
        )
        .await;

        let ml = r#"{"interest":"ML","nodes":[{"id":"m1","title":"Regression"},{"id":"m2","title":"Trees"}]}"#;
        let (status, roadmap) = send(
            &state,
            Method::PUT,
            "/api/roadmap/update",
            Some(token.as_str()),
            Some(ml),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(roadmap["interest"], "ML");

        let (_, view) = send(&state, Method::GET, "/api/roadmap", Some(token.as_str()), None).await;
        assert_eq!(
            view["progress"],
            json!({"m1": "not-started", "m2": "not-started"})
        );
    }

    #[tokio::test]
    async fn unknown_routes_methods_and_oversize_bodies() {
        let config = ServerConfig {
            max_body_bytes: 32,
            ..ServerConfig::default()
        };
        let (state, token) = state_with(Arc::new(MemoryStore::new()), config).await;

        let (status, _) = send(&state, Method::GET, "/api/nope", Some(token.as_str()), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, _) =
            send(&state, Method::DELETE, "/api/roadmap", Some(token.as_str()), None).await;
        assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED);

        let (status, _) = send(
            &state,
            Method::POST,
            "/api/roadmap/generate",
            Some(token.as_str()),
            Some(DSA),
        )
        .await;
        assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);

        let (status, health) = send(&state, Method::GET, "/health", None, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(health["status"], "ok");
        assert_eq!(health["store"], "memory");
    }

    #[tokio::test]
    async fn sessions_and_imports_from_another_handle_reach_a_running_server() {
        let dir = tempfile::tempdir().unwrap();
        let server_store: Arc<dyn RoadmapStore> =
            Arc::new(JsonFileStore::open(dir.path()).unwrap());
        let state = AppState::new(ProgressService::new(server_store), ServerConfig::default());

        // a separate process (the CLI) opening the same data dir
        let cli_store: Arc<dyn RoadmapStore> = Arc::new(JsonFileStore::open(dir.path()).unwrap());
        let session = auth::issue_session(cli_store.as_ref(), "u7", ServerConfig::default().session_ttl)
            .await
            .unwrap();
        let cli = ProgressService::new(cli_store);
        cli.import(
            "u7",
            "Rust",
            vec![NodeInput {
                id: Some("r1".into()),
                title: Some("Ownership".into()),
                ..NodeInput::default()
            }],
        )
        .await
        .unwrap();

        let (status, view) = send(
            &state,
            Method::GET,
            "/api/roadmap",
            Some(session.token.as_str()),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(view["roadmap"]["interest"], "Rust");
        assert_eq!(view["progress"]["r1"], "not-started");

        // the server's own write keeps the CLI's session
        let (status, _) = send(
            &state,
            Method::PUT,
            "/api/roadmap/progress",
            Some(session.token.as_str()),
            Some(r#"{"nodeId":"r1","status":"completed"}"#),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let reopened = JsonFileStore::open(dir.path()).unwrap();
        assert!(reopened.find_session(&session.token).await.unwrap().is_some());
    }

    /// Sessions work, every roadmap operation hits a dead disk.
    #[derive(Default)]
    struct BrokenDisk {
        sessions: MemoryStore,
    }

    #[async_trait]
    impl RoadmapStore for BrokenDisk {
        fn backend_name(&self) -> &'static str {
            "broken"
        }

        async fn find_roadmap(&self, _user: &str) -> Result<Option<Roadmap>, StorageError> {
            Err(StorageError::Io(std::io::Error::other("disk unplugged")))
        }

        async fn insert_roadmap(&self, _roadmap: Roadmap) -> Result<Roadmap, StorageError> {
            Err(StorageError::Io(std::io::Error::other("disk unplugged")))
        }

        async fn update_roadmap(
            &self,
            _user: &str,
            _edit: RoadmapEdit,
        ) -> Result<Roadmap, StorageError> {
            Err(StorageError::Io(std::io::Error::other("disk unplugged")))
        }

        async fn find_session(&self, token: &str) -> Result<Option<Session>, StorageError> {
            self.sessions.find_session(token).await
        }

        async fn insert_session(&self, session: Session) -> Result<Session, StorageError> {
            self.sessions.insert_session(session).await
        }

        async fn remove_session(&self, token: &str) -> Result<bool, StorageError> {
            self.sessions.remove_session(token).await
        }

        async fn prune_sessions(&self, cutoff: DateTime<Utc>) -> Result<usize, StorageError> {
            self.sessions.prune_sessions(cutoff).await
        }
    }

    #[tokio::test]
    async fn storage_failures_hide_detail_outside_development() {
        let (state, token) =
            state_with(Arc::new(BrokenDisk::default()), ServerConfig::default()).await;
        let (status, body) = send(&state, Method::GET, "/api/roadmap", Some(token.as_str()), None).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["message"], "Failed to fetch roadmap");
        assert!(body.get("error").is_none());

        let dev = ServerConfig {
            expose_error_detail: true,
            ..ServerConfig::default()
        };
        let (state, token) = state_with(Arc::new(BrokenDisk::default()), dev).await;
        let (status, body) = send(
            &state,
            Method::POST,
            "/api/roadmap/generate",
            Some(token.as_str()),
            Some(DSA),
        )
        .await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["message"], "Failed to generate roadmap");
        assert!(body["error"].as_str().unwrap().contains("disk unplugged"));
    }
}
