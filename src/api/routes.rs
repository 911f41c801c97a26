use crate::api::guess_content_type;
use crate::cache::{CacheControlMessage, CacheManager, FetchRequest, MessageOutcome, ResponseSource};
use crate::calendar::{self, MonthView};
use crate::clock::{Zone, parse_wall_clock};
use crate::config::Config;
use crate::model::{ItemDraft, ItemKind, OccurrenceKey};
use crate::notify::click::{ClickAction, ClickOutcome, ClientContext, resolve_click};
use crate::notify::{Dispatcher, Notification};
use crate::planner::{Planner, SharedPlanner};
use crate::reminder::{self, Alert};
use crate::store::Snapshot;
use anyhow::{Context, Result, anyhow};
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, HeaderName, HeaderValue, StatusCode, Uri, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post, put};
use axum::{Json, Router};
use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::sync::{Arc, MutexGuard};
use tracing::warn;

const CACHE_SOURCE_HEADER: &str = "x-ritualbell-cache";
const FORWARDED_HEADERS: [HeaderName; 4] = [
    header::CONTENT_TYPE,
    header::CACHE_CONTROL,
    header::ETAG,
    header::LAST_MODIFIED,
];

#[derive(Clone)]
pub struct ApiState {
    pub config: Arc<Config>,
    pub zone: Zone,
    pub planner: SharedPlanner,
    pub dispatcher: Dispatcher,
    pub cache: Arc<CacheManager>,
}

impl ApiState {
    fn planner(&self) -> Result<MutexGuard<'_, Planner>> {
        self.planner
            .lock()
            .map_err(|_| anyhow!("planner lock poisoned"))
    }
}

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/api/v1/status", get(status))
        .route("/api/v1/items", get(items))
        .route("/api/v1/items/:kind", post(create_item))
        .route("/api/v1/items/:kind/:id", put(update_item).delete(delete_item))
        .route("/api/v1/completions/toggle", post(toggle_completion))
        .route("/api/v1/calendar", get(calendar_month))
        .route("/api/v1/reminders/check", post(check_reminders))
        .route("/api/v1/cache/message", post(cache_message))
        .route("/api/v1/notifications/click", post(notification_click))
        .route("/api/v1/notifications/push", post(notification_push))
        .fallback(get(proxy))
        .with_state(state)
}

#[derive(Debug, Serialize)]
struct StatusPayload {
    now: String,
    timezone: String,
    daily_rituals: usize,
    weekly_rituals: usize,
    tasks: usize,
    completions: usize,
    notifications_enabled: bool,
    cache_state: crate::cache::LifecycleState,
    api_port: u16,
}

#[derive(Debug, Deserialize)]
struct ToggleRequest {
    date: String,
    kind: ItemKind,
    id: String,
}

#[derive(Debug, Deserialize)]
struct CalendarQuery {
    month: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct CheckRequest {
    at: Option<String>,
}

#[derive(Debug, Serialize)]
struct CheckPayload {
    at: String,
    pre_alerts: Vec<Alert>,
    due_alerts: Vec<Alert>,
    marks_written: usize,
}

#[derive(Debug, Deserialize)]
struct ClickRequest {
    #[serde(default)]
    action: ClickAction,
    #[serde(default)]
    clients: Vec<ClientContext>,
}

async fn status(State(state): State<ApiState>) -> ApiResult<Json<StatusPayload>> {
    let mut planner = state.planner()?;
    let snapshot = planner.current_snapshot()?;

    Ok(Json(StatusPayload {
        now: state.zone.now().format("%Y-%m-%dT%H:%M").to_string(),
        timezone: state.config.timezone.clone(),
        daily_rituals: snapshot.daily_rituals.len(),
        weekly_rituals: snapshot.weekly_rituals.len(),
        tasks: snapshot.tasks.len(),
        completions: snapshot.completions.len(),
        notifications_enabled: state.config.notifications_enabled,
        cache_state: state.cache.state(),
        api_port: state.config.api_port,
    }))
}

async fn items(State(state): State<ApiState>) -> ApiResult<Json<Snapshot>> {
    let mut planner = state.planner()?;
    Ok(Json(planner.current_snapshot()?.clone()))
}

async fn create_item(
    State(state): State<ApiState>,
    Path(kind): Path<String>,
    Json(draft): Json<ItemDraft>,
) -> ApiResult<(StatusCode, Json<Value>)> {
    let kind = parse_kind(&kind)?;
    draft.validate(kind).map_err(bad_request)?;

    let id = state.planner()?.store.create(kind, &draft)?;
    Ok((StatusCode::CREATED, Json(json!({ "id": id, "kind": kind }))))
}

async fn update_item(
    State(state): State<ApiState>,
    Path((kind, id)): Path<(String, String)>,
    Json(draft): Json<ItemDraft>,
) -> ApiResult<Json<Value>> {
    let kind = parse_kind(&kind)?;
    draft.validate(kind).map_err(bad_request)?;

    if !state.planner()?.store.update(kind, &id, &draft)? {
        return Err(ApiError::NotFound(format!("No {kind} item with id {id}")));
    }
    Ok(Json(json!({ "updated": true, "id": id })))
}

async fn delete_item(
    State(state): State<ApiState>,
    Path((kind, id)): Path<(String, String)>,
) -> ApiResult<Json<Value>> {
    let kind = parse_kind(&kind)?;
    let deleted = state.planner()?.delete_item(kind, &id)?;
    Ok(Json(json!({ "deleted": deleted, "id": id })))
}

async fn toggle_completion(
    State(state): State<ApiState>,
    Json(request): Json<ToggleRequest>,
) -> ApiResult<Json<Value>> {
    let date = NaiveDate::parse_from_str(request.date.trim(), "%Y-%m-%d")
        .map_err(|_| ApiError::BadRequest(format!("Invalid date: {}. Example: 2024-06-05", request.date)))?;
    let key = OccurrenceKey::new(date, request.kind, request.id);

    let completed = state.planner()?.toggle_completion(key.clone())?;
    Ok(Json(json!({ "key": key.to_string(), "completed": completed })))
}

async fn calendar_month(
    State(state): State<ApiState>,
    Query(query): Query<CalendarQuery>,
) -> ApiResult<Json<MonthView>> {
    let today = state.zone.now().date();
    let (year, month) = match query.month.as_deref() {
        Some(raw) => calendar::parse_month(raw).map_err(bad_request)?,
        None => (today.year(), today.month()),
    };

    let mut planner = state.planner()?;
    let view = calendar::month_view(year, month, planner.current_snapshot()?, today)?;
    Ok(Json(view))
}

async fn check_reminders(
    State(state): State<ApiState>,
    request: Option<Json<CheckRequest>>,
) -> ApiResult<Json<CheckPayload>> {
    let request = request.map(|Json(request)| request).unwrap_or_default();
    let now = match request.at.as_deref() {
        Some(raw) => parse_wall_clock(raw).map_err(bad_request)?,
        None => state.zone.now(),
    };

    let planner = Arc::clone(&state.planner);
    let dispatcher = state.dispatcher.clone();
    let icon = state.config.icon_url();
    let evaluation = tokio::task::spawn_blocking(move || {
        reminder::run_check(&planner, now, &dispatcher, &icon)
    })
    .await
    .context("Reminder check task panicked")??;

    Ok(Json(CheckPayload {
        at: now.format("%Y-%m-%dT%H:%M").to_string(),
        marks_written: evaluation.new_marks.len(),
        pre_alerts: evaluation.pre_alerts,
        due_alerts: evaluation.due_alerts,
    }))
}

async fn cache_message(
    State(state): State<ApiState>,
    Json(message): Json<CacheControlMessage>,
) -> ApiResult<Json<MessageOutcome>> {
    let outcome = state.cache.handle_message(message).await?;
    Ok(Json(outcome))
}

async fn notification_click(
    State(state): State<ApiState>,
    Json(request): Json<ClickRequest>,
) -> Json<ClickOutcome> {
    Json(resolve_click(
        request.action,
        &request.clients,
        &state.config.base_path,
    ))
}

async fn notification_push(
    State(state): State<ApiState>,
    Json(payload): Json<Value>,
) -> ApiResult<Json<Value>> {
    let notification = Notification::from_push_payload(&payload, &state.config.base_path);
    let dispatcher = state.dispatcher.clone();
    let shown_notification = notification.clone();
    let shown = tokio::task::spawn_blocking(move || dispatcher.notify(&shown_notification))
        .await
        .context("Notification task panicked")?;

    Ok(Json(json!({ "shown": shown, "notification": notification })))
}

async fn proxy(State(state): State<ApiState>, uri: Uri, headers: HeaderMap) -> ApiResult<Response> {
    let origin = url::Url::parse(&state.config.app_origin)
        .with_context(|| format!("Invalid app_origin: {}", state.config.app_origin))?;
    let target = uri
        .path_and_query()
        .map(|value| value.as_str())
        .unwrap_or("/");
    let url = origin
        .join(target)
        .with_context(|| format!("Invalid request path: {target}"))?;

    let mut request = FetchRequest::get(url);
    request.accept = headers
        .get(header::ACCEPT)
        .and_then(|value| value.to_str().ok())
        .map(ToOwned::to_owned);
    request.navigate = headers
        .get("sec-fetch-mode")
        .and_then(|value| value.to_str().ok())
        .is_some_and(|mode| mode == "navigate");

    let served = state.cache.fetch(&request).await.map_err(|error| {
        warn!(url = %request.url, error = %error, "proxied fetch failed");
        ApiError::Unavailable(error.to_string())
    })?;

    let status = StatusCode::from_u16(served.response.status).unwrap_or(StatusCode::BAD_GATEWAY);
    let mut response_headers = HeaderMap::new();
    for name in FORWARDED_HEADERS {
        if let Some(value) = served
            .response
            .headers
            .get(name.as_str())
            .and_then(|value| HeaderValue::from_str(value).ok())
        {
            response_headers.insert(name, value);
        }
    }
    if !response_headers.contains_key(header::CONTENT_TYPE) {
        response_headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_str(&guess_content_type(uri.path()))?,
        );
    }
    response_headers.insert(
        CACHE_SOURCE_HEADER,
        HeaderValue::from_static(source_label(served.source)),
    );

    Ok((status, response_headers, served.response.body).into_response())
}

fn source_label(source: ResponseSource) -> &'static str {
    match source {
        ResponseSource::Network => "network",
        ResponseSource::Cache => "cache",
        ResponseSource::OfflineShell => "offline-shell",
    }
}

fn parse_kind(raw: &str) -> ApiResult<ItemKind> {
    raw.parse::<ItemKind>().map_err(bad_request)
}

fn bad_request(error: anyhow::Error) -> ApiError {
    ApiError::BadRequest(error.to_string())
}

type ApiResult<T> = std::result::Result<T, ApiError>;

#[derive(Debug)]
enum ApiError {
    BadRequest(String),
    NotFound(String),
    Unavailable(String),
    Internal(anyhow::Error),
}

impl From<anyhow::Error> for ApiError {
    fn from(value: anyhow::Error) -> Self {
        Self::Internal(value)
    }
}

impl From<axum::http::header::InvalidHeaderValue> for ApiError {
    fn from(value: axum::http::header::InvalidHeaderValue) -> Self {
        Self::Internal(value.into())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::BadRequest(message) => {
                (StatusCode::BAD_REQUEST, Json(json!({ "error": message }))).into_response()
            }
            ApiError::NotFound(message) => {
                (StatusCode::NOT_FOUND, Json(json!({ "error": message }))).into_response()
            }
            ApiError::Unavailable(message) => {
                (StatusCode::SERVICE_UNAVAILABLE, Json(json!({ "error": message }))).into_response()
            }
            ApiError::Internal(error) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": format!("{error:#}") })),
            )
                .into_response(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{ApiState, router};
    use crate::cache::{CacheManager, FetchRequest, FetchResponse, Fetcher};
    use crate::clock::Zone;
    use crate::config::Config;
    use crate::db::Database;
    use crate::notify::{Dispatcher, NotificationPermission, RecordingNotifier};
    use crate::planner::Planner;
    use crate::store::Store;
    use crate::store::backend::MemoryBackend;
    use anyhow::{Result, bail};
    use async_trait::async_trait;
    use axum::Router;
    use axum::body::{Body, to_bytes};
    use axum::http::{Request, StatusCode};
    use serde_json::{Value, json};
    use std::collections::BTreeMap;
    use std::sync::Arc;
    use tempfile::TempDir;
    use tower::ServiceExt;

    struct OfflineFetcher;

    #[async_trait]
    impl Fetcher for OfflineFetcher {
        async fn fetch(&self, request: &FetchRequest, _bypass: bool) -> Result<FetchResponse> {
            if request.url.path().ends_with("/hello.txt") {
                return Ok(FetchResponse {
                    status: 200,
                    headers: BTreeMap::new(),
                    body: b"hi".to_vec(),
                });
            }
            bail!("offline")
        }
    }

    fn app(dir: &TempDir) -> (Router, Arc<RecordingNotifier>) {
        let config = Config {
            app_origin: "https://owl.example".to_string(),
            cache_dir: dir.path().join("cache"),
            ..Config::default()
        };
        let recorder = Arc::new(RecordingNotifier::default());
        let state = ApiState {
            cache: Arc::new(CacheManager::from_config(&config, Arc::new(OfflineFetcher)).expect("cache")),
            config: Arc::new(config),
            zone: Zone::parse("+00:00").expect("zone"),
            planner: Planner::new(
                Store::open(Box::new(MemoryBackend::default())),
                Box::new(Database::open_in_memory().expect("db")),
            )
            .shared(),
            dispatcher: Dispatcher::new(NotificationPermission { granted: true }, recorder.clone()),
        };
        (router(state), recorder)
    }

    async fn call(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let builder = Request::builder().method(method).uri(uri);
        let request = match body {
            Some(body) => builder
                .header("content-type", "application/json")
                .body(Body::from(body.to_string())),
            None => builder.body(Body::empty()),
        }
        .expect("request");

        let response = app.clone().oneshot(request).await.expect("response");
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.expect("body");
        let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, value)
    }

    #[tokio::test]
    async fn item_lifecycle_over_http() {
        let dir = TempDir::new().expect("tempdir");
        let (app, _) = app(&dir);

        let (status, created) = call(
            &app,
            "POST",
            "/api/v1/items/daily",
            Some(json!({ "name": "Tea", "time": "10:00" })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        let id = created["id"].as_str().expect("id").to_string();

        let (status, _) = call(
            &app,
            "PUT",
            &format!("/api/v1/items/daily/{id}"),
            Some(json!({ "name": "Green tea", "time": "10:30" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let (_, items) = call(&app, "GET", "/api/v1/items", None).await;
        assert_eq!(items["dailyRituals"][0]["name"], "Green tea");

        let (status, _) = call(
            &app,
            "PUT",
            "/api/v1/items/daily/missing",
            Some(json!({ "name": "x" })),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, deleted) = call(&app, "DELETE", &format!("/api/v1/items/daily/{id}"), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(deleted["deleted"], true);

        let (_, again) = call(&app, "DELETE", &format!("/api/v1/items/daily/{id}"), None).await;
        assert_eq!(again["deleted"], false);
    }

    #[tokio::test]
    async fn invalid_drafts_are_bad_requests() {
        let dir = TempDir::new().expect("tempdir");
        let (app, _) = app(&dir);

        let (status, body) = call(
            &app,
            "POST",
            "/api/v1/items/daily",
            Some(json!({ "name": "Tea", "time": "25:00" })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].is_string());

        let (status, _) = call(&app, "POST", "/api/v1/items/monthly", Some(json!({ "name": "x" }))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn reminder_check_at_fixed_time_fires_pre_alert_once() {
        let dir = TempDir::new().expect("tempdir");
        let (app, recorder) = app(&dir);
        call(
            &app,
            "POST",
            "/api/v1/items/daily",
            Some(json!({ "name": "Tea", "time": "10:00" })),
        )
        .await;

        let (status, first) = call(
            &app,
            "POST",
            "/api/v1/reminders/check",
            Some(json!({ "at": "2024-06-05T09:55" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(first["pre_alerts"].as_array().map(Vec::len), Some(1));
        assert_eq!(first["marks_written"], 1);

        let (_, second) = call(
            &app,
            "POST",
            "/api/v1/reminders/check",
            Some(json!({ "at": "2024-06-05T09:56" })),
        )
        .await;
        assert_eq!(second["pre_alerts"].as_array().map(Vec::len), Some(0));
        assert_eq!(recorder.titles(), vec!["⏰ Ritual reminder".to_string()]);
    }

    #[tokio::test]
    async fn completion_toggle_shows_in_calendar() {
        let dir = TempDir::new().expect("tempdir");
        let (app, _) = app(&dir);
        let (_, created) = call(&app, "POST", "/api/v1/items/daily", Some(json!({ "name": "Tea" }))).await;
        let id = created["id"].as_str().expect("id").to_string();

        let (_, toggled) = call(
            &app,
            "POST",
            "/api/v1/completions/toggle",
            Some(json!({ "date": "2024-06-05", "kind": "daily", "id": id })),
        )
        .await;
        assert_eq!(toggled["completed"], true);

        let (_, view) = call(&app, "GET", "/api/v1/calendar?month=2024-06", None).await;
        assert_eq!(view["title"], "June 2024");
        assert_eq!(view["days"][4]["entries"][0]["completed"], true);
        assert_eq!(view["days"][5]["entries"][0]["completed"], false);
    }

    #[tokio::test]
    async fn click_and_push_endpoints() {
        let dir = TempDir::new().expect("tempdir");
        let (app, recorder) = app(&dir);

        let (_, outcome) = call(
            &app,
            "POST",
            "/api/v1/notifications/click",
            Some(json!({ "action": "open", "clients": [] })),
        )
        .await;
        assert_eq!(outcome, json!({ "outcome": "open_window", "url": "/" }));

        let (_, pushed) = call(&app, "POST", "/api/v1/notifications/push", Some(json!({}))).await;
        assert_eq!(pushed["shown"], true);
        assert_eq!(recorder.titles(), vec!["🦉 Reminder".to_string()]);
    }

    #[tokio::test]
    async fn proxy_serves_network_then_fails_without_cache() {
        let dir = TempDir::new().expect("tempdir");
        let (app, _) = app(&dir);

        let response = app
            .clone()
            .oneshot(Request::builder().uri("/hello.txt").body(Body::empty()).expect("request"))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get("x-ritualbell-cache").and_then(|v| v.to_str().ok()),
            Some("network")
        );

        let (status, _) = call(&app, "GET", "/missing.js", None).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    }
}
