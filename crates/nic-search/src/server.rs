/// HTTP surface of the NIC search service.
///
/// Logical failures are reported in the JSON body (`error` for `/search`,
/// `status: "error"` elsewhere) with a 200 status; malformed request bodies get a 400 and
/// server-side failures a 500.
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use axum::body::Bytes;
use axum::extract::{Query, Request, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::json;
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::{error, warn};

use crate::api::{
    read_search_params, IndexStatsQuery, LanguageRequest, SearchResponse, StatusResponse,
};
use crate::error::AppError;
use crate::language::{Language, LanguageSelector};
use crate::recording::{list_capture_devices, RecordingService};
use crate::search::{SearchEngine, SearchQuery};
use crate::system_info;
use crate::update::IndexService;

pub struct AppState {
    pub engine: Arc<SearchEngine>,
    pub indexer: Arc<IndexService>,
    pub languages: Arc<LanguageSelector>,
    pub recording: Arc<RecordingService>,
    pub server_env: String,
}

pub fn router(state: Arc<AppState>, static_dir: Option<PathBuf>) -> Router {
    let mut app = Router::new()
        .route("/health", get(health))
        .route("/search", post(search))
        .route("/api/start_recording", post(start_recording))
        .route("/api/stop_recording", post(stop_recording))
        .route("/api/system_info", get(system_info))
        .route("/api/audio_devices", get(audio_devices))
        .route("/api/languages", get(languages))
        .route("/api/set-language", post(set_language))
        .route("/rebuild-index", post(rebuild_index))
        .route("/get-index-stats", get(index_stats))
        .route("/clear-embedding-cache", post(clear_embedding_cache));

    if let Some(dir) = static_dir {
        app = app.fallback_service(ServeDir::new(dir));
    }

    app.layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok", "message": "API is running" }))
}

/// POST /search - multipart, URL-encoded or JSON body
async fn search(State(state): State<Arc<AppState>>, request: Request) -> Response {
    let started = Instant::now();

    let raw = match read_search_params(request).await {
        Ok(raw) => raw,
        Err(message) => {
            warn!(error = %message, "unreadable search request");
            let body = SearchResponse::error(message, elapsed_secs(started));
            return (StatusCode::BAD_REQUEST, Json(body)).into_response();
        }
    };
    let params = match raw.validate() {
        Ok(params) => params,
        Err(message) => {
            return Json(SearchResponse::error(message, elapsed_secs(started))).into_response()
        }
    };

    let language = state.languages.resolve(params.language.as_deref()).await;
    let request = SearchQuery {
        query: params.query,
        language,
        mode: params.mode,
        count: params.count,
    };

    match state.engine.search(&request).await {
        Ok(outcome) => {
            let response = SearchResponse {
                count: outcome.results.len(),
                results: outcome.results,
                elapsed: elapsed_secs(started),
                query: Some(request.query),
                language: Some(language.to_string()),
                metrics: params.metrics.then_some(outcome.metrics),
                error: None,
            };
            Json(response).into_response()
        }
        Err(e) => {
            let message = if matches!(e, AppError::IndexNotReady) {
                e.to_string()
            } else {
                error!(error = %e, query = %request.query, language = %language, "search failed");
                format!("Search failed: {e}")
            };
            let mut body = SearchResponse::error(message, elapsed_secs(started));
            body.query = Some(request.query);
            body.language = Some(language.to_string());
            Json(body).into_response()
        }
    }
}

fn elapsed_secs(started: Instant) -> f64 {
    (started.elapsed().as_secs_f64() * 1000.0).round() / 1000.0
}

async fn start_recording(State(state): State<Arc<AppState>>) -> Response {
    let language = state.languages.current().await;
    match state.recording.start(language).await {
        Ok(message) => Json(StatusResponse::success(message)).into_response(),
        Err(e) => {
            error!(error = %e, "failed to start recording");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(StatusResponse::error(e.to_string())),
            )
                .into_response()
        }
    }
}

async fn stop_recording(State(state): State<Arc<AppState>>) -> Response {
    Json(state.recording.stop().await).into_response()
}

async fn system_info(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    let info = system_info::collect(&state.recording, &state.server_env).await;
    Json(json!({ "status": "success", "system_info": info }))
}

async fn audio_devices(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    let devices = list_capture_devices(state.recording.recorder_command()).await;
    Json(json!({ "status": "success", "devices": devices }))
}

async fn languages(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    let current = state.languages.current().await;
    Json(json!({ "languages": Language::ALL, "current": current }))
}

/// POST /api/set-language - `{ "language": "hindi" }`
async fn set_language(State(state): State<Arc<AppState>>, body: Bytes) -> Response {
    let requested = match parse_optional_body::<LanguageRequest>(&body) {
        Ok(req) => req.language.unwrap_or_default(),
        Err(message) => {
            return (StatusCode::BAD_REQUEST, Json(StatusResponse::error(message))).into_response()
        }
    };
    match state.languages.set(&requested).await {
        Some(language) => {
            Json(json!({ "status": "success", "language": language })).into_response()
        }
        None => (
            StatusCode::BAD_REQUEST,
            Json(StatusResponse::error(format!(
                "Unsupported language: {}",
                requested.trim().to_lowercase()
            ))),
        )
            .into_response(),
    }
}

/// POST /rebuild-index - optional `{ "language": "..." }`, all languages when absent
async fn rebuild_index(State(state): State<Arc<AppState>>, body: Bytes) -> Response {
    let target = match parse_optional_body::<LanguageRequest>(&body) {
        Ok(LanguageRequest { language: Some(name) }) => match Language::parse(&name) {
            Some(language) if state.indexer.languages().contains(&language) => Some(language),
            Some(language) => {
                return Json(StatusResponse::error(format!(
                    "No catalog configured for {language}"
                )))
                .into_response()
            }
            None => {
                return Json(StatusResponse::error(format!("Unsupported language: {name}")))
                    .into_response()
            }
        },
        Ok(LanguageRequest { language: None }) => None,
        Err(message) => {
            return (StatusCode::BAD_REQUEST, Json(StatusResponse::error(message))).into_response()
        }
    };

    match state.indexer.rebuild(target).await {
        Ok(report) => {
            let summary = report
                .languages
                .iter()
                .map(|(language, vectors)| format!("{language} ({vectors} vectors)"))
                .collect::<Vec<_>>()
                .join(", ");
            Json(json!({
                "status": "success",
                "message": format!("Index rebuilt successfully: {summary}"),
                "time_taken": (report.elapsed_secs * 100.0).round() / 100.0,
            }))
            .into_response()
        }
        Err(AppError::RebuildInProgress) => {
            Json(StatusResponse::error(AppError::RebuildInProgress.to_string())).into_response()
        }
        Err(e) => {
            error!(error = %e, "index rebuild failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(StatusResponse::error(format!("Index rebuild failed: {e}"))),
            )
                .into_response()
        }
    }
}

/// GET /get-index-stats?language=hindi
async fn index_stats(
    State(state): State<Arc<AppState>>,
    Query(query): Query<IndexStatsQuery>,
) -> Json<serde_json::Value> {
    let language = state.languages.resolve(query.language.as_deref()).await;
    match state.engine.index_stats(language).await {
        Ok(stats) => Json(json!({ "status": "success", "stats": stats })),
        Err(e) => {
            if !matches!(e, AppError::IndexNotReady) {
                error!(error = %e, language = %language, "reading index stats failed");
            }
            Json(json!({ "status": "error", "message": e.to_string() }))
        }
    }
}

async fn clear_embedding_cache(State(state): State<Arc<AppState>>) -> Json<StatusResponse> {
    state.engine.embedding_cache().clear().await;
    Json(StatusResponse::success("Embedding cache cleared"))
}

/// Parse a JSON body that may be empty.
fn parse_optional_body<T>(body: &[u8]) -> Result<T, String>
where
    T: serde::de::DeserializeOwned + Default,
{
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(T::default());
    }
    serde_json::from_slice(body).map_err(|e| format!("Invalid JSON body: {e}"))
}

#[cfg(test)]
mod tests {
    use axum::body::Body;
    use axum::http::{header, Request as HttpRequest};
    use http_body_util::BodyExt;
    use nic_common::redis::RedisCache;
    use serde_json::Value;
    use tower::ServiceExt;

    use super::*;
    use crate::testing::indexed_engine;

    async fn app(dir: &std::path::Path) -> Router {
        let (engine, indexer) = indexed_engine(dir).await;
        let state = Arc::new(AppState {
            engine,
            indexer,
            languages: Arc::new(LanguageSelector::new(RedisCache::disabled())),
            recording: Arc::new(RecordingService::new(
                "/nonexistent/recorder-binary".into(),
                dir.join("recording.wav"),
                true,
                None,
            )),
            server_env: "docker".to_string(),
        });
        router(state, None)
    }

    async fn send(app: &Router, request: HttpRequest<Body>) -> (StatusCode, Value) {
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    fn post_json(uri: &str, body: Value) -> HttpRequest<Body> {
        HttpRequest::post(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn get(uri: &str) -> HttpRequest<Body> {
        HttpRequest::get(uri).body(Body::empty()).unwrap()
    }

    fn ids(body: &Value) -> Vec<&str> {
        body["results"]
            .as_array()
            .unwrap()
            .iter()
            .map(|r| r["id"].as_str().unwrap())
            .collect()
    }

    #[tokio::test]
    async fn health_reports_ok() {
        let dir = tempfile::tempdir().unwrap();
        let app = app(dir.path()).await;
        let (status, body) = send(&app, get("/health")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({ "status": "ok", "message": "API is running" }));
    }

    #[tokio::test]
    async fn json_search_returns_ranked_results_with_metrics() {
        let dir = tempfile::tempdir().unwrap();
        let app = app(dir.path()).await;

        let (status, body) = send(
            &app,
            post_json("/search", json!({ "query": "growing of wheat", "metrics": true })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.get("error").is_none());
        assert_eq!(ids(&body), vec!["wheat", "rice"]);
        assert_eq!(body["count"], 2);
        assert_eq!(body["language"], "english");

        let first = &body["results"][0];
        assert_eq!(first["rank"], 1);
        assert_eq!(first["tier"], "valid");
        assert_eq!(first["title"], "Growing of wheat");
        assert_eq!(first["subclass"], "01111");
        assert!(first["similarity"].as_f64().unwrap() > 0.99);
        assert_eq!(body["results"][1]["division"], "1");

        assert_eq!(body["metrics"]["results_count"], 4);
        assert!(body["metrics"]["total_time_ms"].as_f64().unwrap() >= 0.0);
    }

    #[tokio::test]
    async fn form_search_in_standard_mode_has_bounded_similarity() {
        let dir = tempfile::tempdir().unwrap();
        let app = app(dir.path()).await;

        let request = HttpRequest::post("/search")
            .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(Body::from("query=bakery+products&search_mode=standard&result_count=5"))
            .unwrap();
        let (status, body) = send(&app, request).await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.get("metrics").is_none());

        let results = body["results"].as_array().unwrap();
        assert!(!results.is_empty());
        for result in results {
            let similarity = result["similarity"].as_f64().unwrap();
            assert!((0.0..=1.0).contains(&similarity));
        }
        assert_eq!(results[0]["id"], "bakery");
        assert_eq!(results[0]["tier"], "other");
        assert_eq!(results[0]["title"], "Manufacture of bakery products");
    }

    #[tokio::test]
    async fn multipart_search_honours_mode() {
        let dir = tempfile::tempdir().unwrap();
        let app = app(dir.path()).await;

        let boundary = "nicboundary";
        let mut body = String::new();
        for (name, value) in [
            ("query", "growing of wheat"),
            ("search_mode", "strict"),
            ("show_metrics", "on"),
        ] {
            body.push_str(&format!(
                "--{boundary}\r\nContent-Disposition: form-data; name=\"{name}\"\r\n\r\n{value}\r\n"
            ));
        }
        body.push_str(&format!("--{boundary}--\r\n"));

        let request = HttpRequest::post("/search")
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={boundary}"),
            )
            .body(Body::from(body))
            .unwrap();
        let (status, body) = send(&app, request).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(ids(&body), vec!["wheat"]);
        assert!(body["metrics"].is_object());
    }

    #[tokio::test]
    async fn search_errors_are_reported_in_body() {
        let dir = tempfile::tempdir().unwrap();
        let app = app(dir.path()).await;

        let (status, body) = send(&app, post_json("/search", json!({ "query": "   " }))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["error"], "Empty query");
        assert_eq!(body["results"], json!([]));
        assert_eq!(body["count"], 0);

        let (_, body) = send(
            &app,
            post_json("/search", json!({ "query": "tea", "count": 500 })),
        )
        .await;
        assert!(body["error"].as_str().unwrap().starts_with("Invalid result_count"));

        let (_, body) = send(
            &app,
            post_json("/search", json!({ "query": "tea", "language": "hindi" })),
        )
        .await;
        assert_eq!(body["error"], "Language not properly initialized");

        let request = HttpRequest::post("/search")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from("{not json"))
            .unwrap();
        let (status, body) = send(&app, request).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().starts_with("Invalid JSON body"));
        assert_eq!(body["results"], json!([]));
    }

    #[tokio::test]
    async fn language_selection() {
        let dir = tempfile::tempdir().unwrap();
        let app = app(dir.path()).await;

        let (_, body) = send(&app, get("/api/languages")).await;
        assert_eq!(body, json!({ "languages": ["english", "hindi"], "current": "english" }));

        let (status, body) =
            send(&app, post_json("/api/set-language", json!({ "language": "Hindi" }))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({ "status": "success", "language": "hindi" }));

        let (_, body) = send(&app, get("/api/languages")).await;
        assert_eq!(body["current"], "hindi");

        // Searches without an explicit language follow the selection.
        let (_, body) = send(&app, post_json("/search", json!({ "query": "tea" }))).await;
        assert_eq!(body["error"], "Language not properly initialized");

        let (status, body) =
            send(&app, post_json("/api/set-language", json!({ "language": "tamil" }))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["status"], "error");
        assert_eq!(body["message"], "Unsupported language: tamil");
    }

    #[tokio::test]
    async fn index_administration() {
        let dir = tempfile::tempdir().unwrap();
        let app = app(dir.path()).await;

        send(&app, post_json("/search", json!({ "query": "growing of rice" }))).await;

        let (_, body) = send(&app, get("/get-index-stats")).await;
        assert_eq!(body["status"], "success");
        let stats = &body["stats"];
        assert_eq!(stats["language"], "english");
        assert_eq!(stats["vector_count"], 4);
        assert_eq!(stats["id_map_size"], 4);
        assert_eq!(stats["dimension"], 12);
        assert_eq!(stats["index_file_exists"], true);
        assert_eq!(stats["index_type"], "lancedb-flat-cosine");
        assert_eq!(stats["embedding_requests"], 1);
        assert_eq!(stats["embedding_cache_hit_rate"], "0.00%");

        let (_, body) = send(&app, get("/get-index-stats?language=hindi")).await;
        assert_eq!(body["status"], "error");
        assert_eq!(body["message"], "Language not properly initialized");

        let (_, body) = send(&app, post_json("/clear-embedding-cache", json!({}))).await;
        assert_eq!(body["status"], "success");
        let (_, body) = send(&app, get("/get-index-stats")).await;
        assert_eq!(body["stats"]["embedding_requests"], 0);
        assert_eq!(body["stats"]["embedding_cache_size"], 0);

        let request = HttpRequest::post("/rebuild-index").body(Body::empty()).unwrap();
        let (status, body) = send(&app, request).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "success");
        assert!(body["message"].as_str().unwrap().contains("english (4 vectors)"));
        assert!(body["time_taken"].is_number());

        let (_, body) =
            send(&app, post_json("/rebuild-index", json!({ "language": "hindi" }))).await;
        assert_eq!(body["status"], "error");
        assert_eq!(body["message"], "No catalog configured for hindi");
    }

    #[tokio::test]
    async fn recording_round_trip_in_simulation() {
        let dir = tempfile::tempdir().unwrap();
        let app = app(dir.path()).await;

        let (_, body) = send(&app, post_json("/api/stop_recording", json!({}))).await;
        assert_eq!(body["status"], "error");
        assert_eq!(body["transcript"], "No active recording session");

        let (status, body) = send(&app, post_json("/api/start_recording", json!({}))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "success");

        let (_, body) = send(&app, post_json("/api/stop_recording", json!({}))).await;
        assert_eq!(body["status"], "success");
        assert_eq!(body["transcript"], "this is a test text");
    }

    #[tokio::test]
    async fn system_info_shape() {
        let dir = tempfile::tempdir().unwrap();
        let app = app(dir.path()).await;

        let (_, body) = send(&app, get("/api/system_info")).await;
        assert_eq!(body["status"], "success");
        let info = &body["system_info"];
        assert_eq!(info["server_env"], "docker");
        assert_eq!(info["simulation_mode"], true);
        assert_eq!(info["can_record"], false);
        assert!(info["devices"].is_array());
        assert!(info["os"].is_string());

        let (_, body) = send(&app, get("/api/audio_devices")).await;
        assert_eq!(body, json!({ "status": "success", "devices": [] }));
    }
}
