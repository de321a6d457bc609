use std::sync::Arc;

use anyhow::Result;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{delete, get, post},
    Json,
};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tower_http::cors::CorsLayer;

use crate::credentials::CredentialStore;
use crate::error::{ErrorKind, GenerationError};
use crate::models::{
    CaptionRequest, CredentialKind, GenerationRequest, Operation, PromptBatch, ProviderId,
    ProviderSetting, StructuredPromptDecomposition,
};
use crate::router::Router;
use crate::telemetry;

type ApiError = (StatusCode, String);

/**
 * \brief HTTP 处理函数共享的状态。
 */
#[derive(Clone)]
pub struct AppState {
    pub router: Arc<Router>,
    pub store: Arc<CredentialStore>,
}

impl AppState {
    /** \brief 以内置适配器装配路由器。 */
    pub fn new(store: Arc<CredentialStore>) -> Self {
        Self {
            router: Arc::new(Router::with_default_adapters(store.clone())),
            store,
        }
    }
}

/**
 * \brief 构建 API 路由（含宽松 CORS，便于其他源的前端调用）。
 */
pub fn app(state: AppState) -> axum::Router {
    axum::Router::new()
        .route("/api/config", get(get_config).post(set_config))
        .route("/api/providers/{id}/select", post(select_provider))
        .route("/api/providers/{id}/credential", delete(clear_credential))
        .route("/api/prompts", post(generate_prompts))
        .route("/api/prompts/decompose", post(decompose_prompt))
        .route("/api/captions", post(caption_image))
        .route("/api/health", get(health_check))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/**
 * \brief 启动本地 HTTP 服务。
 * \param addr 监听地址，如 "127.0.0.1:5173"
 */
pub async fn run(addr: &str, state: AppState) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    println!("Server listening on http://{}", addr);
    telemetry::log_event("server", &format!("listening on {}", addr));
    axum::serve(listener, app(state)).await?;
    Ok(())
}

#[derive(Serialize, Debug)]
struct ProviderItem {
    id: ProviderId,
    label: &'static str,
    /** \brief 凭据语义：api_key 或 base_url */
    credential: &'static str,
    configured: bool,
    model: Option<String>,
    operations: Vec<&'static str>,
}

#[derive(Serialize, Debug)]
struct ConfigState {
    active_provider: ProviderId,
    providers: Vec<ProviderItem>,
    telemetry_enabled: bool,
}

#[derive(Deserialize, Debug)]
struct ConfigInput {
    provider: String,
    /** \brief API 密钥或本地服务地址；空字符串表示清除 */
    #[serde(default)]
    credential: Option<String>,
    #[serde(default)]
    base_url: Option<String>,
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    activate: bool,
    #[serde(default)]
    telemetry_enabled: Option<bool>,
}

#[derive(Deserialize, Debug)]
struct PromptQuery {
    #[serde(default)]
    staged: bool,
}

#[derive(Deserialize, Debug)]
struct DecomposeInput {
    prompt: String,
}

#[derive(Serialize, Debug)]
struct CaptionsResponse {
    captions: Vec<String>,
}

fn build_config_state(state: &AppState) -> ConfigState {
    let providers = ProviderId::ALL
        .into_iter()
        .map(|id| ProviderItem {
            id,
            label: id.label(),
            credential: match id.credential_kind() {
                CredentialKind::ApiKey => "api_key",
                CredentialKind::BaseUrl => "base_url",
            },
            configured: state.store.is_configured(id),
            model: state.store.get_setting(id, ProviderSetting::Model),
            operations: Operation::CORE
                .into_iter()
                .chain(Operation::STAGED)
                .filter(|op| state.router.supports(id, *op))
                .map(|op| op.as_str())
                .collect(),
        })
        .collect();
    ConfigState {
        active_provider: state.store.get_active(),
        providers,
        telemetry_enabled: state.store.telemetry_enabled(),
    }
}

fn parse_provider(id: &str) -> Result<ProviderId, ApiError> {
    id.parse::<ProviderId>()
        .map_err(|e| (StatusCode::BAD_REQUEST, e.to_string()))
}

/**
 * \brief 获取当前激活 Provider 与各 Provider 的配置状态（不回传密钥）。
 */
async fn get_config(State(state): State<AppState>) -> Json<ConfigState> {
    Json(build_config_state(&state))
}

/**
 * \brief 保存某个 Provider 的凭据/附加配置，可选同时激活。
 */
async fn set_config(
    State(state): State<AppState>,
    Json(input): Json<ConfigInput>,
) -> Result<Json<ConfigState>, ApiError> {
    let id = parse_provider(&input.provider)?;
    if let Some(credential) = input.credential.as_deref() {
        if credential.trim().is_empty() {
            state.store.clear(id);
        } else {
            state.store.set(credential, id);
        }
    }
    if let Some(base_url) = input.base_url.as_deref() {
        state.store.set_setting(id, ProviderSetting::BaseUrl, base_url);
    }
    if let Some(model) = input.model.as_deref() {
        state.store.set_setting(id, ProviderSetting::Model, model);
    }
    if input.activate {
        state.store.set_active(id);
    }
    if let Some(enabled) = input.telemetry_enabled {
        state.store.set_telemetry_enabled(enabled);
        telemetry::set_enabled(enabled);
    }
    telemetry::log_event(
        "server.config",
        &format!("update provider={} activate={}", id, input.activate),
    );
    Ok(Json(build_config_state(&state)))
}

async fn select_provider(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ConfigState>, ApiError> {
    let id = parse_provider(&id)?;
    state.store.set_active(id);
    telemetry::log_event("server.config", &format!("select provider={}", id));
    Ok(Json(build_config_state(&state)))
}

async fn clear_credential(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ConfigState>, ApiError> {
    let id = parse_provider(&id)?;
    state.store.clear(id);
    telemetry::log_event("server.config", &format!("clear credential provider={}", id));
    Ok(Json(build_config_state(&state)))
}

/**
 * \brief 生成一批提示词变体；`?staged=true` 时走三段式流程。
 */
async fn generate_prompts(
    State(state): State<AppState>,
    Query(q): Query<PromptQuery>,
    Json(req): Json<GenerationRequest>,
) -> Result<Json<PromptBatch>, ApiError> {
    let provider = state.store.get_active();
    let prompts = if q.staged {
        state.router.generate_staged(provider, &req).await
    } else {
        state.router.generate_variations(provider, &req).await
    }
    .map_err(generation_err)?;
    Ok(Json(PromptBatch {
        id: batch_id(),
        prompts,
    }))
}

async fn caption_image(
    State(state): State<AppState>,
    Json(req): Json<CaptionRequest>,
) -> Result<Json<CaptionsResponse>, ApiError> {
    let provider = state.store.get_active();
    let captions = state
        .router
        .caption_image(provider, &req)
        .await
        .map_err(generation_err)?;
    Ok(Json(CaptionsResponse { captions }))
}

async fn decompose_prompt(
    State(state): State<AppState>,
    Json(input): Json<DecomposeInput>,
) -> Result<Json<StructuredPromptDecomposition>, ApiError> {
    let provider = state.store.get_active();
    let decomposition = state
        .router
        .decompose_prompt(provider, &input.prompt)
        .await
        .map_err(generation_err)?;
    Ok(Json(decomposition))
}

async fn health_check(State(state): State<AppState>) -> Json<serde_json::Value> {
    let active = state.store.get_active();
    Json(serde_json::json!({
        "status": "ok",
        "active_provider": active,
        "configured": state.router.is_configured(active),
    }))
}

/** \brief 批次 ID：毫秒级 Unix 时间戳。 */
fn batch_id() -> String {
    (OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000).to_string()
}

fn generation_err(e: GenerationError) -> ApiError {
    let status = match e.kind {
        ErrorKind::Configuration { .. } | ErrorKind::InvalidRequest(_) => StatusCode::BAD_REQUEST,
        ErrorKind::Transport { .. }
        | ErrorKind::EmptyResponse
        | ErrorKind::Parse(_)
        | ErrorKind::Shape(_) => StatusCode::BAD_GATEWAY,
        ErrorKind::Unsupported => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn spawn(state: AppState) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app(state)).await.unwrap();
        });
        format!("http://{}", addr)
    }

    #[tokio::test]
    async fn config_round_trip_never_echoes_secrets() {
        let state = AppState::new(Arc::new(CredentialStore::in_memory()));
        let base = spawn(state.clone()).await;
        let client = reqwest::Client::new();

        let resp = client
            .post(format!("{}/api/config", base))
            .json(&json!({"provider": "qwen", "credential": " sk-qwen ", "activate": true}))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 200);
        let body: Value = resp.json().await.unwrap();
        assert_eq!(body["active_provider"], "qwen");
        assert!(!body.to_string().contains("sk-qwen"));

        let qwen = body["providers"]
            .as_array()
            .unwrap()
            .iter()
            .find(|p| p["id"] == "qwen")
            .unwrap()
            .clone();
        assert_eq!(qwen["configured"], true);
        assert_eq!(
            qwen["operations"],
            json!(["generate_variations", "caption_image", "decompose_prompt"])
        );
        assert_eq!(state.store.get(ProviderId::Qwen).as_deref(), Some("sk-qwen"));

        let resp = client
            .delete(format!("{}/api/providers/qwen/credential", base))
            .send()
            .await
            .unwrap();
        let body: Value = resp.json().await.unwrap();
        assert_eq!(body["providers"][5]["configured"], false);
    }

    #[tokio::test]
    async fn telemetry_flag_is_saved_in_the_state_store() {
        let dir = tempfile::tempdir().unwrap();
        telemetry::set_log_dir(dir.path());
        let state = AppState::new(Arc::new(CredentialStore::in_memory()));
        let base = spawn(state.clone()).await;
        let client = reqwest::Client::new();

        let body: Value = client
            .post(format!("{}/api/config", base))
            .json(&json!({"provider": "gemini", "telemetry_enabled": true}))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(body["telemetry_enabled"], true);
        assert!(state.store.telemetry_enabled());
        let log = std::fs::read_to_string(telemetry::log_file()).unwrap();
        assert!(log.contains("[INFO] server.config - update provider=gemini"));

        client
            .post(format!("{}/api/config", base))
            .json(&json!({"provider": "gemini", "telemetry_enabled": false}))
            .send()
            .await
            .unwrap();
        assert!(!state.store.telemetry_enabled());
    }

    #[tokio::test]
    async fn unknown_provider_is_bad_request() {
        let base = spawn(AppState::new(Arc::new(CredentialStore::in_memory()))).await;
        let resp = reqwest::Client::new()
            .post(format!("{}/api/providers/mistral/select", base))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 400);
    }

    #[tokio::test]
    async fn missing_credential_maps_to_bad_request() {
        let base = spawn(AppState::new(Arc::new(CredentialStore::in_memory()))).await;
        let resp = reqwest::Client::new()
            .post(format!("{}/api/prompts/decompose", base))
            .json(&json!({"prompt": "A robot walks through rain"}))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 400);
        let text = resp.text().await.unwrap();
        assert!(text.contains("GEMINI_API_KEY"));
    }

    #[tokio::test]
    async fn prompts_come_back_as_a_batch() {
        let upstream = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/generate"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "response": "[{\"title\":\"A\",\"prompt\":\"a\"},{\"title\":\"B\",\"prompt\":\"b\"},{\"title\":\"C\",\"prompt\":\"c\"}]"
            })))
            .mount(&upstream)
            .await;

        let store = Arc::new(CredentialStore::in_memory());
        store.set(&upstream.uri(), ProviderId::Ollama);
        store.set_active(ProviderId::Ollama);
        let base = spawn(AppState::new(store)).await;

        let resp = reqwest::Client::new()
            .post(format!("{}/api/prompts", base))
            .json(&json!({"scene": "A robot walks through rain", "style": "Cyberpunk"}))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 200);
        let batch: PromptBatch = resp.json().await.unwrap();
        assert_eq!(batch.prompts.len(), 3);
        assert!(batch.id.parse::<i128>().unwrap() > 0);
    }

    #[tokio::test]
    async fn upstream_failure_maps_to_bad_gateway() {
        let upstream = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .mount(&upstream)
            .await;

        let store = Arc::new(CredentialStore::in_memory());
        store.set(&upstream.uri(), ProviderId::LmStudio);
        store.set_active(ProviderId::LmStudio);
        let base = spawn(AppState::new(store)).await;

        let resp = reqwest::Client::new()
            .post(format!("{}/api/captions", base))
            .json(&json!({"image_data": "AAAA", "mime_type": "image/png"}))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 502);
        assert!(resp.text().await.unwrap().contains("caption_image failed on lmstudio"));
    }

    #[tokio::test]
    async fn health_reports_active_provider() {
        let store = Arc::new(CredentialStore::in_memory());
        store.set_active(ProviderId::OpenAi);
        let base = spawn(AppState::new(store)).await;
        let body: Value = reqwest::get(format!("{}/api/health", base))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(body["status"], "ok");
        assert_eq!(body["active_provider"], "openai");
        assert_eq!(body["configured"], false);
    }
}
