//! 路由与处理函数

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tracing::{error, info};

use crate::clients::{Generator, SearchClient};
use crate::config::Config;
use crate::error::{AppError, AppResult};
use crate::orchestrator::PipelineOrchestrator;
use crate::services::retry::{with_retry, RetryPolicy};
use crate::services::{DocumentAcquirer, InnovationCache};

/// 路由共享状态
///
/// `config` 是基础配置，每个请求在它之上派生自己的运行配置
#[derive(Clone)]
pub struct ApiState {
    pub config: Config,
    pub search: Arc<dyn SearchClient>,
    pub acquirer: Arc<dyn DocumentAcquirer>,
    pub generator: Arc<dyn Generator>,
    pub cache: InnovationCache,
}

#[derive(Debug, Deserialize)]
pub struct SearchRequest {
    #[serde(default)]
    pub query: String,
    #[serde(default, alias = "maxResults")]
    pub max_results: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub struct GenerateRequest {
    #[serde(default)]
    pub query: String,
    #[serde(default, alias = "maxPapers")]
    pub max_papers: Option<usize>,
}

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/api/health", get(health_handler))
        .route("/api/search", post(search_handler))
        .route("/api/generate", post(generate_handler))
        .with_state(state)
}

/// 在配置的地址上启动 HTTP 服务
pub async fn serve(state: ApiState) -> AppResult<()> {
    let addr = format!("{}:{}", state.config.web_host, state.config.web_port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| AppError::Http(format!("无法监听 {}: {}", addr, e)))?;
    info!("🌐 HTTP 服务已启动: http://{}", addr);
    axum::serve(listener, router(state))
        .await
        .map_err(|e| AppError::Http(e.to_string()))
}

fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(json!({ "error": message.into() }))).into_response()
}

async fn health_handler() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}

async fn search_handler(
    State(state): State<ApiState>,
    Json(request): Json<SearchRequest>,
) -> Response {
    let query = request.query.trim().to_string();
    if query.is_empty() {
        return error_response(StatusCode::BAD_REQUEST, "query 不能为空");
    }
    let max_results = request.max_results.unwrap_or(state.config.max_results).max(1);
    let retry = RetryPolicy::from_config(&state.config);

    match with_retry(&retry, "[检索接口]", || {
        state.search.search(&query, max_results)
    })
    .await
    {
        Ok(mut papers) => {
            papers.truncate(max_results);
            info!("[检索接口] ✓ {} -> {} 篇论文", query, papers.len());
            Json(json!({ "papers": papers })).into_response()
        }
        Err(e) => {
            error!("[检索接口] ❌ {}: {}", query, e);
            error_response(StatusCode::BAD_GATEWAY, e.to_string())
        }
    }
}

async fn generate_handler(
    State(state): State<ApiState>,
    Json(request): Json<GenerateRequest>,
) -> Response {
    let topic = request.query.trim().to_string();
    if topic.is_empty() {
        return error_response(StatusCode::BAD_REQUEST, "query 不能为空");
    }

    let config = match request.max_papers {
        Some(n) => state.config.with_max_results(n.max(1)),
        None => state.config.clone(),
    };
    let orchestrator = PipelineOrchestrator::new(
        config,
        state.search.clone(),
        state.acquirer.clone(),
        state.generator.clone(),
        state.cache.clone(),
    );

    match orchestrator.run(&topic).await {
        Ok(run) => Json(run.report()).into_response(),
        Err(e) => {
            error!("[生成接口] ❌ {}: {}", topic, e);
            error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        }
    }
}
