use super::AppState;
use crate::error::{ApiError, RunError};
use crate::package_manager::{stream_install, OpenOutcome, Verdict, VersionInfo};
use crate::store::{AppEntry, AppPatch, NewApp};
use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::Json;
use futures_util::stream::Stream;
use futures_util::StreamExt;
use serde::Serialize;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

#[derive(Debug, Serialize)]
pub struct InstallResponse {
    pub status: Verdict,
    pub exit_code: i32,
    pub output: String,
    pub app: Option<AppEntry>,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct InstallCheck {
    pub id: u64,
    pub name: String,
    pub installed: bool,
}

async fn find_app(state: &AppState, id: u64) -> Result<AppEntry, ApiError> {
    state
        .store
        .blocking(move |s| s.get_app(id))
        .await?
        .ok_or(ApiError::NotFound)
}

pub async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

pub async fn list_apps(State(state): State<AppState>) -> Result<Json<Vec<AppEntry>>, ApiError> {
    Ok(Json(state.store.blocking(|s| s.list_apps()).await?))
}

/// 请求体不是合法 JSON 时按空对象处理，再由必填字段校验给出 400
pub async fn add_app(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<(StatusCode, Json<AppEntry>), ApiError> {
    let payload: NewApp = serde_json::from_slice(&body).unwrap_or_default();
    let new_app = payload.normalized().map_err(ApiError::Validation)?;
    let entry = state.store.blocking(move |s| s.add_app(new_app)).await?;
    Ok((StatusCode::CREATED, Json(entry)))
}

pub async fn update_app(
    State(state): State<AppState>,
    Path(id): Path<u64>,
    Json(patch): Json<AppPatch>,
) -> Result<Json<AppEntry>, ApiError> {
    patch.validate().map_err(ApiError::Validation)?;
    state
        .store
        .blocking(move |s| s.update_app(id, patch))
        .await?
        .map(Json)
        .ok_or(ApiError::NotFound)
}

/// 同步安装：执行到结束再返回
///
/// 非零退出码属于业务失败，照常返回 200；超时同样记为 `error`。
pub async fn install_app(
    State(state): State<AppState>,
    Path(id): Path<u64>,
) -> Result<Json<InstallResponse>, ApiError> {
    let app = find_app(&state, id).await?;

    let (status, exit_code, output) = match state.manager.install(&app).await {
        Ok((verdict, out)) => (verdict, out.exit_code, out.output),
        Err(e @ RunError::Timeout(_)) => {
            log::warn!("安装 #{} 超时", id);
            (Verdict::Error, -1, e.to_string())
        }
        Err(e) => return Err(e.into()),
    };

    let installed = status.is_ok();
    let app = state
        .store
        .blocking(move |s| s.mark_installed(id, installed))
        .await?;
    Ok(Json(InstallResponse {
        status,
        exit_code,
        output,
        app,
    }))
}

/// 流式安装：SSE 推送 start / progress / log / truncate / done
///
/// 响应体被丢弃（客户端断开）时接收端关闭，安装任务随之终止子进程。
pub async fn install_stream(
    State(state): State<AppState>,
    Path(id): Path<u64>,
) -> Result<Sse<impl Stream<Item = Result<Event, axum::Error>>>, ApiError> {
    let app = find_app(&state, id).await?;

    let (tx, rx) = mpsc::channel(64);
    tokio::spawn(stream_install(
        state.manager.runner(),
        state.store.clone(),
        app,
        state.stream,
        tx,
    ));

    let stream = ReceiverStream::new(rx)
        .map(|event| Event::default().event(event.name()).json_data(&event));

    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

pub async fn open_app(
    State(state): State<AppState>,
    Path(id): Path<u64>,
) -> Result<Json<OpenOutcome>, ApiError> {
    let app = find_app(&state, id).await?;
    state
        .manager
        .open(&app)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::Validation("没有可用的启动命令".to_string()))
}

pub async fn check_installations(
    State(state): State<AppState>,
) -> Result<Json<Vec<InstallCheck>>, ApiError> {
    let apps = state.store.blocking(|s| s.list_apps()).await?;
    let mut results = Vec::with_capacity(apps.len());

    for app in apps {
        let installed = state.manager.check_installed(&app).await;
        let id = app.id;
        state
            .store
            .blocking(move |s| s.mark_installed(id, installed))
            .await?;
        results.push(InstallCheck {
            id: app.id,
            name: app.name,
            installed,
        });
    }

    Ok(Json(results))
}

pub async fn version_info(
    State(state): State<AppState>,
    Path(id): Path<u64>,
) -> Result<Json<VersionInfo>, ApiError> {
    let app = find_app(&state, id).await?;
    Ok(Json(state.manager.versions(&app).await?))
}
