//! HTTP 接口：REST + SSE 安装日志流

mod handlers;

pub use handlers::InstallCheck;

use crate::config::Config;
use crate::package_manager::{PackageManager, ProcessRunner, ShellRunner, StreamSettings};
use crate::store::AppsStore;
use anyhow::{Context, Result};
use axum::routing::{get, post};
use axum::Router;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;

/// 请求处理共享的状态，进程启动时构造一次
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<AppsStore>,
    pub manager: PackageManager,
    pub stream: StreamSettings,
}

impl AppState {
    pub fn new(store: Arc<AppsStore>, runner: Arc<dyn ProcessRunner>, config: &Config) -> Self {
        let timeouts = config.timeouts();
        Self {
            store,
            manager: PackageManager::new(runner, timeouts),
            stream: StreamSettings {
                char_limit: config.log_char_limit,
                timeout: timeouts.install,
            },
        }
    }

    /// 生产环境：PowerShell 执行器 + 配置中的目录文件
    pub fn from_config(config: &Config) -> Result<Self> {
        let store = AppsStore::open(&config.data_path)
            .with_context(|| format!("打开应用目录失败: {}", config.data_path.display()))?;
        let runner = Arc::new(ShellRunner::new(&config.shell, config.log_char_limit));
        Ok(Self::new(Arc::new(store), runner, config))
    }
}

pub fn build_router(state: AppState, config: &Config) -> Router {
    Router::new()
        .route("/api/health", get(handlers::health))
        .route("/api/apps", get(handlers::list_apps).post(handlers::add_app))
        .route("/api/apps/{id}", axum::routing::put(handlers::update_app))
        .route("/api/install/{id}", post(handlers::install_app))
        .route("/api/install/{id}/stream", get(handlers::install_stream))
        .route("/api/open/{id}", post(handlers::open_app))
        .route("/api/check-installations", get(handlers::check_installations))
        .route("/api/version/{id}", get(handlers::version_info))
        .fallback_service(ServeDir::new(&config.static_dir))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// 启动服务，Ctrl+C 时优雅退出
pub async fn serve(config: Config) -> Result<()> {
    let state = AppState::from_config(&config)?;
    let app = build_router(state, &config);
    let addr = config.bind_addr();

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("监听 {} 失败", addr))?;
    log::info!("控制面板已启动: http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            log::info!("收到退出信号，正在关闭");
        })
        .await?;

    Ok(())
}
