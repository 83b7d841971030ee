use anyhow::{Context, Result, anyhow};
use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::{Mutex, oneshot};
use tracing::{error, info};

use crate::app::AppConfig;
use crate::core::RunMode;
use crate::workflow::run::collect_assignments;

/// HTTP 触发抓取时共享的状态；同一时刻只允许一次抓取
pub struct ServeState {
    cfg: AppConfig,
    mode: RunMode,
    running: Mutex<()>,
}

impl ServeState {
    pub fn new(cfg: AppConfig, mode: RunMode) -> Self {
        Self {
            cfg,
            mode,
            running: Mutex::new(()),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum CheckGradesResponse {
    Success { assignments: String },
    Error { message: String },
}

pub fn create_router(state: Arc<ServeState>) -> Router {
    Router::new()
        .route("/check-grades", get(check_grades))
        .with_state(state)
}

async fn check_grades(State(state): State<Arc<ServeState>>) -> (StatusCode, Json<CheckGradesResponse>) {
    let _guard = state.running.lock().await;
    info!("🚀 收到 HTTP 抓取请求");

    match collect_on_worker(state.clone()).await {
        Ok(assignments) => (StatusCode::OK, Json(CheckGradesResponse::Success { assignments })),
        Err(e) => {
            error!("❌ HTTP 抓取失败: {:#}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(CheckGradesResponse::Error {
                    message: format!("Error: {:#}", e),
                }),
            )
        }
    }
}

/// 浏览器会话不是 `Send`，在独立线程的单线程 runtime 上执行抓取
async fn collect_on_worker(state: Arc<ServeState>) -> Result<String> {
    let (tx, rx) = oneshot::channel();
    std::thread::Builder::new()
        .name("grade-scrape".to_string())
        .spawn(move || {
            let outcome = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .context("创建抓取 runtime 失败")
                .and_then(|rt| rt.block_on(collect_assignments(&state.cfg, &state.mode)));
            let _ = tx.send(outcome);
        })
        .context("启动抓取线程失败")?;

    rx.await.map_err(|_| anyhow!("抓取线程意外退出"))?
}

/// 监听 `serve_addr`，直到 Ctrl-C
pub async fn serve(cfg: AppConfig, mode: RunMode) -> Result<()> {
    let addr = cfg.serve_addr.clone();
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("监听 {} 失败", addr))?;
    info!("🌐 HTTP 服务已启动: http://{}/check-grades", addr);

    let app = create_router(Arc::new(ServeState::new(cfg, mode)));
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("收到中断信号，停止 HTTP 服务");
        })
        .await
        .context("HTTP 服务异常退出")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::ScrapeTimeouts;
    use serde_json::Value;
    use std::fs;
    use std::path::Path;
    use tempfile::tempdir;

    fn replay_state(dir: &Path, page_html: &str) -> Arc<ServeState> {
        let page = dir.join("page.html");
        fs::write(&page, page_html).unwrap();
        let cfg = AppConfig {
            artifact_path: dir.join("assignments.txt"),
            debug_dir: dir.join("debug"),
            timeouts: ScrapeTimeouts::immediate(),
            ..AppConfig::default()
        };
        Arc::new(ServeState::new(cfg, RunMode::Replay(page)))
    }

    async fn get_check_grades(state: Arc<ServeState>) -> (u16, Value) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, create_router(state)).await.unwrap();
        });

        let resp = reqwest::get(format!("http://{}/check-grades", addr)).await.unwrap();
        let status = resp.status().as_u16();
        (status, resp.json().await.unwrap())
    }

    #[tokio::test]
    async fn test_check_grades_success() {
        let dir = tempdir().unwrap();
        let state = replay_state(
            dir.path(),
            "<html><body><div class='AssignmentClass'><a class='sg-header-heading'>Art</a><span class='sg-header-average'>97%</span></div></body></html>",
        );

        let (status, body) = get_check_grades(state).await;
        assert_eq!(status, 200);
        assert_eq!(body["status"], "success");
        let assignments = body["assignments"].as_str().unwrap();
        assert!(assignments.starts_with("Timestamp: "));
        assert!(assignments.contains("Course: Art | Class Grade: 97%"));
    }

    #[tokio::test]
    async fn test_check_grades_failure_is_500() {
        let dir = tempdir().unwrap();
        let state = replay_state(dir.path(), "<html><body><p>Welcome</p></body></html>");

        let (status, body) = get_check_grades(state).await;
        assert_eq!(status, 500);
        assert_eq!(body["status"], "error");
        assert!(body["message"].as_str().unwrap().starts_with("Error: "));
    }
}
