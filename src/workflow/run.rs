use anyhow::{Context, Result};
use chrono::Local;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::app::AppConfig;
use crate::browser::{ChromeBrowser, ChromeSession, HtmlSession, Session, login_to_portal};
use crate::core::{ExtractionResult, GradeError, RunMode};
use crate::scrape::{
    ExtractionObserver, ExtractionPipeline, FrameNavigator, TelemetryObserver, TracingObserver,
};
use crate::services::{Spinner, analyze_assignments, load_assignments, save_assignments, send_report};
use crate::utils::text::sanitize_filename;

/// 一次运行用到的观察者；配置了遥测端点时额外保留句柄以便最后上报
struct Observers {
    shared: Arc<dyn ExtractionObserver>,
    telemetry: Option<Arc<TelemetryObserver>>,
}

impl Observers {
    fn from_config(cfg: &AppConfig) -> Self {
        match &cfg.telemetry.endpoint {
            Some(endpoint) => {
                let telemetry = Arc::new(TelemetryObserver::new(endpoint.clone(), cfg.telemetry.token.clone()));
                Self {
                    shared: telemetry.clone(),
                    telemetry: Some(telemetry),
                }
            }
            None => Self {
                shared: Arc::new(TracingObserver),
                telemetry: None,
            },
        }
    }

    async fn flush(&self) {
        if let Some(telemetry) = &self.telemetry {
            telemetry.flush().await;
        }
    }
}

/// 在已定位好的会话上完成 frame 定位与提取，结束时总是回到顶层文档
pub async fn extract_from_session(
    session: &mut dyn Session,
    cfg: &AppConfig,
    observer: Arc<dyn ExtractionObserver>,
) -> Result<ExtractionResult, GradeError> {
    let navigator = FrameNavigator::new(cfg.timeouts.clone(), observer.clone());
    if !navigator.secure_frame(session).await {
        let err = GradeError::FrameNotFound {
            attempts: navigator.max_attempts(),
        };
        warn!("⚠️ {}，继续在当前文档中提取", err);
    }

    let pipeline = ExtractionPipeline::standard(&cfg.timeouts, observer);
    debug!("提取策略顺序: {}", pipeline.strategy_names().join(" → "));
    let result = pipeline.run(session).await;

    if result.is_err() && cfg.debug_snapshots {
        match save_debug_snapshot(session, &cfg.debug_dir, "extraction failed").await {
            Ok(path) => info!("已保存调试快照: {}", path.display()),
            Err(e) => warn!("保存调试快照失败: {:#}", e),
        }
    }

    if let Err(e) = session.switch_to_default().await {
        warn!("切回顶层文档失败: {}", e);
    }
    result
}

/// 保存当前文档源码和截图，返回 html 文件路径；截图失败不影响源码保存
pub async fn save_debug_snapshot(session: &mut dyn Session, dir: &Path, label: &str) -> Result<PathBuf> {
    fs::create_dir_all(dir).with_context(|| format!("创建调试目录失败: {}", dir.display()))?;
    let stem = format!("{}_{}", Local::now().format("%Y%m%d_%H%M%S"), sanitize_filename(label));

    let html_path = dir.join(format!("{}.html", stem));
    let source = session.page_source().await?;
    fs::write(&html_path, source).with_context(|| format!("写入 {} 失败", html_path.display()))?;

    match session.screenshot().await {
        Ok(png) => {
            let png_path = dir.join(format!("{}.png", stem));
            fs::write(&png_path, png).with_context(|| format!("写入 {} 失败", png_path.display()))?;
        }
        Err(e) => debug!("截图不可用: {:#}", e),
    }
    Ok(html_path)
}

/// 启动独立浏览器、登录并抓取；无论成败都会关闭浏览器
pub async fn scrape_live(cfg: &AppConfig, observer: Arc<dyn ExtractionObserver>) -> Result<ExtractionResult> {
    let credentials = cfg.portal_credentials()?;
    let browser = ChromeBrowser::launch(cfg).await.map_err(GradeError::Browser)?;

    let result: Result<ExtractionResult> = async {
        let page = browser.open(&credentials.url).await.map_err(GradeError::Browser)?;
        login_to_portal(&page, &credentials, &cfg.timeouts, cfg.redact_logs).await?;

        let mut session = ChromeSession::new(page);
        let extracted = extract_from_session(&mut session, cfg, observer).await;

        debug!("正在关闭门户页面");
        if let Err(e) = session.page().clone().close().await {
            warn!("关闭页面失败: {}，但继续处理", e);
        }
        Ok(extracted?)
    }
    .await;

    browser.shutdown().await;
    result
}

/// 按运行模式得到作业文本：实时抓取和回放会先落盘，本地模式直接读文件
pub async fn collect_assignments(cfg: &AppConfig, mode: &RunMode) -> Result<String> {
    let observers = Observers::from_config(cfg);

    let extracted = match mode {
        RunMode::Local => {
            info!("📂 使用本地作业文件 {}", cfg.artifact_path.display());
            return load_assignments(&cfg.artifact_path);
        }
        RunMode::Live => {
            let _spinner = Spinner::start("正在抓取门户作业数据...");
            scrape_live(cfg, observers.shared.clone()).await
        }
        RunMode::Replay(path) => {
            info!("🔁 回放页面源码 {}", path.display());
            let mut session = HtmlSession::from_file(path)?;
            extract_from_session(&mut session, cfg, observers.shared.clone())
                .await
                .map_err(anyhow::Error::from)
        }
    };
    observers.flush().await;

    let result = extracted?;
    save_assignments(&cfg.artifact_path, &result)?;
    load_assignments(&cfg.artifact_path)
}

/// 单次完整流程：获取作业、生成报告、打印，可选发邮件
pub async fn run_once(cfg: &AppConfig, mode: &RunMode, email: bool) -> Result<()> {
    info!("🚀 开始检查成绩...");
    let content = collect_assignments(cfg, mode).await?;

    let report = {
        let spinner = Spinner::start("正在生成分析报告...");
        let report = analyze_assignments(&content, &cfg.llm).await;
        spinner.finish("分析完成");
        report
    };
    println!("\n{}", report);

    if email {
        // 邮件失败只记录，不影响本次运行结果
        if let Err(e) = send_report(&cfg.mail, &report, cfg.redact_logs).await {
            error!("❌ {}", e);
        }
    }
    info!("✅ 成绩检查完成");
    Ok(())
}
