mod app;
mod browser;
mod core;
mod scrape;
mod services;
mod utils;
mod workflow;

use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{error, info};

use crate::app::AppConfig;
use crate::core::RunMode;

/// 学生门户成绩检查：抓取作业、生成分析报告，可选邮件发送
#[derive(Debug, Parser)]
#[command(name = "grade_checker", version)]
struct Cli {
    /// 使用本地作业文件，不抓取门户
    #[arg(long)]
    local: bool,

    /// 通过邮件发送分析报告
    #[arg(long)]
    email: bool,

    /// 每天定时运行，直到 Ctrl-C
    #[arg(long, conflicts_with = "serve")]
    schedule: bool,

    /// 启动 HTTP 服务，GET /check-grades 触发一次抓取
    #[arg(long)]
    serve: bool,

    /// 配置文件路径（默认 grade_checker.toml）
    #[arg(long)]
    config: Option<PathBuf>,

    /// 对保存的页面源码重新执行提取
    #[arg(long, value_name = "PAGE_HTML", conflicts_with = "local")]
    replay: Option<PathBuf>,
}

impl Cli {
    fn mode(&self) -> RunMode {
        match (&self.replay, self.local) {
            (Some(path), _) => RunMode::Replay(path.clone()),
            (None, true) => RunMode::Local,
            (None, false) => RunMode::Live,
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let cfg = match AppConfig::from_sources(cli.config.as_deref()) {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("配置加载失败: {:#}", e);
            return ExitCode::FAILURE;
        }
    };
    app::logger::init(&cfg.log_level);

    let mode = cli.mode();
    info!("运行模式: {:?}", mode);

    let outcome = if cli.serve {
        workflow::serve(cfg, mode).await
    } else if cli.schedule {
        workflow::run_daily(&cfg, &mode, cli.email).await
    } else {
        workflow::run_once(&cfg, &mode, cli.email).await
    };

    match outcome {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("❌ 运行失败: {:#}", e);
            ExitCode::FAILURE
        }
    }
}
