use anyhow::Result;
use chrono::{Duration as ChronoDuration, Local, NaiveDateTime, NaiveTime};
use tokio::time::sleep;
use tracing::{error, info};

use crate::app::AppConfig;
use crate::core::RunMode;
use crate::workflow::run::run_once;

/// 下一次运行时间：今天的 `at` 尚未到则为今天，否则顺延一天
pub fn next_run_after(now: NaiveDateTime, at: NaiveTime) -> NaiveDateTime {
    let today = now.date().and_time(at);
    if today > now {
        today
    } else {
        today + ChronoDuration::days(1)
    }
}

/// 每天在固定时间运行一次，直到收到 Ctrl-C；单次失败只记录
pub async fn run_daily(cfg: &AppConfig, mode: &RunMode, email: bool) -> Result<()> {
    let at = cfg.schedule_at()?;
    info!("⏰ 定时模式已启动，每天 {} 运行", at.format("%H:%M"));

    loop {
        let now = Local::now().naive_local();
        let next = next_run_after(now, at);
        let wait = (next - now).to_std().unwrap_or_default();
        info!("下一次运行: {}", next.format("%Y-%m-%d %H:%M"));

        tokio::select! {
            _ = sleep(wait) => {}
            _ = tokio::signal::ctrl_c() => {
                info!("收到中断信号，退出定时模式");
                return Ok(());
            }
        }

        if let Err(e) = run_once(cfg, mode, email).await {
            error!("❌ 本次运行失败: {:#}", e);
        }
    }
}
