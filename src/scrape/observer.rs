use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Mutex;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::core::FrameContext;

/// 提取过程的观察者，由调用方注入；默认方法什么也不做
pub trait ExtractionObserver: Send + Sync {
    fn frame_attempt(&self, _attempt: usize, _reached: FrameContext) {}

    fn strategy_started(&self, _strategy: &'static str) {}

    fn strategy_finished(&self, _strategy: &'static str, _records: usize) {}

    fn strategy_failed(&self, _strategy: &'static str, _error: &anyhow::Error) {}

    fn extraction_failed(&self, _attempted: usize) {}
}

pub struct NoopObserver;

impl ExtractionObserver for NoopObserver {}

/// 把事件写进 tracing 日志
pub struct TracingObserver;

impl ExtractionObserver for TracingObserver {
    fn frame_attempt(&self, attempt: usize, reached: FrameContext) {
        debug!("frame 定位第 {} 次尝试，当前上下文 {:?}", attempt, reached);
    }

    fn strategy_started(&self, strategy: &'static str) {
        debug!("尝试提取策略: {}", strategy);
    }

    fn strategy_finished(&self, strategy: &'static str, records: usize) {
        if records > 0 {
            info!("✓ 策略 {} 提取到 {} 条记录", strategy, records);
        } else {
            debug!("策略 {} 没有结果", strategy);
        }
    }

    fn strategy_failed(&self, strategy: &'static str, error: &anyhow::Error) {
        warn!("策略 {} 出错: {:#}", strategy, error);
    }

    fn extraction_failed(&self, attempted: usize) {
        warn!("❌ {} 个提取策略全部为空", attempted);
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum TelemetryEvent {
    FrameAttempt { attempt: usize, context: String },
    StrategyStarted { strategy: &'static str },
    StrategyFinished { strategy: &'static str, records: usize },
    StrategyFailed { strategy: &'static str, error: String },
    ExtractionFailed { attempted: usize },
}

#[derive(Debug, Serialize)]
struct TelemetryBatch<'a> {
    run_id: Uuid,
    sent_at: DateTime<Utc>,
    events: &'a [TelemetryEvent],
}

/// 缓存事件，运行结束后一次性 POST 到遥测端点；同时转发给 tracing
pub struct TelemetryObserver {
    endpoint: String,
    token: Option<String>,
    run_id: Uuid,
    events: Mutex<Vec<TelemetryEvent>>,
    client: reqwest::Client,
}

impl TelemetryObserver {
    pub fn new(endpoint: impl Into<String>, token: Option<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            token,
            run_id: Uuid::new_v4(),
            events: Mutex::new(Vec::new()),
            client: reqwest::Client::new(),
        }
    }

    fn push(&self, event: TelemetryEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }

    pub fn events(&self) -> Vec<TelemetryEvent> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }

    /// 发送缓存的事件；失败只记日志，不影响主流程
    pub async fn flush(&self) {
        let events = match self.events.lock() {
            Ok(mut events) => std::mem::take(&mut *events),
            Err(_) => return,
        };
        if events.is_empty() {
            return;
        }

        let batch = TelemetryBatch {
            run_id: self.run_id,
            sent_at: Utc::now(),
            events: &events,
        };
        let mut request = self
            .client
            .post(&self.endpoint)
            .timeout(Duration::from_secs(10))
            .json(&batch);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        match request.send().await {
            Ok(resp) if resp.status().is_success() => {
                debug!("已上报 {} 条遥测事件", events.len());
            }
            Ok(resp) => warn!("遥测上报返回状态 {}", resp.status()),
            Err(e) => warn!("遥测上报失败: {}", e),
        }
    }
}

impl ExtractionObserver for TelemetryObserver {
    fn frame_attempt(&self, attempt: usize, reached: FrameContext) {
        TracingObserver.frame_attempt(attempt, reached);
        self.push(TelemetryEvent::FrameAttempt {
            attempt,
            context: format!("{:?}", reached),
        });
    }

    fn strategy_started(&self, strategy: &'static str) {
        TracingObserver.strategy_started(strategy);
        self.push(TelemetryEvent::StrategyStarted { strategy });
    }

    fn strategy_finished(&self, strategy: &'static str, records: usize) {
        TracingObserver.strategy_finished(strategy, records);
        self.push(TelemetryEvent::StrategyFinished { strategy, records });
    }

    fn strategy_failed(&self, strategy: &'static str, error: &anyhow::Error) {
        TracingObserver.strategy_failed(strategy, error);
        self.push(TelemetryEvent::StrategyFailed {
            strategy,
            error: format!("{:#}", error),
        });
    }

    fn extraction_failed(&self, attempted: usize) {
        TracingObserver.extraction_failed(attempted);
        self.push(TelemetryEvent::ExtractionFailed { attempted });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_telemetry_buffers_events_in_order() {
        let observer = TelemetryObserver::new("http://127.0.0.1:9/ingest", None);
        observer.strategy_started("page-text");
        observer.strategy_finished("page-text", 2);
        observer.extraction_failed(6);

        assert_eq!(
            observer.events(),
            vec![
                TelemetryEvent::StrategyStarted { strategy: "page-text" },
                TelemetryEvent::StrategyFinished { strategy: "page-text", records: 2 },
                TelemetryEvent::ExtractionFailed { attempted: 6 },
            ]
        );
    }

    #[test]
    fn test_event_serialization_is_tagged() {
        let json = serde_json::to_value(TelemetryEvent::StrategyFailed {
            strategy: "dashboard-cards",
            error: "boom".to_string(),
        })
        .unwrap();
        assert_eq!(json["event"], "strategy_failed");
        assert_eq!(json["strategy"], "dashboard-cards");
    }
}
