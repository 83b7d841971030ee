use anyhow::Result;
use std::sync::Arc;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::app::ScrapeTimeouts;
use crate::browser::{By, Element, Session};
use crate::core::FrameContext;
use crate::scrape::observer::ExtractionObserver;
use crate::utils::text::contains_any_keyword;

/// 已知的旧版内容 iframe id
pub const LEGACY_FRAME_ID: &str = "sg-legacy-iframe";

/// iframe 的 id / name / src 中包含这些关键字时优先进入
pub const FRAME_KEYWORDS: &[&str] = &[
    "class", "assign", "hac", "student", "grade", "sg", "legacy", "content",
];

/// 进入 frame 后尝试点击的子视图入口
pub const CLASSWORK_LABELS: &[&str] = &["Classwork", "Class Work", "Assignments"];

pub const MAX_FRAME_ATTEMPTS: usize = 3;

/// 负责在提取前进入作业数据所在的 iframe（可能嵌套两层）
pub struct FrameNavigator {
    timeouts: ScrapeTimeouts,
    observer: Arc<dyn ExtractionObserver>,
    max_attempts: usize,
}

impl FrameNavigator {
    pub fn new(timeouts: ScrapeTimeouts, observer: Arc<dyn ExtractionObserver>) -> Self {
        Self {
            timeouts,
            observer,
            max_attempts: MAX_FRAME_ATTEMPTS,
        }
    }

    pub fn max_attempts(&self) -> usize {
        self.max_attempts
    }

    /// 尽力进入内容 frame，返回是否成功。从不返回错误：
    /// 最终是否抓到数据由提取管线的空结果策略裁决
    pub async fn secure_frame(&self, session: &mut dyn Session) -> bool {
        for attempt in 1..=self.max_attempts {
            if let Err(e) = session.switch_to_default().await {
                warn!("切回顶层文档失败: {}", e);
            }
            if attempt > 1 {
                debug!("第 {} 次重试 frame 定位", attempt);
                sleep(self.timeouts.retry_pause()).await;
            }

            let reached = match self.enter_content_frame(session).await {
                Ok(context) => context,
                Err(e) => {
                    debug!("第 {} 次 frame 定位出错: {:#}", attempt, e);
                    session.frame_context()
                }
            };
            self.observer.frame_attempt(attempt, reached);

            if reached.is_inside_frame() {
                info!("✓ 已进入内容 frame ({:?})，第 {} 次尝试", reached, attempt);
                self.open_classwork_view(session).await;
                return true;
            }
        }

        warn!("⚠️ {} 次尝试后仍未进入内容 frame", self.max_attempts);
        false
    }

    async fn enter_content_frame(&self, session: &mut dyn Session) -> Result<FrameContext> {
        let direct = session.find(None, By::Id, LEGACY_FRAME_ID).await?;
        let outer = match direct.into_iter().find(Element::is_frame) {
            Some(frame) => {
                debug!("直接找到 iframe #{}", LEGACY_FRAME_ID);
                Some(frame)
            }
            None => {
                let frames = session.find(None, By::TagName, "iframe").await?;
                debug!("页面上共有 {} 个 iframe", frames.len());
                pick_frame(&frames).cloned()
            }
        };

        let Some(outer) = outer else {
            return Ok(session.frame_context());
        };
        session.switch_to_frame(&outer).await?;
        sleep(self.timeouts.frame_settle()).await;

        // 嵌套 iframe 只在命中关键字时进入，不做首个 iframe 兜底
        match session.find(None, By::TagName, "iframe").await {
            Ok(inner) => {
                if let Some(frame) = inner.iter().find(|frame| frame_matches_keyword(frame)) {
                    match session.switch_to_frame(frame).await {
                        Ok(()) => sleep(self.timeouts.frame_settle()).await,
                        Err(e) => debug!("进入嵌套 iframe 失败: {:#}", e),
                    }
                }
            }
            Err(e) => debug!("查找嵌套 iframe 失败: {:#}", e),
        }

        Ok(session.frame_context())
    }

    /// 点击 Classwork/Assignments 入口；找不到不算错误
    async fn open_classwork_view(&self, session: &mut dyn Session) {
        let candidates = match session.find(None, By::Css, "a, button, input").await {
            Ok(found) => found,
            Err(e) => {
                debug!("查找子视图入口失败: {:#}", e);
                return;
            }
        };

        let target = candidates.iter().find(|el| {
            let label = el.trimmed_text();
            CLASSWORK_LABELS.iter().any(|c| c.eq_ignore_ascii_case(label))
        });

        match target {
            Some(el) => match session.click(el).await {
                Ok(()) => {
                    debug!("已点击子视图入口: {}", el.trimmed_text());
                    sleep(self.timeouts.frame_settle()).await;
                }
                Err(e) => debug!("点击子视图入口失败: {:#}", e),
            },
            None => debug!("没有 Classwork/Assignments 入口，直接提取"),
        }
    }
}

/// 优先选择属性命中关键字的 iframe，否则取第一个
pub fn pick_frame(frames: &[Element]) -> Option<&Element> {
    frames
        .iter()
        .find(|frame| frame_matches_keyword(frame))
        .or_else(|| frames.first())
}

pub fn frame_matches_keyword(frame: &Element) -> bool {
    [&frame.id, &frame.name, &frame.src]
        .into_iter()
        .flatten()
        .any(|value| contains_any_keyword(value, FRAME_KEYWORDS))
}
