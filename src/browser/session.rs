use anyhow::Result;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;
use tokio::time::{Instant, sleep};
use tracing::debug;

use crate::browser::scripts::BODY_TEXT_JS;
use crate::core::FrameContext;

/// 元素查找方式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum By {
    Id,
    ClassName,
    TagName,
    Css,
    XPath,
}

impl By {
    pub fn as_str(self) -> &'static str {
        match self {
            By::Id => "id",
            By::ClassName => "class",
            By::TagName => "tag",
            By::Css => "css",
            By::XPath => "xpath",
        }
    }
}

/// 查找到的元素快照；`handle` 只在产生它的会话内有效
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Element {
    pub handle: usize,
    pub tag: String,
    pub id: Option<String>,
    pub name: Option<String>,
    pub src: Option<String>,
    pub class: Option<String>,
    pub text: String,
}

impl Element {
    pub fn trimmed_text(&self) -> &str {
        self.text.trim()
    }

    pub fn is_frame(&self) -> bool {
        matches!(self.tag.as_str(), "iframe" | "frame")
    }
}

/// 已登录的浏览器会话。提取核心只依赖这个接口，不关心背后是真实浏览器还是保存的页面
#[async_trait(?Send)]
pub trait Session {
    /// 在当前 frame 中查找元素；`scope` 给定时只在其子树内查找
    async fn find(&mut self, scope: Option<&Element>, by: By, selector: &str) -> Result<Vec<Element>>;

    async fn switch_to_frame(&mut self, frame: &Element) -> Result<()>;

    async fn switch_to_default(&mut self) -> Result<()>;

    /// 在当前 frame 的文档中执行脚本，脚本体用 `return` 返回结果
    async fn execute_script(&mut self, js: &str) -> Result<Value>;

    async fn click(&mut self, element: &Element) -> Result<()>;

    async fn page_source(&mut self) -> Result<String>;

    async fn screenshot(&mut self) -> Result<Vec<u8>>;

    fn frame_context(&self) -> FrameContext;

    /// 当前文档 body 的可见文本
    async fn body_text(&mut self) -> Result<String> {
        let value = self.execute_script(BODY_TEXT_JS).await?;
        Ok(value.as_str().unwrap_or_default().to_string())
    }
}

/// 轮询直到元素出现或超时；超时返回空列表而不是错误
pub async fn wait_for_elements(
    session: &mut dyn Session,
    by: By,
    selector: &str,
    timeout: Duration,
    poll_interval: Duration,
) -> Result<Vec<Element>> {
    let deadline = Instant::now() + timeout;
    loop {
        let found = session.find(None, by, selector).await?;
        if !found.is_empty() {
            return Ok(found);
        }
        if Instant::now() >= deadline {
            debug!("等待 {}={} 超时", by.as_str(), selector);
            return Ok(found);
        }
        sleep(poll_interval).await;
    }
}
