use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use chromiumoxide::handler::viewport::Viewport;
use chromiumoxide::page::ScreenshotParams;
use chromiumoxide::{Browser, BrowserConfig, Page};
use futures::StreamExt;
use serde_json::{Value, json};
use tempfile::TempDir;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::app::AppConfig;
use crate::browser::scripts::{
    CLICK_HANDLE_JS, FIND_ELEMENTS_JS, FRAME_ACCESSIBLE_JS, PAGE_SOURCE_JS, RESET_REGISTRY_JS,
    wrap_in_frame, wrap_user_script,
};
use crate::browser::session::{By, Element, Session};
use crate::core::FrameContext;

const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

/// 本次运行独占的浏览器进程及其临时 profile 目录
pub struct ChromeBrowser {
    browser: Browser,
    handler: JoinHandle<()>,
    profile_dir: TempDir,
}

impl ChromeBrowser {
    pub async fn launch(config: &AppConfig) -> Result<Self> {
        let profile_dir = tempfile::Builder::new()
            .prefix("grade_checker_profile_")
            .tempdir()
            .context("创建临时 profile 目录失败")?;
        debug!("临时 profile 目录: {}", profile_dir.path().display());

        let viewport = Viewport {
            width: 1920,
            height: 1080,
            ..Default::default()
        };

        let mut builder = BrowserConfig::builder()
            .viewport(viewport)
            .user_data_dir(profile_dir.path())
            .arg(format!("--user-agent={}", USER_AGENT))
            .arg("--no-first-run")
            .arg("--no-default-browser-check");
        if !config.headless {
            builder = builder.with_head();
        }
        if let Some(path) = &config.chrome_executable {
            builder = builder.chrome_executable(path);
        }
        let browser_config = builder.build().map_err(|e| anyhow!("浏览器配置无效: {}", e))?;

        let (browser, mut handler) = Browser::launch(browser_config)
            .await
            .context("启动 Chrome 失败")?;

        // 在后台处理浏览器事件
        let handler = tokio::spawn(async move {
            while let Some(h) = handler.next().await {
                if h.is_err() {
                    break;
                }
            }
        });

        info!("✓ 浏览器已启动 (headless = {})", config.headless);
        Ok(Self {
            browser,
            handler,
            profile_dir,
        })
    }

    pub async fn open(&self, url: &str) -> Result<Page> {
        let page = self.browser.new_page("about:blank").await?;
        page.evaluate_on_new_document(
            "Object.defineProperty(navigator, 'webdriver', { get: () => undefined })",
        )
        .await?;
        page.goto(url).await.with_context(|| format!("打开页面失败: {}", url))?;
        Ok(page)
    }

    /// 关闭浏览器并删除临时目录，任何错误只记录不返回
    pub async fn shutdown(mut self) {
        debug!("正在关闭浏览器");
        if let Err(e) = self.browser.close().await {
            warn!("关闭浏览器失败: {}，但继续清理", e);
        }
        if let Err(e) = self.browser.wait().await {
            warn!("等待浏览器进程退出失败: {}", e);
        }
        self.handler.abort();

        let path = self.profile_dir.path().to_path_buf();
        if let Err(e) = self.profile_dir.close() {
            warn!("删除临时目录 {} 失败: {}", path.display(), e);
        } else {
            debug!("已删除临时目录 {}", path.display());
        }
    }
}

/// 基于 chromiumoxide 页面的会话实现，frame 切换通过句柄链记录
pub struct ChromeSession {
    page: Page,
    frame_path: Vec<usize>,
}

impl ChromeSession {
    pub fn new(page: Page) -> Self {
        Self {
            page,
            frame_path: Vec::new(),
        }
    }

    pub fn page(&self) -> &Page {
        &self.page
    }

    async fn eval(&self, js: String) -> Result<Value> {
        let value: Value = self
            .page
            .evaluate(js)
            .await
            .context("执行页面脚本失败")?
            .into_value()
            .unwrap_or(Value::Null);
        Ok(value)
    }

    fn args(&self) -> Value {
        json!({ "path": self.frame_path })
    }
}

#[async_trait(?Send)]
impl Session for ChromeSession {
    async fn find(&mut self, scope: Option<&Element>, by: By, selector: &str) -> Result<Vec<Element>> {
        let args = json!({
            "path": self.frame_path,
            "scope": scope.map(|s| s.handle),
            "by": by.as_str(),
            "selector": selector,
        });
        let value = self.eval(wrap_in_frame(&args, FIND_ELEMENTS_JS)).await?;
        if value.is_null() {
            return Ok(Vec::new());
        }
        let elements: Vec<Element> =
            serde_json::from_value(value).context("解析元素列表失败")?;
        Ok(elements)
    }

    async fn switch_to_frame(&mut self, frame: &Element) -> Result<()> {
        let args = json!({ "path": self.frame_path, "handle": frame.handle });
        let accessible = self.eval(wrap_in_frame(&args, FRAME_ACCESSIBLE_JS)).await?;
        if !accessible.as_bool().unwrap_or(false) {
            return Err(anyhow!(
                "无法进入 iframe (id = {:?}, src = {:?})",
                frame.id,
                frame.src
            ));
        }
        self.frame_path.push(frame.handle);
        debug!("已进入 iframe，当前深度 {}", self.frame_path.len());
        Ok(())
    }

    async fn switch_to_default(&mut self) -> Result<()> {
        self.frame_path.clear();
        self.eval(wrap_in_frame(&self.args(), RESET_REGISTRY_JS)).await?;
        Ok(())
    }

    async fn execute_script(&mut self, js: &str) -> Result<Value> {
        self.eval(wrap_user_script(&self.args(), js)).await
    }

    async fn click(&mut self, element: &Element) -> Result<()> {
        let args = json!({ "path": self.frame_path, "handle": element.handle });
        let clicked = self.eval(wrap_in_frame(&args, CLICK_HANDLE_JS)).await?;
        if clicked.as_bool().unwrap_or(false) {
            Ok(())
        } else {
            Err(anyhow!("元素句柄 {} 已失效", element.handle))
        }
    }

    async fn page_source(&mut self) -> Result<String> {
        let value = self.eval(wrap_in_frame(&self.args(), PAGE_SOURCE_JS)).await?;
        Ok(value.as_str().unwrap_or_default().to_string())
    }

    async fn screenshot(&mut self) -> Result<Vec<u8>> {
        let params = ScreenshotParams::builder().full_page(true).build();
        let png = self.page.screenshot(params).await.context("截图失败")?;
        Ok(png)
    }

    fn frame_context(&self) -> FrameContext {
        FrameContext::from_depth(self.frame_path.len())
    }
}
