use anyhow::{Result, anyhow};
use chromiumoxide::Page;
use serde_json::{Value, json};
use std::time::Duration;
use tokio::time::{Instant, sleep};
use tracing::{debug, info, warn};

use crate::app::{PortalCredentials, ScrapeTimeouts};
use crate::browser::scripts::{CLICK_BY_TEXT_JS, DOCUMENT_READY_JS, LINK_EXISTS_JS, wrap_with_args};
use crate::core::GradeError;
use crate::utils::text::redact;

const USERNAME_SELECTORS: &[&str] = &[
    "#LogOnDetails_UserName",
    "input[name='LogOnDetails.UserName']",
    "input[autocomplete='username']",
    "input[type='text']",
];
const PASSWORD_SELECTORS: &[&str] = &[
    "#LogOnDetails_Password",
    "input[name='LogOnDetails.Password']",
    "input[type='password']",
];
const SIGN_IN_LABELS: &[&str] = &["Sign In", "Log In", "Login"];
const CLASSES_LABELS: &[&str] = &["Classes"];

/// 登录门户并进入 "Classes" 页面，之后的 iframe 定位交给 FrameNavigator
pub async fn login_to_portal(
    page: &Page,
    credentials: &PortalCredentials,
    timeouts: &ScrapeTimeouts,
    redact_logs: bool,
) -> Result<(), GradeError> {
    info!("🔐 正在登录门户，用户: {}", redact(&credentials.username, redact_logs));

    if !poll_script(page, DOCUMENT_READY_JS.to_string(), timeouts.page_load(), timeouts.poll_interval()).await {
        return Err(GradeError::LoginFailed("登录页加载超时".to_string()));
    }

    type_into_first(page, USERNAME_SELECTORS, &credentials.username, timeouts)
        .await
        .map_err(|e| GradeError::LoginFailed(format!("找不到用户名输入框: {}", e)))?;
    type_into_first(page, PASSWORD_SELECTORS, &credentials.password, timeouts)
        .await
        .map_err(|e| GradeError::LoginFailed(format!("找不到密码输入框: {}", e)))?;

    if !click_by_text(page, SIGN_IN_LABELS).await {
        return Err(GradeError::LoginFailed("找不到登录按钮".to_string()));
    }
    debug!("已提交登录表单");

    let classes_js = wrap_with_args(&json!({ "candidates": CLASSES_LABELS }), LINK_EXISTS_JS);
    if !poll_script(page, classes_js, timeouts.page_load(), timeouts.poll_interval()).await {
        return Err(GradeError::LoginFailed(
            "登录后未出现 Classes 链接，用户名或密码可能有误".to_string(),
        ));
    }

    if !click_by_text(page, CLASSES_LABELS).await {
        return Err(GradeError::LoginFailed("点击 Classes 链接失败".to_string()));
    }
    info!("✓ 登录成功，已进入 Classes 页面");
    sleep(timeouts.frame_settle()).await;
    Ok(())
}

/// 在候选选择器中找到第一个输入框并模拟键入
async fn type_into_first(
    page: &Page,
    selectors: &[&str],
    value: &str,
    timeouts: &ScrapeTimeouts,
) -> Result<()> {
    for selector in selectors {
        match page.find_element(*selector).await {
            Ok(input) => {
                input.click().await?.type_str(value).await?;
                sleep(timeouts.keystroke_settle()).await;
                debug!("已在 {} 中输入", selector);
                return Ok(());
            }
            Err(_) => debug!("未找到输入框 {}", selector),
        }
    }
    Err(anyhow!("候选选择器均未命中: {:?}", selectors))
}

async fn click_by_text(page: &Page, labels: &[&str]) -> bool {
    let js = wrap_with_args(&json!({ "candidates": labels }), CLICK_BY_TEXT_JS);
    match page.evaluate(js).await {
        Ok(result) => result.into_value::<bool>().unwrap_or(false),
        Err(e) => {
            warn!("执行点击脚本失败: {}", e);
            false
        }
    }
}

/// 轮询脚本直到返回 true 或超时
async fn poll_script(page: &Page, js: String, timeout: Duration, interval: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        let ready = match page.evaluate(js.as_str()).await {
            Ok(result) => result.into_value::<Value>().ok().and_then(|v| v.as_bool()).unwrap_or(false),
            Err(e) => {
                debug!("轮询脚本执行失败: {}", e);
                false
            }
        };
        if ready {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        sleep(interval).await;
    }
}
