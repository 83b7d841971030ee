use anyhow::{Context, Result};
use chrono::NaiveTime;
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::core::GradeError;

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    #[serde(default)]
    pub portal: PortalConfig,
    #[serde(default = "default_artifact_path")]
    pub artifact_path: PathBuf,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default = "default_true")]
    pub redact_logs: bool,
    #[serde(default)]
    pub debug_snapshots: bool,
    #[serde(default = "default_debug_dir")]
    pub debug_dir: PathBuf,
    #[serde(default = "default_schedule_time")]
    pub schedule_time: String,
    #[serde(default = "default_true")]
    pub headless: bool,
    /// `--serve` 模式监听地址
    #[serde(default = "default_serve_addr")]
    pub serve_addr: String,
    #[serde(default)]
    pub chrome_executable: Option<PathBuf>,
    #[serde(default)]
    pub llm: LlmSettings,
    #[serde(default)]
    pub mail: MailSettings,
    #[serde(default)]
    pub telemetry: TelemetrySettings,
    #[serde(default)]
    pub timeouts: ScrapeTimeouts,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct PortalConfig {
    pub url: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
}

/// 登录门户所需的完整凭证
#[derive(Debug, Clone)]
pub struct PortalCredentials {
    pub url: String,
    pub username: String,
    pub password: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LlmSettings {
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_llm_base_url")]
    pub base_url: String,
    #[serde(default = "default_llm_model")]
    pub model: String,
    #[serde(default = "default_char_budget")]
    pub char_budget: usize,
}

#[derive(Debug, Deserialize, Clone)]
pub struct MailSettings {
    #[serde(default)]
    pub sender: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub receivers: Vec<String>,
    #[serde(default = "default_smtp_host")]
    pub smtp_host: String,
    #[serde(default = "default_smtp_port")]
    pub smtp_port: u16,
    #[serde(default = "default_student_name")]
    pub student_name: String,
}

/// SMTP 连接方式：465 端口走隐式 TLS，其他端口（如 587）先明文再 STARTTLS
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SmtpSecurity {
    ImplicitTls,
    StartTls,
}

impl MailSettings {
    pub fn security(&self) -> SmtpSecurity {
        if self.smtp_port == 465 {
            SmtpSecurity::ImplicitTls
        } else {
            SmtpSecurity::StartTls
        }
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct TelemetrySettings {
    pub endpoint: Option<String>,
    pub token: Option<String>,
}

/// 抓取过程中所有固定等待时间（毫秒）
#[derive(Debug, Deserialize, Clone)]
pub struct ScrapeTimeouts {
    #[serde(default = "default_page_load_ms")]
    pub page_load_ms: u64,
    #[serde(default = "default_frame_settle_ms")]
    pub frame_settle_ms: u64,
    #[serde(default = "default_retry_pause_ms")]
    pub retry_pause_ms: u64,
    #[serde(default = "default_keystroke_settle_ms")]
    pub keystroke_settle_ms: u64,
    #[serde(default = "default_element_wait_ms")]
    pub element_wait_ms: u64,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

impl ScrapeTimeouts {
    pub fn page_load(&self) -> Duration {
        Duration::from_millis(self.page_load_ms)
    }

    pub fn frame_settle(&self) -> Duration {
        Duration::from_millis(self.frame_settle_ms)
    }

    pub fn retry_pause(&self) -> Duration {
        Duration::from_millis(self.retry_pause_ms)
    }

    pub fn keystroke_settle(&self) -> Duration {
        Duration::from_millis(self.keystroke_settle_ms)
    }

    pub fn element_wait(&self) -> Duration {
        Duration::from_millis(self.element_wait_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    /// 测试用：所有等待都为零
    #[cfg(test)]
    pub fn immediate() -> Self {
        Self {
            page_load_ms: 0,
            frame_settle_ms: 0,
            retry_pause_ms: 0,
            keystroke_settle_ms: 0,
            element_wait_ms: 0,
            poll_interval_ms: 1,
        }
    }
}

impl AppConfig {
    pub fn load(config_path: Option<&Path>) -> Result<Self> {
        let path = config_path.unwrap_or_else(|| Path::new("grade_checker.toml"));
        if path.exists() {
            let raw = fs::read_to_string(path)
                .with_context(|| format!("读取配置文件失败: {}", path.display()))?;
            let cfg: AppConfig = toml::from_str(&raw)
                .with_context(|| format!("解析配置文件失败: {}", path.display()))?;
            return Ok(cfg);
        }
        Ok(AppConfig::default())
    }

    /// 读取配置文件、.env 与进程环境变量，环境变量优先
    pub fn from_sources(config_path: Option<&Path>) -> Result<Self> {
        // .env 缺失是正常情况
        let _ = dotenvy::dotenv();
        let mut cfg = Self::load(config_path)?;
        cfg.apply_env(|key| std::env::var(key).ok());
        Ok(cfg)
    }

    /// 用外部查找函数覆盖配置，方便测试时不修改进程环境
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        if let Some(v) = get("HAC_URL") {
            self.portal.url = Some(v);
        }
        if let Some(v) = get("HAC_USERNAME") {
            self.portal.username = Some(v);
        }
        if let Some(v) = get("HAC_PASSWORD") {
            self.portal.password = Some(v);
        }
        if let Some(v) = get("ASSIGNMENTS_PATH") {
            self.artifact_path = PathBuf::from(v);
        }
        if let Some(v) = get("LOG_LEVEL") {
            self.log_level = v;
        }
        if let Some(v) = get("LOG_REDACT").and_then(|v| parse_bool(&v)) {
            self.redact_logs = v;
        }
        if let Some(v) = get("DEBUG_SNAPSHOTS").and_then(|v| parse_bool(&v)) {
            self.debug_snapshots = v;
        }
        if let Some(v) = get("DEBUG_DIR") {
            self.debug_dir = PathBuf::from(v);
        }
        if let Some(v) = get("SCHEDULE_TIME") {
            self.schedule_time = v;
        }
        if let Some(v) = get("HEADLESS").and_then(|v| parse_bool(&v)) {
            self.headless = v;
        }
        if let Some(v) = get("SERVE_ADDR") {
            self.serve_addr = v;
        }
        if let Some(v) = get("CHROME_PATH") {
            self.chrome_executable = Some(PathBuf::from(v));
        }
        if let Some(v) = get("TELEMETRY_URL") {
            self.telemetry.endpoint = Some(v);
        }
        if let Some(v) = get("TELEMETRY_TOKEN") {
            self.telemetry.token = Some(v);
        }
        if let Some(v) = get("LLM_API_KEY").or_else(|| get("OPENAI_API_KEY")) {
            self.llm.api_key = Some(v);
        }
        if let Some(v) = get("LLM_BASE_URL") {
            self.llm.base_url = v;
        }
        if let Some(v) = get("LLM_MODEL") {
            self.llm.model = v;
        }
        if let Some(v) = get("GMAIL_SENDER") {
            self.mail.sender = Some(v);
        }
        if let Some(v) = get("GMAIL_APP_PASSWORD") {
            self.mail.password = Some(v);
        }
        if let Some(v) = get("GMAIL_RECEIVERS") {
            self.mail.receivers = split_recipients(&v);
        }
        if let Some(v) = get("SMTP_HOST") {
            self.mail.smtp_host = v;
        }
        if let Some(v) = get("SMTP_PORT").and_then(|v| v.parse().ok()) {
            self.mail.smtp_port = v;
        }
        if let Some(v) = get("STUDENT_NAME") {
            self.mail.student_name = v;
        }
    }

    /// 实时抓取前必须具备的门户凭证
    pub fn portal_credentials(&self) -> Result<PortalCredentials, GradeError> {
        let url = self.portal.url.clone().ok_or(GradeError::MissingConfig("HAC_URL"))?;
        let username = self
            .portal
            .username
            .clone()
            .ok_or(GradeError::MissingConfig("HAC_USERNAME"))?;
        let password = self
            .portal
            .password
            .clone()
            .ok_or(GradeError::MissingConfig("HAC_PASSWORD"))?;
        Ok(PortalCredentials {
            url,
            username,
            password,
        })
    }

    /// 解析 "HH:MM" 格式的每日运行时间
    pub fn schedule_at(&self) -> Result<NaiveTime> {
        NaiveTime::parse_from_str(self.schedule_time.trim(), "%H:%M")
            .with_context(|| format!("无效的定时时间: {}", self.schedule_time))
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            portal: PortalConfig::default(),
            artifact_path: default_artifact_path(),
            log_level: default_log_level(),
            redact_logs: true,
            debug_snapshots: false,
            debug_dir: default_debug_dir(),
            schedule_time: default_schedule_time(),
            headless: true,
            serve_addr: default_serve_addr(),
            chrome_executable: None,
            llm: LlmSettings::default(),
            mail: MailSettings::default(),
            telemetry: TelemetrySettings::default(),
            timeouts: ScrapeTimeouts::default(),
        }
    }
}

impl Default for LlmSettings {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: default_llm_base_url(),
            model: default_llm_model(),
            char_budget: default_char_budget(),
        }
    }
}

impl Default for MailSettings {
    fn default() -> Self {
        Self {
            sender: None,
            password: None,
            receivers: Vec::new(),
            smtp_host: default_smtp_host(),
            smtp_port: default_smtp_port(),
            student_name: default_student_name(),
        }
    }
}

impl Default for ScrapeTimeouts {
    fn default() -> Self {
        Self {
            page_load_ms: default_page_load_ms(),
            frame_settle_ms: default_frame_settle_ms(),
            retry_pause_ms: default_retry_pause_ms(),
            keystroke_settle_ms: default_keystroke_settle_ms(),
            element_wait_ms: default_element_wait_ms(),
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn split_recipients(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn default_true() -> bool {
    true
}

fn default_artifact_path() -> PathBuf {
    PathBuf::from("assignments.txt")
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_debug_dir() -> PathBuf {
    PathBuf::from("debug")
}

fn default_schedule_time() -> String {
    "07:00".to_string()
}

fn default_serve_addr() -> String {
    "127.0.0.1:5000".to_string()
}

fn default_llm_base_url() -> String {
    "https://api.openai.com/v1/".to_string()
}

fn default_llm_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_char_budget() -> usize {
    10_000
}

fn default_smtp_host() -> String {
    "smtp.gmail.com".to_string()
}

fn default_smtp_port() -> u16 {
    465
}

fn default_student_name() -> String {
    "Student".to_string()
}

fn default_page_load_ms() -> u64 {
    15_000
}

fn default_frame_settle_ms() -> u64 {
    1_500
}

fn default_retry_pause_ms() -> u64 {
    2_000
}

fn default_keystroke_settle_ms() -> u64 {
    300
}

fn default_element_wait_ms() -> u64 {
    10_000
}

fn default_poll_interval_ms() -> u64 {
    250
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_from_empty_toml() {
        let cfg: AppConfig = toml::from_str("").unwrap();
        assert_eq!(cfg.artifact_path, PathBuf::from("assignments.txt"));
        assert_eq!(cfg.llm.char_budget, 10_000);
        assert_eq!(cfg.mail.smtp_port, 465);
        assert!(cfg.redact_logs);
        assert_eq!(cfg.timeouts.element_wait_ms, 10_000);
        assert_eq!(cfg.serve_addr, "127.0.0.1:5000");
    }

    #[test]
    fn test_toml_sections() {
        let raw = r#"
            artifact_path = "out/assignments.txt"
            schedule_time = "06:30"

            [portal]
            url = "https://hac.example.org/HomeAccess"

            [timeouts]
            retry_pause_ms = 10
        "#;
        let cfg: AppConfig = toml::from_str(raw).unwrap();
        assert_eq!(cfg.portal.url.as_deref(), Some("https://hac.example.org/HomeAccess"));
        assert_eq!(cfg.timeouts.retry_pause_ms, 10);
        assert_eq!(cfg.timeouts.frame_settle_ms, 1_500);
        assert_eq!(cfg.schedule_at().unwrap(), NaiveTime::from_hms_opt(6, 30, 0).unwrap());
    }

    #[test]
    fn test_env_overrides() {
        let mut cfg = AppConfig::default();
        cfg.apply_env(lookup_from(&[
            ("HAC_URL", "https://hac.example.org"),
            ("HAC_USERNAME", "jdoe"),
            ("HAC_PASSWORD", "secret"),
            ("GMAIL_RECEIVERS", " a@example.com, ,b@example.com "),
            ("LOG_REDACT", "false"),
            ("SMTP_PORT", "587"),
            ("OPENAI_API_KEY", "sk-test"),
        ]));

        let creds = cfg.portal_credentials().unwrap();
        assert_eq!(creds.username, "jdoe");
        assert_eq!(cfg.mail.receivers, vec!["a@example.com", "b@example.com"]);
        assert!(!cfg.redact_logs);
        assert_eq!(cfg.mail.smtp_port, 587);
        assert_eq!(cfg.mail.security(), SmtpSecurity::StartTls);
        assert_eq!(cfg.llm.api_key.as_deref(), Some("sk-test"));
    }

    #[test]
    fn test_smtp_security_follows_port() {
        let mut cfg = AppConfig::default();
        assert_eq!(cfg.mail.security(), SmtpSecurity::ImplicitTls);

        cfg.apply_env(lookup_from(&[("SMTP_PORT", "587"), ("SERVE_ADDR", "0.0.0.0:8080")]));
        assert_eq!(cfg.mail.security(), SmtpSecurity::StartTls);
        assert_eq!(cfg.serve_addr, "0.0.0.0:8080");
    }

    #[test]
    fn test_missing_credentials() {
        let mut cfg = AppConfig::default();
        cfg.apply_env(lookup_from(&[("HAC_URL", "https://hac.example.org")]));
        let err = cfg.portal_credentials().unwrap_err();
        assert!(matches!(err, GradeError::MissingConfig("HAC_USERNAME")));
    }

    #[test]
    fn test_invalid_schedule_time() {
        let cfg = AppConfig {
            schedule_time: "7 am".to_string(),
            ..AppConfig::default()
        };
        assert!(cfg.schedule_at().is_err());
    }
}
