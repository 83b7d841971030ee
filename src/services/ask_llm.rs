use openai::Credentials;
use openai::chat::{ChatCompletion, ChatCompletionMessage, ChatCompletionMessageRole};
use tracing::{debug, info, warn};

use crate::app::config::LlmSettings;
use crate::core::GradeError;
use crate::utils::text::{clean_assignments_content, truncate_chars};

const SYSTEM_PROMPT: &str = "You are an expert in evaluating the grades and performance of high school students. \
You will provide an analysis of the student's grades and respond in HTML.";

/// 调用 OpenAI 兼容接口；温度固定为 0
pub async fn ask_llm_with_config(
    user_message: &str,
    system_message: Option<&str>,
    settings: &LlmSettings,
) -> Result<String, GradeError> {
    let api_key = settings
        .api_key
        .as_deref()
        .ok_or(GradeError::MissingConfig("LLM_API_KEY"))?;

    debug!("正在调用 LLM API，模型: {}", settings.model);
    let credentials = Credentials::new(api_key, settings.base_url.as_str());

    let mut messages = Vec::new();
    if let Some(system_msg) = system_message {
        messages.push(message(ChatCompletionMessageRole::System, system_msg));
    }
    messages.push(message(ChatCompletionMessageRole::User, user_message));

    let chat_completion = ChatCompletion::builder(&settings.model, messages)
        .credentials(credentials)
        .temperature(0.0_f32)
        .create()
        .await
        .map_err(|e| {
            warn!("LLM API 调用失败: {}", e);
            GradeError::Llm(e.to_string())
        })?;

    let content = chat_completion
        .choices
        .first()
        .and_then(|choice| choice.message.content.clone())
        .ok_or_else(|| GradeError::Llm("LLM 返回内容为空".to_string()))?;

    debug!("LLM API 调用成功");
    Ok(content.trim().to_string())
}

fn message(role: ChatCompletionMessageRole, content: &str) -> ChatCompletionMessage {
    ChatCompletionMessage {
        role,
        content: Some(content.to_string()),
        name: None,
        function_call: None,
        tool_call_id: None,
        tool_calls: None,
    }
}

/// 作业分析 prompt：清理后的作业内容按字符预算截断后嵌入固定模板
pub fn build_analysis_prompt(assignments_content: &str, char_budget: usize) -> String {
    let cleaned = clean_assignments_content(assignments_content);
    let data = truncate_chars(&cleaned, char_budget);

    format!(
        "Analyze this student's assignments and grades. Focus on:
1. Missing assignments (marked with 'M - Missing' or a '0.00' grade)
2. Class grades below 80%
3. Class grades above 80%

Here is the data:
{data}

Provide:
- Summary of key issues
    -- Number of missing assignments
    -- Number of class assignment grades that are less than 80%
- Table of all of the missing assignments with formatted spacing to look like a table
    -- Course Name
    -- Assignment
    -- Due Date
    -- Sort by Due Date from the newest date to the oldest date
- Table of low class grades with formatted spacing to look like a table
    -- Course Name
    -- Current Grade
    -- Sort by Current Grade from lowest to highest
- Table other class grade above 80% with formatted spacing to look like a table
    -- Course Name
    -- Current Grade
    -- Sort by Current Grade from lowest to highest

Keep the response concise and focused.
The response should be in HTML format that includes headings, numbered lists, bullet points so that it is easy to read.
Only include the analysis."
    )
}

/// 生成分析报告；任何失败都变成报告正文里的错误说明
pub async fn analyze_assignments(assignments_content: &str, settings: &LlmSettings) -> String {
    let prompt = build_analysis_prompt(assignments_content, settings.char_budget);
    info!("🚀 发送作业数据给 LLM 分析 ({} 字符)", prompt.chars().count());

    match ask_llm_with_config(&prompt, Some(SYSTEM_PROMPT), settings).await {
        Ok(report) => report,
        Err(e) => {
            warn!("❌ LLM 分析失败: {}", e);
            error_report(&e)
        }
    }
}

pub fn error_report(error: &GradeError) -> String {
    format!("Error processing assignments: {}", error)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::AppConfig;

    #[test]
    fn test_prompt_drops_timestamp_and_blank_lines() {
        let content = "Timestamp: 2024-10-01 07:00:00\n\n  Course: Algebra I | Class Grade: 92.50%  \n\nMissing: Essay\n";
        let prompt = build_analysis_prompt(content, 10_000);

        assert!(!prompt.contains("Timestamp:"));
        assert!(prompt.contains("Here is the data:\nCourse: Algebra I | Class Grade: 92.50%\nMissing: Essay\n\nProvide:"));
    }

    #[test]
    fn test_prompt_respects_char_budget() {
        let content = "x".repeat(50);
        let prompt = build_analysis_prompt(&content, 10);
        assert!(prompt.contains(&format!("Here is the data:\n{}\n", "x".repeat(10))));
        assert!(!prompt.contains(&"x".repeat(11)));
    }

    #[tokio::test]
    async fn test_missing_key_becomes_error_report() {
        let mut settings = AppConfig::default().llm;
        settings.api_key = None;

        let report = analyze_assignments("Course: Art", &settings).await;
        assert!(report.starts_with("Error processing assignments: "));
        assert!(report.contains("LLM_API_KEY"));
    }

    #[tokio::test]
    #[ignore] // 需要真实的 API key
    async fn test_analyze_assignments_live() {
        let cfg = AppConfig::from_sources(None).unwrap();
        let report = analyze_assignments("Course: Algebra I | Class Grade: 72%", &cfg.llm).await;
        println!("{}", report);
    }
}
