use thiserror::Error;

#[derive(Error, Debug)]
pub enum GradeError {
    #[error("登录失败: {0}")]
    LoginFailed(String),

    #[error("重试 {attempts} 次后仍未找到内容 iframe")]
    FrameNotFound { attempts: usize },

    #[error("全部 {attempted} 个提取策略均未返回数据")]
    ExtractionFailed { attempted: usize },

    #[error("LLM 调用失败: {0}")]
    Llm(String),

    #[error("邮件发送失败: {0}")]
    Mail(String),

    #[error("缺少必要配置: {0}")]
    MissingConfig(&'static str),

    #[error("浏览器错误: {0}")]
    Browser(#[from] anyhow::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extraction_failed_carries_count() {
        let err = GradeError::ExtractionFailed { attempted: 6 };
        assert!(err.to_string().contains('6'));
        assert!(matches!(err, GradeError::ExtractionFailed { attempted: 6 }));
    }
}
