use std::fmt;

/// 记录类型：由产生它的提取策略决定
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordKind {
    /// 课程标题行（课程名 + 班级成绩）
    CourseHeader,
    /// 单条作业
    Assignment,
    /// 仪表盘上的总平均分
    Average,
    /// 兜底策略抓到的原始文本行
    Line,
}

/// 抓取到的一条文本记录
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    kind: RecordKind,
    text: String,
}

impl Record {
    /// 文本去除首尾空白后为空时返回 None
    pub fn new(kind: RecordKind, text: impl AsRef<str>) -> Option<Self> {
        let text = text.as_ref().trim();
        if text.is_empty() {
            return None;
        }
        Some(Self {
            kind,
            text: text.to_string(),
        })
    }

    pub fn kind(&self) -> RecordKind {
        self.kind
    }

    pub fn text(&self) -> &str {
        &self.text
    }
}

impl fmt::Display for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

/// 一次成功提取的结果，记录按 DOM 顺序排列且不为空
#[derive(Debug, Clone)]
pub struct ExtractionResult {
    strategy: &'static str,
    records: Vec<Record>,
}

impl ExtractionResult {
    pub fn new(strategy: &'static str, records: Vec<Record>) -> Option<Self> {
        if records.is_empty() {
            return None;
        }
        Some(Self { strategy, records })
    }

    pub fn strategy(&self) -> &'static str {
        self.strategy
    }

    pub fn records(&self) -> &[Record] {
        &self.records
    }

    pub fn count(&self) -> usize {
        self.records.len()
    }

    pub fn lines(&self) -> impl Iterator<Item = &str> {
        self.records.iter().map(Record::text)
    }
}

/// 当前会话聚焦的文档层级
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FrameContext {
    #[default]
    Default,
    Legacy,
    Nested,
}

impl FrameContext {
    /// 根据已进入的 iframe 深度推出上下文
    pub fn from_depth(depth: usize) -> Self {
        match depth {
            0 => FrameContext::Default,
            1 => FrameContext::Legacy,
            _ => FrameContext::Nested,
        }
    }

    pub fn is_inside_frame(self) -> bool {
        !matches!(self, FrameContext::Default)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunMode {
    /// 登录门户实时抓取
    Live,
    /// 读取磁盘上已有的作业文件
    Local,
    /// 对保存的页面源码重新执行提取
    Replay(std::path::PathBuf),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_rejects_blank_text() {
        assert!(Record::new(RecordKind::Line, "   \n\t").is_none());
        let record = Record::new(RecordKind::Line, "  Quiz 1 ").unwrap();
        assert_eq!(record.text(), "Quiz 1");
        assert_eq!(record.kind(), RecordKind::Line);
    }

    #[test]
    fn test_extraction_result_never_empty() {
        assert!(ExtractionResult::new("page-text", vec![]).is_none());
        let records = vec![Record::new(RecordKind::Line, "Homework 3 - 85%").unwrap()];
        let result = ExtractionResult::new("page-text", records).unwrap();
        assert_eq!(result.count(), 1);
        assert_eq!(result.strategy(), "page-text");
        assert_eq!(result.lines().collect::<Vec<_>>(), vec!["Homework 3 - 85%"]);
    }

    #[test]
    fn test_frame_context_from_depth() {
        assert_eq!(FrameContext::from_depth(0), FrameContext::Default);
        assert_eq!(FrameContext::from_depth(1), FrameContext::Legacy);
        assert_eq!(FrameContext::from_depth(3), FrameContext::Nested);
        assert!(!FrameContext::Default.is_inside_frame());
        assert!(FrameContext::Nested.is_inside_frame());
    }
}
