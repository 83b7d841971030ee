//! 作业数据的各级提取策略，按优先级排列：
//! 结构化课程解析 → 按 class 等待读取 → 按 class 立即读取 → 备选选择器扫描
//! → 仪表盘卡片 → 整页文本关键字过滤。
//!
//! 每个策略 "没找到" 时返回空列表，只有会话本身出错才返回 `Err`。

use anyhow::Result;
use async_trait::async_trait;

use crate::app::ScrapeTimeouts;
use crate::browser::session::wait_for_elements;
use crate::browser::{By, Element, Session};
use crate::core::{Record, RecordKind};
use crate::utils::text::{contains_any_keyword, find_class_average, join_fields, normalize_percent};

/// 每门课程作业区块的 class
pub const ASSIGNMENT_CLASS: &str = "AssignmentClass";

/// 按课程序号直接拼出的平均分 id 前缀（门户两个版本的拼写不同）
pub const INDEXED_AVERAGE_ID_PREFIXES: &[&str] = &[
    "plnMain_rptAssigmnetsByCourse_lblHdrAverage_",
    "plnMain_rptAssignmentsByCourse_lblHdrAverage_",
];
const AVERAGE_ID_PREFIX_CSS: &str = "[id^='plnMain_rptAssigmnetsByCourse_lblHdrAverage'], \
     [id^='plnMain_rptAssignmentsByCourse_lblHdrAverage']";
const AVERAGE_CLASS_CSS: &str = ".sg-header-average, span.sg-header-heading.sg-right";
const COURSE_NAME_CSS: &[&str] = &["a.sg-header-heading", ".sg-header-heading:not(.sg-right)"];
const DATA_ROW_CSS: &[&str] = &["tr.sg-asp-table-data-row", "table tr"];

/// 结构化行最少需要的单元格数
pub const MIN_ROW_CELLS: usize = 3;

/// 备选扫描：依次尝试，第一个产出可用行的选择器即停止
pub const ALTERNATE_SELECTORS: &[(By, &str)] = &[
    (By::Css, "tr.sg-asp-table-data-row"),
    (By::TagName, "tr"),
    (By::ClassName, "sg-content-grid"),
    (By::XPath, "//div[contains(@class,'assignment')]"),
    (By::XPath, "//table//tr[td]"),
];
/// 备选扫描中文本长度需超过该字符数才保留
pub const MIN_ALTERNATE_TEXT_CHARS: usize = 10;

const DASHBOARD_AVERAGE_CSS: &str = "a.sg-header-average, div.card-average a";
const DASHBOARD_TITLE_CSS: &str = "a.sg-header-assignment, div.card-assignment a";

/// 整页兜底时保留的行关键字（大小写不敏感）
pub const PAGE_TEXT_KEYWORDS: &[&str] = &[
    "grade", "assignment", "test", "quiz", "homework", "project", "%", "missing",
];

#[async_trait(?Send)]
pub trait SelectorStrategy {
    fn name(&self) -> &'static str;

    async fn extract(&self, session: &mut dyn Session) -> Result<Vec<Record>>;
}

// ============================================================================
// 1. 结构化课程解析
// ============================================================================

pub struct StructuredCourseStrategy;

#[async_trait(?Send)]
impl SelectorStrategy for StructuredCourseStrategy {
    fn name(&self) -> &'static str {
        "structured-course"
    }

    async fn extract(&self, session: &mut dyn Session) -> Result<Vec<Record>> {
        let containers = session.find(None, By::ClassName, ASSIGNMENT_CLASS).await?;
        let mut records = Vec::new();

        for (index, container) in containers.iter().enumerate() {
            let course = course_name(session, container).await?;
            let grade = class_grade(session, container, index).await?;

            if let (Some(course), Some(grade)) = (&course, &grade) {
                let header = join_fields(&[
                    ("Course", Some(course.as_str())),
                    ("Class Grade", Some(grade.as_str())),
                ]);
                records.extend(Record::new(RecordKind::CourseHeader, header));
            }

            for row in assignment_rows(session, container).await? {
                let cells = session.find(Some(&row), By::TagName, "td").await?;
                if cells.len() < MIN_ROW_CELLS {
                    continue;
                }
                let cells: Vec<String> = cells.iter().map(|c| collapse_whitespace(&c.text)).collect();
                let line = format_assignment_row(course.as_deref(), grade.as_deref(), &cells);
                records.extend(Record::new(RecordKind::Assignment, line));
            }
        }

        Ok(records)
    }
}

async fn course_name(session: &mut dyn Session, container: &Element) -> Result<Option<String>> {
    for css in COURSE_NAME_CSS {
        let found = session.find(Some(container), By::Css, css).await?;
        if let Some(name) = found
            .iter()
            .map(|el| collapse_whitespace(&el.text))
            .find(|name| !name.is_empty())
        {
            return Ok(Some(name));
        }
    }
    Ok(None)
}

/// 班级成绩依次尝试：按序号的 id、id 前缀、class、文本模式
async fn class_grade(
    session: &mut dyn Session,
    container: &Element,
    index: usize,
) -> Result<Option<String>> {
    for prefix in INDEXED_AVERAGE_ID_PREFIXES {
        let id = format!("{}{}", prefix, index);
        let found = session.find(None, By::Id, &id).await?;
        if let Some(grade) = first_percent(&found) {
            return Ok(Some(grade));
        }
    }

    let by_prefix = session.find(Some(container), By::Css, AVERAGE_ID_PREFIX_CSS).await?;
    if let Some(grade) = first_percent(&by_prefix) {
        return Ok(Some(grade));
    }

    let by_class = session.find(Some(container), By::Css, AVERAGE_CLASS_CSS).await?;
    if let Some(grade) = first_percent(&by_class) {
        return Ok(Some(grade));
    }

    Ok(find_class_average(&container.text))
}

async fn assignment_rows(session: &mut dyn Session, container: &Element) -> Result<Vec<Element>> {
    for css in DATA_ROW_CSS {
        let rows = session.find(Some(container), By::Css, css).await?;
        if !rows.is_empty() {
            return Ok(rows);
        }
    }
    Ok(Vec::new())
}

fn first_percent(elements: &[Element]) -> Option<String> {
    elements.iter().find_map(|el| normalize_percent(el.trimmed_text()))
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// 单元格顺序：截止日期、布置日期（忽略）、作业、类别、得分、百分比
pub fn format_assignment_row(course: Option<&str>, grade: Option<&str>, cells: &[String]) -> String {
    let cell = |i: usize| cells.get(i).map(String::as_str);
    join_fields(&[
        ("Course", course),
        ("Class Grade", grade),
        ("Assignment", cell(2)),
        ("Due", cell(0)),
        ("Category", cell(3)),
        ("Score", cell(4)),
        ("Percent", cell(5)),
    ])
}

// ============================================================================
// 2 / 3. 按 class 直接读取
// ============================================================================

pub struct ClassNameStrategy {
    wait: Option<ScrapeTimeouts>,
}

impl ClassNameStrategy {
    /// 先等待元素出现（有上限）再读取
    pub fn waiting(timeouts: ScrapeTimeouts) -> Self {
        Self { wait: Some(timeouts) }
    }

    pub fn immediate() -> Self {
        Self { wait: None }
    }
}

#[async_trait(?Send)]
impl SelectorStrategy for ClassNameStrategy {
    fn name(&self) -> &'static str {
        if self.wait.is_some() {
            "class-name-wait"
        } else {
            "class-name-immediate"
        }
    }

    async fn extract(&self, session: &mut dyn Session) -> Result<Vec<Record>> {
        let elements = match &self.wait {
            Some(t) => {
                wait_for_elements(session, By::ClassName, ASSIGNMENT_CLASS, t.element_wait(), t.poll_interval())
                    .await?
            }
            None => session.find(None, By::ClassName, ASSIGNMENT_CLASS).await?,
        };
        Ok(elements
            .iter()
            .filter_map(|el| Record::new(RecordKind::Line, el.trimmed_text()))
            .collect())
    }
}

// ============================================================================
// 4. 备选选择器扫描
// ============================================================================

pub struct AlternateSelectorStrategy;

#[async_trait(?Send)]
impl SelectorStrategy for AlternateSelectorStrategy {
    fn name(&self) -> &'static str {
        "alternate-selectors"
    }

    async fn extract(&self, session: &mut dyn Session) -> Result<Vec<Record>> {
        for (by, selector) in ALTERNATE_SELECTORS {
            let found = session.find(None, *by, selector).await?;
            let usable: Vec<Record> = found
                .iter()
                .map(Element::trimmed_text)
                .filter(|text| text.chars().count() > MIN_ALTERNATE_TEXT_CHARS)
                .filter_map(|text| Record::new(RecordKind::Line, text))
                .collect();
            if !usable.is_empty() {
                tracing::debug!("备选选择器 {}={} 命中 {} 行", by.as_str(), selector, usable.len());
                return Ok(usable);
            }
        }
        Ok(Vec::new())
    }
}

// ============================================================================
// 5. 仪表盘卡片
// ============================================================================

pub struct DashboardStrategy;

#[async_trait(?Send)]
impl SelectorStrategy for DashboardStrategy {
    fn name(&self) -> &'static str {
        "dashboard-cards"
    }

    async fn extract(&self, session: &mut dyn Session) -> Result<Vec<Record>> {
        let averages = session.find(None, By::Css, DASHBOARD_AVERAGE_CSS).await?;
        let titles = session.find(None, By::Css, DASHBOARD_TITLE_CSS).await?;

        let mut records: Vec<Record> = averages
            .iter()
            .map(Element::trimmed_text)
            .filter_map(normalize_percent)
            .filter_map(|percent| Record::new(RecordKind::Average, format!("Average: {}", percent)))
            .collect();
        records.extend(
            titles
                .iter()
                .map(|el| collapse_whitespace(&el.text))
                .filter(|text| !text.is_empty())
                .filter_map(|text| Record::new(RecordKind::Assignment, format!("Assignment: {}", text))),
        );
        Ok(records)
    }
}

// ============================================================================
// 6. 整页文本兜底
// ============================================================================

pub struct PageTextStrategy;

#[async_trait(?Send)]
impl SelectorStrategy for PageTextStrategy {
    fn name(&self) -> &'static str {
        "page-text"
    }

    async fn extract(&self, session: &mut dyn Session) -> Result<Vec<Record>> {
        let body = session.body_text().await?;
        Ok(filter_keyword_lines(&body))
    }
}

pub fn filter_keyword_lines(body: &str) -> Vec<Record> {
    body.lines()
        .map(str::trim)
        .filter(|line| contains_any_keyword(line, PAGE_TEXT_KEYWORDS))
        .filter_map(|line| Record::new(RecordKind::Line, line))
        .collect()
}
