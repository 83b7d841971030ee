use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use once_cell::sync::Lazy;
use scraper::{ElementRef, Html, Node, Selector};
use serde_json::Value;
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use tracing::debug;

use crate::browser::session::{By, Element, Session};
use crate::core::FrameContext;

/// 块级元素结束时在可见文本中换行
const BLOCK_TAGS: &[&str] = &[
    "address", "article", "br", "div", "footer", "form", "h1", "h2", "h3", "h4", "h5", "h6",
    "header", "hr", "li", "nav", "ol", "p", "section", "table", "tbody", "thead", "tr", "ul",
];
const SKIP_TAGS: &[&str] = &["script", "style", "noscript", "template", "head", "iframe"];

static ANY_ELEMENT: Lazy<Selector> =
    Lazy::new(|| Selector::parse("*").expect("通配选择器无效"));

/// 会话上发生的一次调用，供调试和测试统计
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionCall {
    Find(By, String),
    SwitchToFrame(usize),
    SwitchToDefault,
    ExecuteScript,
    Click(usize),
}

/// 基于保存的页面源码的只读会话。
///
/// iframe 的内容取自 `srcdoc` 属性；不执行脚本，XPath 查询总是返回空。
/// 元素句柄指向 (文档下标, 文档内元素序号)。
pub struct HtmlSession {
    documents: Vec<Html>,
    frame_docs: HashMap<(usize, usize), usize>,
    frame_path: Vec<usize>,
    registry: Vec<(usize, usize)>,
    calls: Vec<SessionCall>,
}

impl HtmlSession {
    pub fn from_html(html: &str) -> Self {
        Self {
            documents: vec![Html::parse_document(html)],
            frame_docs: HashMap::new(),
            frame_path: Vec::new(),
            registry: Vec::new(),
            calls: Vec::new(),
        }
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let html = fs::read_to_string(path)
            .with_context(|| format!("读取页面源码失败: {}", path.display()))?;
        Ok(Self::from_html(&html))
    }

    pub fn calls(&self) -> &[SessionCall] {
        &self.calls
    }

    fn current_doc(&self) -> usize {
        self.frame_path.last().copied().unwrap_or(0)
    }

    fn resolve(&self, handle: usize) -> Option<(usize, ElementRef<'_>)> {
        let (doc_idx, ordinal) = *self.registry.get(handle)?;
        let doc = self.documents.get(doc_idx)?;
        doc.select(&ANY_ELEMENT).nth(ordinal).map(|el| (doc_idx, el))
    }

    fn register(&mut self, doc_idx: usize, ordinal: usize) -> usize {
        self.registry.push((doc_idx, ordinal));
        self.registry.len() - 1
    }
}

fn css_for(by: By, selector: &str) -> Option<String> {
    match by {
        By::Id => Some(format!("[id=\"{}\"]", selector)),
        By::ClassName => Some(format!("[class~=\"{}\"]", selector)),
        By::TagName | By::Css => Some(selector.to_string()),
        By::XPath => None,
    }
}

fn snapshot_of(el: ElementRef<'_>) -> Element {
    let attr = |name: &str| el.value().attr(name).map(str::to_string);
    let tag = el.value().name().to_ascii_lowercase();
    let text = if tag == "input" {
        attr("value").unwrap_or_default()
    } else {
        visible_text(el)
    };
    Element {
        handle: 0,
        tag,
        id: attr("id"),
        name: attr("name"),
        src: attr("src"),
        class: attr("class"),
        text,
    }
}

/// 近似浏览器 innerText：块级元素换行，行内空白折叠
pub fn visible_text(el: ElementRef<'_>) -> String {
    let mut raw = String::new();
    push_text(el, &mut raw);
    raw.lines()
        .map(|line| line.split_whitespace().collect::<Vec<_>>().join(" "))
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

fn push_text(el: ElementRef<'_>, out: &mut String) {
    let name = el.value().name();
    if SKIP_TAGS.contains(&name) {
        return;
    }
    let is_block = BLOCK_TAGS.contains(&name);
    if is_block {
        out.push('\n');
    }
    for child in el.children() {
        match child.value() {
            Node::Text(t) => out.push_str(&t.text.replace(['\n', '\r'], " ")),
            Node::Element(_) => {
                if let Some(child_el) = ElementRef::wrap(child) {
                    push_text(child_el, out);
                }
            }
            _ => {}
        }
    }
    if is_block {
        out.push('\n');
    } else if matches!(name, "td" | "th") {
        out.push(' ');
    }
}

#[async_trait(?Send)]
impl Session for HtmlSession {
    async fn find(&mut self, scope: Option<&Element>, by: By, selector: &str) -> Result<Vec<Element>> {
        self.calls.push(SessionCall::Find(by, selector.to_string()));

        let Some(css) = css_for(by, selector) else {
            debug!("页面快照不支持 XPath: {}", selector);
            return Ok(Vec::new());
        };
        let parsed = Selector::parse(&css).map_err(|e| anyhow!("选择器解析失败 {}: {}", css, e))?;

        let doc_idx = self.current_doc();
        let doc = &self.documents[doc_idx];
        let matches: Vec<ElementRef<'_>> = match scope {
            Some(scope) => match self.resolve(scope.handle) {
                Some((scope_doc, scope_el)) if scope_doc == doc_idx => {
                    scope_el.select(&parsed).collect()
                }
                _ => Vec::new(),
            },
            None => doc.select(&parsed).collect(),
        };

        let ordered: Vec<ElementRef<'_>> = doc.select(&ANY_ELEMENT).collect();
        let found: Vec<(usize, Element)> = matches
            .into_iter()
            .filter_map(|el| {
                let ordinal = ordered.iter().position(|candidate| *candidate == el)?;
                Some((ordinal, snapshot_of(el)))
            })
            .collect();

        Ok(found
            .into_iter()
            .map(|(ordinal, mut element)| {
                element.handle = self.register(doc_idx, ordinal);
                element
            })
            .collect())
    }

    async fn switch_to_frame(&mut self, frame: &Element) -> Result<()> {
        self.calls.push(SessionCall::SwitchToFrame(frame.handle));

        let (doc_idx, ordinal) = *self
            .registry
            .get(frame.handle)
            .ok_or_else(|| anyhow!("元素句柄 {} 已失效", frame.handle))?;
        if doc_idx != self.current_doc() {
            return Err(anyhow!("iframe 不在当前文档中"));
        }

        let child_doc = match self.frame_docs.get(&(doc_idx, ordinal)) {
            Some(idx) => *idx,
            None => {
                let (_, el) = self
                    .resolve(frame.handle)
                    .ok_or_else(|| anyhow!("元素句柄 {} 已失效", frame.handle))?;
                if !matches!(el.value().name(), "iframe" | "frame") {
                    return Err(anyhow!("<{}> 不是 iframe", el.value().name()));
                }
                let srcdoc = el
                    .value()
                    .attr("srcdoc")
                    .ok_or_else(|| anyhow!("iframe 没有内嵌文档 (src = {:?})", frame.src))?
                    .to_string();
                self.documents.push(Html::parse_document(&srcdoc));
                let idx = self.documents.len() - 1;
                self.frame_docs.insert((doc_idx, ordinal), idx);
                idx
            }
        };

        self.frame_path.push(child_doc);
        Ok(())
    }

    async fn switch_to_default(&mut self) -> Result<()> {
        self.calls.push(SessionCall::SwitchToDefault);
        self.frame_path.clear();
        self.registry.clear();
        Ok(())
    }

    async fn execute_script(&mut self, _js: &str) -> Result<Value> {
        self.calls.push(SessionCall::ExecuteScript);
        debug!("页面快照不执行脚本");
        Ok(Value::Null)
    }

    async fn click(&mut self, element: &Element) -> Result<()> {
        self.calls.push(SessionCall::Click(element.handle));
        if self.registry.get(element.handle).is_none() {
            return Err(anyhow!("元素句柄 {} 已失效", element.handle));
        }
        Ok(())
    }

    async fn page_source(&mut self) -> Result<String> {
        Ok(self.documents[self.current_doc()].html())
    }

    async fn screenshot(&mut self) -> Result<Vec<u8>> {
        Err(anyhow!("页面快照无法截图"))
    }

    fn frame_context(&self) -> FrameContext {
        FrameContext::from_depth(self.frame_path.len())
    }

    async fn body_text(&mut self) -> Result<String> {
        let doc = &self.documents[self.current_doc()];
        let body = Selector::parse("body").map_err(|e| anyhow!("选择器解析失败: {}", e))?;
        Ok(doc
            .select(&body)
            .next()
            .map(visible_text)
            .unwrap_or_else(|| visible_text(doc.root_element())))
    }
}
