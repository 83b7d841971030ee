use std::sync::Arc;
use tracing::{debug, info};

use crate::app::ScrapeTimeouts;
use crate::browser::Session;
use crate::core::{ExtractionResult, GradeError};
use crate::scrape::observer::ExtractionObserver;
use crate::scrape::strategies::{
    AlternateSelectorStrategy, ClassNameStrategy, DashboardStrategy, PageTextStrategy,
    SelectorStrategy, StructuredCourseStrategy,
};

/// 按优先级依次运行提取策略，返回第一个非空结果；全部为空视为失败
pub struct ExtractionPipeline {
    strategies: Vec<Box<dyn SelectorStrategy>>,
    observer: Arc<dyn ExtractionObserver>,
}

impl ExtractionPipeline {
    /// 门户使用的标准六级策略
    pub fn standard(timeouts: &ScrapeTimeouts, observer: Arc<dyn ExtractionObserver>) -> Self {
        Self::with_strategies(
            vec![
                Box::new(StructuredCourseStrategy),
                Box::new(ClassNameStrategy::waiting(timeouts.clone())),
                Box::new(ClassNameStrategy::immediate()),
                Box::new(AlternateSelectorStrategy),
                Box::new(DashboardStrategy),
                Box::new(PageTextStrategy),
            ],
            observer,
        )
    }

    pub fn with_strategies(
        strategies: Vec<Box<dyn SelectorStrategy>>,
        observer: Arc<dyn ExtractionObserver>,
    ) -> Self {
        Self {
            strategies,
            observer,
        }
    }

    pub fn strategy_names(&self) -> Vec<&'static str> {
        self.strategies.iter().map(|s| s.name()).collect()
    }

    pub async fn run(&self, session: &mut dyn Session) -> Result<ExtractionResult, GradeError> {
        debug!("开始提取，当前 frame 上下文 {:?}", session.frame_context());

        for strategy in &self.strategies {
            let name = strategy.name();
            self.observer.strategy_started(name);

            // 单个策略出错只记录，继续下一个
            let records = match strategy.extract(session).await {
                Ok(records) => records,
                Err(e) => {
                    self.observer.strategy_failed(name, &e);
                    continue;
                }
            };
            self.observer.strategy_finished(name, records.len());

            if let Some(result) = ExtractionResult::new(name, records) {
                info!("📄 使用策略 {} 提取到 {} 条记录", name, result.count());
                return Ok(result);
            }
        }

        let attempted = self.strategies.len();
        self.observer.extraction_failed(attempted);
        Err(GradeError::ExtractionFailed { attempted })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::browser::HtmlSession;
    use crate::core::{Record, RecordKind};
    use crate::scrape::observer::{NoopObserver, TelemetryEvent, TelemetryObserver};
    use anyhow::{Result, anyhow};
    use async_trait::async_trait;
    use std::cell::Cell;
    use std::rc::Rc;

    struct Scripted {
        name: &'static str,
        lines: Vec<&'static str>,
        fail: bool,
        calls: Rc<Cell<usize>>,
    }

    impl Scripted {
        fn boxed(
            name: &'static str,
            lines: &[&'static str],
            fail: bool,
        ) -> (Box<dyn SelectorStrategy>, Rc<Cell<usize>>) {
            let calls = Rc::new(Cell::new(0));
            let strategy = Scripted {
                name,
                lines: lines.to_vec(),
                fail,
                calls: calls.clone(),
            };
            (Box::new(strategy), calls)
        }
    }

    #[async_trait(?Send)]
    impl SelectorStrategy for Scripted {
        fn name(&self) -> &'static str {
            self.name
        }

        async fn extract(&self, _session: &mut dyn Session) -> Result<Vec<Record>> {
            self.calls.set(self.calls.get() + 1);
            if self.fail {
                return Err(anyhow!("会话断开"));
            }
            Ok(self
                .lines
                .iter()
                .filter_map(|l| Record::new(RecordKind::Line, l))
                .collect())
        }
    }

    fn empty_session() -> HtmlSession {
        HtmlSession::from_html("<html><body></body></html>")
    }

    #[tokio::test]
    async fn test_first_non_empty_strategy_wins() {
        let (a, a_calls) = Scripted::boxed("a", &[], false);
        let (b, b_calls) = Scripted::boxed("b", &["row 1", "row 2"], false);
        let (c, c_calls) = Scripted::boxed("c", &["never"], false);
        let pipeline = ExtractionPipeline::with_strategies(vec![a, b, c], Arc::new(NoopObserver));

        let result = pipeline.run(&mut empty_session()).await.unwrap();
        assert_eq!(result.strategy(), "b");
        assert_eq!(result.lines().collect::<Vec<_>>(), vec!["row 1", "row 2"]);
        assert_eq!(a_calls.get(), 1);
        assert_eq!(b_calls.get(), 1);
        assert_eq!(c_calls.get(), 0, "成功后不应再执行后续策略");
    }

    #[tokio::test]
    async fn test_failing_strategy_does_not_abort() {
        let (a, _) = Scripted::boxed("a", &[], true);
        let (b, b_calls) = Scripted::boxed("b", &["Quiz 1"], false);
        let observer = Arc::new(TelemetryObserver::new("http://127.0.0.1:9/ingest", None));
        let pipeline = ExtractionPipeline::with_strategies(vec![a, b], observer.clone());

        let result = pipeline.run(&mut empty_session()).await.unwrap();
        assert_eq!(result.strategy(), "b");
        assert_eq!(b_calls.get(), 1);
        assert!(observer.events().iter().any(|e| matches!(
            e,
            TelemetryEvent::StrategyFailed { strategy: "a", .. }
        )));
    }

    #[tokio::test]
    async fn test_all_empty_is_hard_failure() {
        let (a, _) = Scripted::boxed("a", &[], false);
        let (b, _) = Scripted::boxed("b", &["   "], false);
        let (c, _) = Scripted::boxed("c", &[], true);
        let pipeline = ExtractionPipeline::with_strategies(vec![a, b, c], Arc::new(NoopObserver));

        let err = pipeline.run(&mut empty_session()).await.unwrap_err();
        assert!(matches!(err, GradeError::ExtractionFailed { attempted: 3 }));
    }

    #[tokio::test]
    async fn test_standard_order() {
        let pipeline = ExtractionPipeline::standard(&ScrapeTimeouts::immediate(), Arc::new(NoopObserver));
        assert_eq!(
            pipeline.strategy_names(),
            vec![
                "structured-course",
                "class-name-wait",
                "class-name-immediate",
                "alternate-selectors",
                "dashboard-cards",
                "page-text",
            ]
        );
    }

    #[tokio::test]
    async fn test_standard_structured_example() {
        let html = r#"<html><body>
            <div class="AssignmentClass">
                <a class="sg-header-heading">Algebra I</a>
                <span class="sg-header-heading sg-right">Cycle Average 92.50%</span>
                <table class="sg-asp-table">
                    <tr class="sg-asp-table-data-row">
                        <td>10/01/2024</td><td></td><td>Quiz 1</td><td>Classwork</td><td>18/20</td><td>90%</td>
                    </tr>
                </table>
            </div>
        </body></html>"#;
        let pipeline = ExtractionPipeline::standard(&ScrapeTimeouts::immediate(), Arc::new(NoopObserver));
        let result = pipeline.run(&mut HtmlSession::from_html(html)).await.unwrap();

        assert_eq!(result.strategy(), "structured-course");
        assert_eq!(
            result.lines().collect::<Vec<_>>(),
            vec![
                "Course: Algebra I | Class Grade: 92.50%",
                "Course: Algebra I | Class Grade: 92.50% | Assignment: Quiz 1 | Due: 10/01/2024 | Category: Classwork | Score: 18/20 | Percent: 90%",
            ]
        );
    }

    #[tokio::test]
    async fn test_standard_falls_through_to_page_text() {
        let html = "<html><body><p>Math 101</p><p>Homework 3 - 85%</p><p>random footer text</p></body></html>";
        let pipeline = ExtractionPipeline::standard(&ScrapeTimeouts::immediate(), Arc::new(NoopObserver));
        let result = pipeline.run(&mut HtmlSession::from_html(html)).await.unwrap();

        assert_eq!(result.strategy(), "page-text");
        assert_eq!(result.lines().collect::<Vec<_>>(), vec!["Homework 3 - 85%"]);
    }

    #[tokio::test]
    async fn test_standard_unstructured_container_uses_class_name() {
        let html = r#"<html><body><div class="AssignmentClass">Biology - no grades posted</div></body></html>"#;
        let pipeline = ExtractionPipeline::standard(&ScrapeTimeouts::immediate(), Arc::new(NoopObserver));
        let result = pipeline.run(&mut HtmlSession::from_html(html)).await.unwrap();

        assert_eq!(result.strategy(), "class-name-wait");
        assert_eq!(result.lines().collect::<Vec<_>>(), vec!["Biology - no grades posted"]);
    }

    #[tokio::test]
    async fn test_standard_empty_page_fails() {
        let pipeline = ExtractionPipeline::standard(&ScrapeTimeouts::immediate(), Arc::new(NoopObserver));
        let err = pipeline
            .run(&mut HtmlSession::from_html("<html><body><p>Welcome</p></body></html>"))
            .await
            .unwrap_err();
        assert!(matches!(err, GradeError::ExtractionFailed { attempted: 6 }));
    }
}
