use anyhow::{Context, Result};
use chrono::Local;
use std::fs;
use std::path::Path;
use tracing::info;

use crate::core::{ExtractionResult, RecordKind};

/// 写入作业文件：首行时间戳、一个空行，之后每条记录一行
pub fn save_assignments(path: &Path, result: &ExtractionResult) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("创建目录失败: {}", parent.display()))?;
    }

    let mut content = format!("Timestamp: {}\n\n", Local::now().format("%Y-%m-%d %H:%M:%S"));
    for line in result.lines() {
        content.push_str(line);
        content.push('\n');
    }

    fs::write(path, content).with_context(|| format!("写入作业文件失败: {}", path.display()))?;
    let courses = result
        .records()
        .iter()
        .filter(|r| r.kind() == RecordKind::CourseHeader)
        .count();
    info!(
        "💾 已保存 {} 条记录（{} 门课程）到 {}",
        result.count(),
        courses,
        path.display()
    );
    Ok(())
}

pub fn load_assignments(path: &Path) -> Result<String> {
    fs::read_to_string(path).with_context(|| format!("读取作业文件失败: {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Record, RecordKind};
    use tempfile::tempdir;

    fn sample() -> ExtractionResult {
        let records = vec![
            Record::new(RecordKind::CourseHeader, "Course: Algebra I | Class Grade: 92.50%").unwrap(),
            Record::new(RecordKind::Assignment, "Course: Algebra I | Assignment: Quiz 1").unwrap(),
        ];
        ExtractionResult::new("structured-course", records).unwrap()
    }

    #[test]
    fn test_save_writes_timestamp_then_lines() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("out").join("assignments.txt");
        save_assignments(&path, &sample()).unwrap();

        let content = load_assignments(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert!(lines[0].starts_with("Timestamp: "));
        assert_eq!(lines[0].len(), "Timestamp: 2024-10-01 07:00:00".len());
        assert_eq!(lines[1], "");
        assert_eq!(&lines[2..], ["Course: Algebra I | Class Grade: 92.50%", "Course: Algebra I | Assignment: Quiz 1"]);
    }

    #[test]
    fn test_load_missing_file_fails() {
        let dir = tempdir().unwrap();
        assert!(load_assignments(&dir.path().join("nope.txt")).is_err());
    }
}
