use once_cell::sync::Lazy;
use regex::Regex;

static PERCENT_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(\d{1,3}(?:\.\d+)?)\s*%?").expect("百分比正则无效")
});

static CLASS_AVERAGE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(?:cycle|class)\s+average\s*:?\s*(\d{1,3}(?:\.\d+)?)\s*%?")
        .expect("平均分正则无效")
});

static EMAIL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}").expect("邮箱正则无效")
});

/// 清理文件名中的非法字符
pub fn sanitize_filename(filename: &str) -> String {
    filename
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' | ' ' => '_',
            _ => c,
        })
        .collect()
}

/// 从任意文本中取出第一个数字并补上百分号，如 "Cycle Average 92.50" -> "92.50%"
pub fn normalize_percent(text: &str) -> Option<String> {
    PERCENT_RE
        .captures(text)
        .and_then(|caps| caps.get(1))
        .map(|m| format!("{}%", m.as_str()))
}

/// 在整段文本里匹配 "Cycle Average 92.50%" / "Class Average: 88%"
pub fn find_class_average(text: &str) -> Option<String> {
    CLASS_AVERAGE_RE
        .captures(text)
        .and_then(|caps| caps.get(1))
        .map(|m| format!("{}%", m.as_str()))
}

/// 把 (字段名, 值) 拼成 "Name: value | Name: value"，跳过缺失或空白的字段
pub fn join_fields(fields: &[(&str, Option<&str>)]) -> String {
    fields
        .iter()
        .filter_map(|(label, value)| {
            let value = value.map(str::trim).filter(|v| !v.is_empty())?;
            Some(format!("{}: {}", label, value))
        })
        .collect::<Vec<_>>()
        .join(" | ")
}

/// 大小写不敏感地判断是否包含任一关键字
pub fn contains_any_keyword(text: &str, keywords: &[&str]) -> bool {
    let lowered = text.to_lowercase();
    keywords.iter().any(|k| lowered.contains(k))
}

/// 按字符数截断（不会切断多字节字符）
pub fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

/// 去掉作业文件里的时间戳行和空行，每行去除首尾空白
pub fn clean_assignments_content(content: &str) -> String {
    content
        .lines()
        .filter(|line| !line.starts_with("Timestamp:"))
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

/// 日志脱敏：保留首字符，其余替换为 *；邮箱只保留域名
pub fn redact(value: &str, enabled: bool) -> String {
    if !enabled {
        return value.to_string();
    }
    if EMAIL_RE.is_match(value) {
        return EMAIL_RE
            .replace_all(value, |caps: &regex::Captures| {
                let addr = &caps[0];
                match addr.split_once('@') {
                    Some((_, domain)) => format!("***@{}", domain),
                    None => "***".to_string(),
                }
            })
            .into_owned();
    }
    let mut chars = value.chars();
    match chars.next() {
        Some(first) => format!("{}{}", first, "*".repeat(chars.count().min(8))),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_percent() {
        assert_eq!(normalize_percent("92.50%"), Some("92.50%".to_string()));
        assert_eq!(normalize_percent("Cycle Average 92.50"), Some("92.50%".to_string()));
        assert_eq!(normalize_percent(" 88 "), Some("88%".to_string()));
        assert_eq!(normalize_percent("N/A"), None);
    }

    #[test]
    fn test_find_class_average() {
        assert_eq!(
            find_class_average("Algebra I\nCycle Average 92.50%\nDate Due"),
            Some("92.50%".to_string())
        );
        assert_eq!(find_class_average("class average: 81%"), Some("81%".to_string()));
        assert_eq!(find_class_average("Quiz 1 90%"), None);
    }

    #[test]
    fn test_join_fields_skips_missing() {
        let joined = join_fields(&[
            ("Course", Some("Algebra I")),
            ("Class Grade", None),
            ("Assignment", Some("Quiz 1")),
            ("Score", Some("  ")),
        ]);
        assert_eq!(joined, "Course: Algebra I | Assignment: Quiz 1");
    }

    #[test]
    fn test_contains_any_keyword_ignores_case() {
        let keywords = ["homework", "%"];
        assert!(contains_any_keyword("HOMEWORK 3", &keywords));
        assert!(contains_any_keyword("85%", &keywords));
        assert!(!contains_any_keyword("Math 101", &keywords));
    }

    #[test]
    fn test_truncate_chars() {
        assert_eq!(truncate_chars("abcdef", 3), "abc");
        assert_eq!(truncate_chars("abc", 10), "abc");
        assert_eq!(truncate_chars("成绩报告", 2), "成绩");
    }

    #[test]
    fn test_clean_assignments_content() {
        let raw = "Timestamp: 2024-10-01 07:00:00\n\n  Course: Algebra I  \n\nQuiz 1\n";
        assert_eq!(clean_assignments_content(raw), "Course: Algebra I\nQuiz 1");
    }

    #[test]
    fn test_redact() {
        assert_eq!(redact("jdoe", true), "j***");
        assert_eq!(redact("jdoe", false), "jdoe");
        assert_eq!(redact("parent@example.com", true), "***@example.com");
        assert_eq!(redact("", true), "");
    }

    #[test]
    fn test_sanitize_filename() {
        assert_eq!(sanitize_filename("2024-10-01 07:00:00"), "2024-10-01_07_00_00");
    }
}
