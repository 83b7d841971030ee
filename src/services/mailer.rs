use chrono::{Local, NaiveDate};
use lettre::message::Mailbox;
use lettre::message::header::ContentType;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use tracing::{debug, info};

use crate::app::config::{MailSettings, SmtpSecurity};
use crate::core::GradeError;
use crate::utils::text::redact;

pub fn build_subject(student_name: &str, date: NaiveDate) -> String {
    format!("{}'s Grades/Assignments - {}", student_name, date.format("%m/%d/%Y"))
}

fn parse_mailbox(address: &str) -> Result<Mailbox, GradeError> {
    address
        .parse()
        .map_err(|e| GradeError::Mail(format!("无效的邮箱地址 {}: {}", address, e)))
}

/// 组装 HTML 邮件，发件人一个、收件人可多个
pub fn build_message(settings: &MailSettings, html_body: &str, date: NaiveDate) -> Result<Message, GradeError> {
    let sender = settings
        .sender
        .as_deref()
        .ok_or(GradeError::MissingConfig("GMAIL_SENDER"))?;
    if settings.receivers.is_empty() {
        return Err(GradeError::MissingConfig("GMAIL_RECEIVERS"));
    }

    let mut builder = Message::builder()
        .from(parse_mailbox(sender)?)
        .subject(build_subject(&settings.student_name, date))
        .header(ContentType::TEXT_HTML);
    for receiver in &settings.receivers {
        builder = builder.to(parse_mailbox(receiver)?);
    }

    builder
        .body(html_body.to_string())
        .map_err(|e| GradeError::Mail(e.to_string()))
}

/// 通过 SMTP（隐式 TLS）发送分析报告
pub async fn send_report(settings: &MailSettings, html_body: &str, redact_logs: bool) -> Result<(), GradeError> {
    let email = build_message(settings, html_body, Local::now().date_naive())?;
    let sender = settings
        .sender
        .clone()
        .ok_or(GradeError::MissingConfig("GMAIL_SENDER"))?;
    let password = settings
        .password
        .clone()
        .ok_or(GradeError::MissingConfig("GMAIL_APP_PASSWORD"))?;

    let builder = match settings.security() {
        SmtpSecurity::ImplicitTls => AsyncSmtpTransport::<Tokio1Executor>::relay(&settings.smtp_host),
        SmtpSecurity::StartTls => AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&settings.smtp_host),
    };
    debug!("SMTP {}:{} ({:?})", settings.smtp_host, settings.smtp_port, settings.security());
    let mailer = builder
        .map_err(|e| GradeError::Mail(e.to_string()))?
        .port(settings.smtp_port)
        .credentials(Credentials::new(sender.clone(), password))
        .build();

    mailer
        .send(email)
        .await
        .map_err(|e| GradeError::Mail(e.to_string()))?;

    info!(
        "✅ 邮件已由 {} 发送给 {} 位收件人",
        redact(&sender, redact_logs),
        settings.receivers.len()
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::AppConfig;

    fn settings() -> MailSettings {
        let mut mail = AppConfig::default().mail;
        mail.sender = Some("parent@gmail.com".to_string());
        mail.password = Some("app-password".to_string());
        mail.receivers = vec!["a@example.com".to_string(), "b@example.com".to_string()];
        mail.student_name = "Naina".to_string();
        mail
    }

    #[test]
    fn test_subject_format() {
        let date = NaiveDate::from_ymd_opt(2024, 10, 1).unwrap();
        assert_eq!(build_subject("Naina", date), "Naina's Grades/Assignments - 10/01/2024");
    }

    #[test]
    fn test_message_has_all_recipients() {
        let date = NaiveDate::from_ymd_opt(2024, 10, 1).unwrap();
        let message = build_message(&settings(), "<h1>Report</h1>", date).unwrap();
        assert_eq!(message.envelope().to().len(), 2);

        let raw = String::from_utf8(message.formatted()).unwrap();
        assert!(raw.contains("Subject: Naina's Grades/Assignments - 10/01/2024"));
        assert!(raw.contains("text/html"));
    }

    #[test]
    fn test_message_requires_receivers() {
        let mut mail = settings();
        mail.receivers.clear();
        let err = build_message(&mail, "body", NaiveDate::from_ymd_opt(2024, 1, 1).unwrap()).unwrap_err();
        assert!(matches!(err, GradeError::MissingConfig("GMAIL_RECEIVERS")));
    }

    #[test]
    fn test_invalid_address_is_mail_error() {
        let mut mail = settings();
        mail.receivers = vec!["not-an-address".to_string()];
        let err = build_message(&mail, "body", NaiveDate::from_ymd_opt(2024, 1, 1).unwrap()).unwrap_err();
        assert!(matches!(err, GradeError::Mail(_)));
    }
}
