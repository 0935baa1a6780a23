//! Event extraction from vendor alert mails.
//!
//! `extract` never fails: a body it cannot make sense of produces an event with absent
//! fields, which downstream classification treats as unknown.

pub mod body;
pub mod fields;
pub mod timestamp;

use mailparse::{MailHeaderMap, ParsedMail};
use regex::Regex;
use std::sync::OnceLock;

use crate::models::{normalize_sha256, CanonicalEvent, ExtractedMessage};

use body::{best_body, collapse_blank_runs, html_to_text, BodyKind};
use fields::KvStream;
use timestamp::normalize_timestamp;

fn device_phrase_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)произошло на устройстве\s+([A-Za-z0-9_.-]+)").expect("static regex")
    })
}

fn vendor_severity_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)произошло\s+(\w+)\s+событие").expect("static regex"))
}

fn quoted_event_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"(?i)событие\s+"([^"]+)""#).expect("static regex"))
}

fn sha256_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\b[a-fA-F0-9]{64}\b").expect("static regex"))
}

/// Header fields and decoded text of a message
struct Decoded {
    message_id: Option<String>,
    subject: Option<String>,
    sender: Option<String>,
    date: Option<chrono::DateTime<chrono::Utc>>,
    text: String,
}

fn header(mail: &ParsedMail<'_>, name: &str) -> Option<String> {
    mail.headers
        .get_first_value(name)
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn decode(raw: &[u8]) -> Decoded {
    match mailparse::parse_mail(raw) {
        Ok(mail) => {
            let date = header(&mail, "Date").and_then(|d| {
                mailparse::dateparse(&d)
                    .ok()
                    .and_then(|secs| chrono::DateTime::from_timestamp(secs, 0))
            });
            let text = match best_body(&mail) {
                Some((BodyKind::Html, html)) => html_to_text(&html),
                Some((BodyKind::Plain, plain)) => collapse_blank_runs(&plain),
                None => String::new(),
            };
            Decoded {
                message_id: header(&mail, "Message-Id"),
                subject: header(&mail, "Subject"),
                sender: header(&mail, "From"),
                date,
                text,
            }
        }
        Err(e) => {
            tracing::warn!("Unparseable message structure, treating as plain text: {}", e);
            Decoded {
                message_id: None,
                subject: None,
                sender: None,
                date: None,
                text: collapse_blank_runs(&String::from_utf8_lossy(raw)),
            }
        }
    }
}

/// Resolve the canonical event fields from a flattened body and the subject line
pub fn extract_event(text: &str, subject: Option<&str>) -> CanonicalEvent {
    let kv = KvStream::scan(text);

    // Severity usually sits in a sentence such as "Произошло Critical событие ..."
    let vendor_severity = [subject.unwrap_or(""), text]
        .iter()
        .find_map(|src| {
            vendor_severity_re()
                .captures(src)
                .map(|c| c[1].trim().to_string())
        })
        .or_else(|| kv.by_label(fields::SEVERITY_LABELS));

    // The phrase usually ends the sentence, so its period is not part of the name
    let device = kv.by_label(fields::DEVICE_LABELS).or_else(|| {
        device_phrase_re()
            .captures(text)
            .map(|c| c[1].trim().trim_end_matches('.').to_string())
            .filter(|d| !d.is_empty())
    });

    let names = kv.all_of(fields::NAME_LABELS);
    let (process_from_names, detection_from_names) = fields::split_process_and_detection(&names);

    let event_type = kv
        .first_of(fields::EVENT_TYPE_LABELS)
        .or_else(|| kv.by_label(fields::EVENT_TYPE_FALLBACK_LABELS))
        .or_else(|| {
            quoted_event_re()
                .captures(text)
                .map(|c| c[1].trim().to_string())
        });

    let sha256 = kv
        .by_label(fields::SHA256_LABELS)
        .map(|v| normalize_sha256(&v))
        .or_else(|| {
            sha256_re()
                .find(text)
                .map(|m| m.as_str().to_ascii_lowercase())
        });

    CanonicalEvent {
        vendor_severity,
        device,
        event_type,
        detection_name: detection_from_names.or_else(|| kv.by_label(fields::DETECTION_LABELS)),
        object_path: kv.first_of(fields::OBJECT_LABELS),
        process_name: process_from_names.or_else(|| kv.by_label(fields::PROCESS_LABELS)),
        sha256,
        user: kv.first_of(fields::USER_LABELS),
        result: kv.first_of(fields::RESULT_LABELS),
        event_time: kv
            .first_of(fields::TIME_LABELS)
            .and_then(|t| normalize_timestamp(&t)),
    }
}

/// Turn a raw message into headers, decoded text, canonical event and fingerprint
pub fn extract(uid: &str, raw: &[u8]) -> ExtractedMessage {
    let decoded = decode(raw);
    let mut event = extract_event(&decoded.text, decoded.subject.as_deref());
    if event.event_time.is_none() {
        event.event_time = decoded.date;
    }
    let fingerprint = event.fingerprint();

    ExtractedMessage {
        uid: uid.to_string(),
        message_id: decoded.message_id,
        subject: decoded.subject,
        sender: decoded.sender,
        date: decoded.date,
        raw_text: decoded.text,
        event,
        fingerprint,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    const HTML_ALERT: &str = "From: Kaspersky <cloud_noreply@kaspersky.com>\r\n\
Subject: =?utf-8?B?0J/RgNC+0LjQt9C+0YjQu9C+IENyaXRpY2FsINGB0L7QsdGL0YLQuNC1?=\r\n\
Message-Id: <abc@kaspersky.com>\r\n\
Date: Tue, 27 Jan 2026 07:20:00 +0000\r\n\
MIME-Version: 1.0\r\n\
Content-Type: multipart/alternative; boundary=\"B\"\r\n\
\r\n\
--B\r\n\
Content-Type: text/plain; charset=utf-8\r\n\
\r\n\
plain fallback\r\n\
--B\r\n\
Content-Type: text/html; charset=utf-8\r\n\
\r\n\
<html><style>p{}</style><body>\
<p>Событие \"Обнаружен вредоносный объект\" произошло на устройстве AVEVA-7950X</p>\
<table>\
<tr><td>Устройство: AVEVA-7950X</td></tr>\
<tr><td>Название: svchost.exe</td></tr>\
<tr><td>Объект: C:\\Windows\\Temp\\evil.exe</td></tr>\
<tr><td>Название: HEUR:Trojan.Win32.Agent.gen</td></tr>\
<tr><td>SHA256: ABCDEFABCDEFABCDEFABCDEFABCDEFABCDEFABCDEFABCDEFABCDEFABCDEFABCD</td></tr>\
<tr><td>Пользователь: CORP\\operator</td></tr>\
<tr><td>Описание результата: Удален</td></tr>\
<tr><td>Дата и время события: Tuesday, January 27, 2026 10:14:20 AM (GMT+03:00)</td></tr>\
</table></body></html>\r\n\
--B--\r\n";

    #[test]
    fn test_extract_structured_html_alert() {
        let out = extract("42", HTML_ALERT.as_bytes());
        let ev = &out.event;

        assert_eq!(out.uid, "42");
        assert_eq!(out.message_id.as_deref(), Some("<abc@kaspersky.com>"));
        assert_eq!(ev.vendor_severity.as_deref(), Some("Critical"));
        assert_eq!(ev.device.as_deref(), Some("AVEVA-7950X"));
        assert_eq!(ev.process_name.as_deref(), Some("svchost.exe"));
        assert_eq!(ev.detection_name.as_deref(), Some("HEUR:Trojan.Win32.Agent.gen"));
        assert_eq!(ev.object_path.as_deref(), Some("C:\\Windows\\Temp\\evil.exe"));
        assert_eq!(
            ev.sha256.as_deref(),
            Some("abcdefabcdefabcdefabcdefabcdefabcdefabcdefabcdefabcdefabcdefabcd")
        );
        assert_eq!(ev.user.as_deref(), Some("CORP\\operator"));
        assert_eq!(ev.result.as_deref(), Some("Удален"));
        assert_eq!(ev.event_type.as_deref(), Some("Обнаружен вредоносный объект"));
        assert_eq!(
            ev.event_time,
            Some(Utc.with_ymd_and_hms(2026, 1, 27, 7, 14, 20).unwrap())
        );
        assert_eq!(out.fingerprint, ev.fingerprint());
        assert!(!out.raw_text.contains("p{}"));
    }

    #[test]
    fn test_plain_text_fallbacks() {
        let raw = "From: vendor@test\r\n\
Subject: alert\r\n\
Date: Tue, 27 Jan 2026 07:20:00 +0000\r\n\
Content-Type: text/plain; charset=utf-8\r\n\
\r\n\
Событие \"Сетевая атака\" произошло на устройстве WS-01.\r\n\
Hash seen: 0123456789ABCDEF0123456789ABCDEF0123456789ABCDEF0123456789ABCDEF\r\n";
        let out = extract("7", raw.as_bytes());
        let ev = &out.event;

        assert_eq!(ev.device.as_deref(), Some("WS-01"));
        assert_eq!(ev.event_type.as_deref(), Some("Сетевая атака"));
        assert_eq!(
            ev.sha256.as_deref(),
            Some("0123456789abcdef0123456789abcdef0123456789abcdef0123456789abcdef")
        );
        // no event time in the body: header date is used
        assert_eq!(
            ev.event_time,
            Some(Utc.with_ymd_and_hms(2026, 1, 27, 7, 20, 0).unwrap())
        );
        assert_eq!(ev.vendor_severity, None);
    }

    #[test]
    fn test_garbage_never_fails() {
        let out = extract("x", &[0xff, 0xfe, 0x00, 0x41]);
        assert_eq!(out.uid, "x");
        assert_eq!(out.event.device, None);
        assert_eq!(out.fingerprint, CanonicalEvent::default().fingerprint());
    }

    #[test]
    fn test_english_labels() {
        let text = "Severity: High\nHost: SRV-DB\nEvent type: Ransomware activity\nThreat name: Trojan-Ransom.Win32.Foo\nResult: Blocked\nEvent time: 2026-01-27 10:00:00";
        let ev = extract_event(text, None);
        assert_eq!(ev.vendor_severity.as_deref(), Some("High"));
        assert_eq!(ev.device.as_deref(), Some("SRV-DB"));
        assert_eq!(ev.event_type.as_deref(), Some("Ransomware activity"));
        assert_eq!(ev.detection_name.as_deref(), Some("Trojan-Ransom.Win32.Foo"));
        assert_eq!(ev.result.as_deref(), Some("Blocked"));
        assert_eq!(
            ev.event_time,
            Some(Utc.with_ymd_and_hms(2026, 1, 27, 10, 0, 0).unwrap())
        );
    }
}
