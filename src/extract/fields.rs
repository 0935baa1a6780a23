//! Label/value scanning and field resolution

use regex::Regex;
use std::sync::OnceLock;

// Label synonyms per field, in probe order. Vendor mails come in English and Russian.
pub const SEVERITY_LABELS: &[&str] = &["severity", "vendor severity", "уровень опасности"];
pub const DEVICE_LABELS: &[&str] = &["device", "computer", "host", "hostname", "устройство"];
pub const EVENT_TYPE_LABELS: &[&str] = &["тип события", "event type", "event", "тип"];
pub const EVENT_TYPE_FALLBACK_LABELS: &[&str] = &["event type", "тип события"];
pub const NAME_LABELS: &[&str] = &["название", "name"];
pub const DETECTION_LABELS: &[&str] = &[
    "detection name",
    "threat name",
    "malware name",
    "название угрозы",
];
pub const OBJECT_LABELS: &[&str] = &["объект", "object", "object path", "file", "path"];
pub const PROCESS_LABELS: &[&str] = &["process", "process name", "процесс"];
pub const SHA256_LABELS: &[&str] = &["sha256", "sha-256", "hash", "хеш"];
pub const USER_LABELS: &[&str] = &["пользователь", "user", "account"];
pub const RESULT_LABELS: &[&str] = &[
    "описание результата",
    "result",
    "action",
    "status",
    "результат",
];
pub const TIME_LABELS: &[&str] = &[
    "дата и время события",
    "event time",
    "time",
    "date",
    "дата/время",
    "время события",
];

const SIGNATURE_PREFIXES: &[&str] = &[
    "heur:",
    "trojan.",
    "trojan:",
    "not-a-virus:",
    "virus.",
    "worm.",
    "exploit.",
];

fn kv_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\s*([^:\n]{2,80})\s*:\s*(.*?)\s*$").expect("static regex"))
}

fn executable_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\.(exe|dll|sys|bat|ps1)\b").expect("static regex"))
}

fn binary_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\.(exe|dll|sys)\b").expect("static regex"))
}

/// Ordered `key: value` pairs of a text body.
///
/// Keys are trimmed and lower-cased. Order and duplicates are preserved because the same
/// label can carry different meanings at different positions.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KvStream {
    pairs: Vec<(String, String)>,
}

impl KvStream {
    pub fn scan(text: &str) -> Self {
        let pairs = text
            .lines()
            .filter_map(|line| {
                let caps = kv_re().captures(line)?;
                let key = caps[1].trim().to_lowercase();
                let value = caps[2].trim().to_string();
                if key.is_empty() || value.is_empty() {
                    None
                } else {
                    Some((key, value))
                }
            })
            .collect();
        Self { pairs }
    }

    pub fn pairs(&self) -> &[(String, String)] {
        &self.pairs
    }

    /// Value of the first pair, in stream order, whose key is any of `labels`
    pub fn first_of(&self, labels: &[&str]) -> Option<String> {
        self.pairs
            .iter()
            .find(|(k, _)| labels.contains(&k.as_str()))
            .map(|(_, v)| v.clone())
    }

    /// Probe `labels` in priority order, taking each label's first occurrence
    pub fn by_label(&self, labels: &[&str]) -> Option<String> {
        labels.iter().find_map(|label| {
            self.pairs
                .iter()
                .find(|(k, _)| k == label)
                .map(|(_, v)| v.clone())
        })
    }

    /// Every value whose key is any of `labels`, in stream order
    pub fn all_of(&self, labels: &[&str]) -> Vec<String> {
        self.pairs
            .iter()
            .filter(|(k, _)| labels.contains(&k.as_str()))
            .map(|(_, v)| v.clone())
            .collect()
    }
}

/// Split same-labeled "name" values into (process name, detection name).
///
/// Executable/script extensions mark the process; known signature prefixes, or a colon in a
/// value that is not a binary, mark the detection.
pub fn split_process_and_detection(names: &[String]) -> (Option<String>, Option<String>) {
    let process = names
        .iter()
        .map(|n| n.trim())
        .find(|n| executable_re().is_match(&n.to_lowercase()))
        .map(str::to_string);

    let mut detection = names
        .iter()
        .map(|n| n.trim())
        .find(|n| {
            let low = n.to_lowercase();
            SIGNATURE_PREFIXES.iter().any(|p| low.starts_with(p))
                || (n.contains(':') && !binary_re().is_match(&low))
        })
        .map(str::to_string);

    if detection.is_none() && process.is_none() {
        detection = names.last().map(|n| n.trim().to_string());
    }

    if detection.is_none() {
        detection = names
            .iter()
            .rev()
            .find(|n| !binary_re().is_match(&n.to_lowercase()))
            .map(|n| n.trim().to_string());
    }

    (process, detection)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(values: &[&str]) -> Vec<String> {
        values.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_scan_preserves_order_and_duplicates() {
        let text = "Название: svchost.exe\nignored line\nНазвание: HEUR:Trojan.Win32.Agent\n  Пользователь :  CORP\\ivan  \nEmpty:\n";
        let kv = KvStream::scan(text);
        assert_eq!(
            kv.pairs(),
            &[
                ("название".to_string(), "svchost.exe".to_string()),
                ("название".to_string(), "HEUR:Trojan.Win32.Agent".to_string()),
                ("пользователь".to_string(), "CORP\\ivan".to_string()),
            ]
        );
        assert_eq!(kv.all_of(NAME_LABELS).len(), 2);
    }

    #[test]
    fn test_first_of_vs_by_label() {
        let kv = KvStream::scan("Host: from-host\nDevice: from-device\n");
        // stream order
        assert_eq!(kv.first_of(DEVICE_LABELS).as_deref(), Some("from-host"));
        // label priority
        assert_eq!(kv.by_label(DEVICE_LABELS).as_deref(), Some("from-device"));
        assert_eq!(kv.by_label(SHA256_LABELS), None);
    }

    #[test]
    fn test_value_may_contain_colons() {
        let kv = KvStream::scan("Object: C:\\Users\\a\\evil.exe");
        assert_eq!(kv.first_of(OBJECT_LABELS).as_deref(), Some("C:\\Users\\a\\evil.exe"));
    }

    #[test]
    fn test_split_process_then_detection() {
        let (p, d) = split_process_and_detection(&names(&["svchost.exe", "HEUR:Trojan.Win32.Agent"]));
        assert_eq!(p.as_deref(), Some("svchost.exe"));
        assert_eq!(d.as_deref(), Some("HEUR:Trojan.Win32.Agent"));
    }

    #[test]
    fn test_split_detection_first() {
        let (p, d) = split_process_and_detection(&names(&["not-a-virus:RiskTool.Miner", "powershell.ps1"]));
        assert_eq!(p.as_deref(), Some("powershell.ps1"));
        assert_eq!(d.as_deref(), Some("not-a-virus:RiskTool.Miner"));
    }

    #[test]
    fn test_single_plain_name_is_detection() {
        let (p, d) = split_process_and_detection(&names(&["Suspicious activity"]));
        assert_eq!(p, None);
        assert_eq!(d.as_deref(), Some("Suspicious activity"));
    }

    #[test]
    fn test_only_executable_gives_no_detection() {
        let (p, d) = split_process_and_detection(&names(&["cmd.exe"]));
        assert_eq!(p.as_deref(), Some("cmd.exe"));
        assert_eq!(d, None);
    }

    #[test]
    fn test_script_name_with_non_signature_falls_back() {
        let (p, d) = split_process_and_detection(&names(&["run.bat", "Generic Detection"]));
        assert_eq!(p.as_deref(), Some("run.bat"));
        assert_eq!(d.as_deref(), Some("Generic Detection"));
    }

    #[test]
    fn test_empty_names() {
        assert_eq!(split_process_and_detection(&[]), (None, None));
    }
}
