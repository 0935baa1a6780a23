//! Message body selection and HTML flattening

use mailparse::ParsedMail;
use regex::Regex;
use std::sync::OnceLock;

/// Content type of the chosen body part
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyKind {
    Html,
    Plain,
}

/// Pick the first HTML part, else the first plain-text part, walking nested multiparts.
///
/// Returns `None` when the message carries neither.
pub fn best_body(mail: &ParsedMail<'_>) -> Option<(BodyKind, String)> {
    if mail.subparts.is_empty() {
        let kind = match mail.ctype.mimetype.to_lowercase().as_str() {
            "text/html" => BodyKind::Html,
            _ => BodyKind::Plain,
        };
        return mail.get_body().ok().map(|body| (kind, body));
    }

    let mut html = None;
    let mut plain = None;
    collect_text_parts(mail, &mut html, &mut plain);
    html.map(|p| (BodyKind::Html, p))
        .or_else(|| plain.map(|p| (BodyKind::Plain, p)))
}

fn collect_text_parts<'a>(
    part: &'a ParsedMail<'a>,
    html: &mut Option<String>,
    plain: &mut Option<String>,
) {
    match part.ctype.mimetype.to_lowercase().as_str() {
        "text/html" if html.is_none() => *html = part.get_body().ok(),
        "text/plain" if plain.is_none() => *plain = part.get_body().ok(),
        _ => {}
    }
    for sub in &part.subparts {
        collect_text_parts(sub, html, plain);
    }
}

fn script_style_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?is)<(script|style)\b[^>]*>.*?</(script|style)\s*>").expect("static regex")
    })
}

fn tag_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)<!--.*?-->|<[^>]*>").expect("static regex"))
}

fn entity_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"&(#[0-9]+|#[xX][0-9a-fA-F]+|[a-zA-Z]+);").expect("static regex"))
}

fn blank_run_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\n{3,}").expect("static regex"))
}

/// Flatten HTML to text: drop script/style blocks, turn every tag boundary into a line
/// break, decode entities, then collapse runs of three or more newlines.
pub fn html_to_text(html: &str) -> String {
    let without_scripts = script_style_re().replace_all(html, "");
    let flattened = tag_re().replace_all(&without_scripts, "\n");
    let decoded = decode_entities(&flattened);
    collapse_blank_runs(&decoded)
}

/// Normalize line endings and collapse blank-line runs; trims the result
pub fn collapse_blank_runs(text: &str) -> String {
    let unix = text.replace("\r\n", "\n").replace('\r', "\n");
    blank_run_re()
        .replace_all(&unix, "\n\n")
        .trim()
        .to_string()
}

fn decode_entities(text: &str) -> String {
    entity_re()
        .replace_all(text, |caps: &regex::Captures<'_>| {
            let name = &caps[1];
            let decoded = if let Some(hex) = name.strip_prefix("#x").or_else(|| name.strip_prefix("#X")) {
                u32::from_str_radix(hex, 16).ok().and_then(char::from_u32)
            } else if let Some(dec) = name.strip_prefix('#') {
                dec.parse::<u32>().ok().and_then(char::from_u32)
            } else {
                match name {
                    "nbsp" => Some(' '),
                    "amp" => Some('&'),
                    "lt" => Some('<'),
                    "gt" => Some('>'),
                    "quot" => Some('"'),
                    "apos" => Some('\''),
                    "laquo" => Some('«'),
                    "raquo" => Some('»'),
                    "mdash" => Some('—'),
                    "ndash" => Some('–'),
                    _ => None,
                }
            };
            match decoded {
                Some(c) => c.to_string(),
                None => caps[0].to_string(),
            }
        })
        .into_owned()
}
