//! Alert text rendering strategies

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Duration, SecondsFormat, Utc};

use crate::channels::{GenerationRequest, TextGenerator};
use crate::db::Database;
use crate::error::TransportError;
use crate::models::CanonicalEvent;
use crate::risk::Classification;
use crate::utils::{RetryError, RetryPolicy, Shutdown};

const CORRELATION_WINDOW_HOURS: i64 = 2;
const CORRELATION_LIMIT: i64 = 50;
const MAX_RELATED_DEVICES: usize = 10;

/// What a renderer is given
#[derive(Debug, Clone, Copy)]
pub struct RenderContext<'a> {
    pub event: &'a CanonicalEvent,
    pub classification: &'a Classification,
    pub repeat_count: u64,
}

/// Rendered alert plus enrichment metadata for the receipt
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rendered {
    pub text: String,
    pub ai_enabled: bool,
    pub model_used: Option<String>,
    pub fallback: Option<String>,
}

#[async_trait]
pub trait Renderer: Send + Sync {
    async fn render(&self, ctx: &RenderContext<'_>) -> Rendered;
}

/// Deterministic summary of a classified event
pub fn rules_summary(ctx: &RenderContext<'_>) -> String {
    let ev = ctx.event;
    let c = ctx.classification;
    let trimmed = |v: &Option<String>, default: &'static str| -> String {
        v.as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .unwrap_or(default)
            .to_string()
    };

    let mut lines = vec![format!(
        "{} | {} | {} | {}",
        c.level.icon(),
        c.level,
        trimmed(&ev.event_type, "Event"),
        trimmed(&ev.device, "unknown"),
    )];
    if let Some(class) = c.asset_class {
        lines.push(format!("Asset: {}", class));
    }
    if let Some(reason) = &c.reason {
        lines.push(format!("Reason: {}", reason));
    }
    if let Some(detection) = &ev.detection_name {
        lines.push(format!("Detection: {}", detection));
    }
    if let Some(object) = &ev.object_path {
        lines.push(format!("Object: `{}`", object));
    }
    if let Some(sha) = &ev.sha256 {
        lines.push(format!("SHA256: `{}`", sha));
    }
    if let Some(user) = &ev.user {
        lines.push(format!("User: {}", user));
    }
    if let Some(time) = ev.event_time {
        lines.push(format!(
            "Time(UTC): {}",
            time.to_rfc3339_opts(SecondsFormat::AutoSi, true)
        ));
    }
    if ctx.repeat_count > 1 {
        lines.push(format!("Repeats (dedup counter): {}", ctx.repeat_count));
    }
    lines.join("\n")
}

/// Rule-only rendering
#[derive(Debug, Clone, Copy, Default)]
pub struct RuleRenderer;

#[async_trait]
impl Renderer for RuleRenderer {
    async fn render(&self, ctx: &RenderContext<'_>) -> Rendered {
        Rendered {
            text: rules_summary(ctx),
            ai_enabled: false,
            model_used: None,
            fallback: None,
        }
    }
}

/// Text-generation rendering with rule-based fallback
pub struct LlmRenderer {
    generator: Arc<dyn TextGenerator>,
    db: Arc<Database>,
    policy: RetryPolicy,
    shutdown: Shutdown,
}

impl LlmRenderer {
    pub fn new(
        generator: Arc<dyn TextGenerator>,
        db: Arc<Database>,
        policy: RetryPolicy,
        shutdown: Shutdown,
    ) -> Self {
        Self {
            generator,
            db,
            policy,
            shutdown,
        }
    }

    /// Known servers and other devices that recently reported the same detection
    fn context(&self, event: &CanonicalEvent) -> (Vec<String>, Vec<String>) {
        let servers = self.db.list_servers().unwrap_or_else(|e| {
            tracing::warn!("Could not load server list for enrichment: {}", e);
            Vec::new()
        });

        let since = Utc::now() - Duration::hours(CORRELATION_WINDOW_HOURS);
        let own = event.device_name().unwrap_or("");
        let related = self
            .db
            .recent_devices_for_detection(event.detection_name.as_deref(), since, CORRELATION_LIMIT)
            .map(|devices| {
                devices
                    .into_iter()
                    .filter(|d| d != own)
                    .take(MAX_RELATED_DEVICES)
                    .collect()
            })
            .unwrap_or_else(|e| {
                tracing::warn!("Correlation lookup failed: {}", e);
                Vec::new()
            });
        (servers, related)
    }
}

#[async_trait]
impl Renderer for LlmRenderer {
    async fn render(&self, ctx: &RenderContext<'_>) -> Rendered {
        let model = self.generator.model().to_string();
        let (servers, related) = self.context(ctx.event);
        let request = GenerationRequest {
            event: ctx.event,
            asset_class: ctx.classification.asset_class,
            risk: ctx.classification.level,
            reason: ctx.classification.reason.as_deref(),
            repeat_count: ctx.repeat_count,
            known_servers: &servers,
            related_devices: &related,
        };

        let request = &request;
        let generator = self.generator.as_ref();
        let result = self
            .policy
            .retry(&self.shutdown, TransportError::is_transient, move || {
                generator.generate(request)
            })
            .await;

        match result {
            Ok(text) => Rendered {
                text: format!("AI: enabled | model={}\n\n{}", model, text),
                ai_enabled: true,
                model_used: Some(model),
                fallback: None,
            },
            Err(err) => {
                let err = match err {
                    RetryError::Failed { error, attempts } => {
                        tracing::warn!("Text generation failed after {} attempt(s): {}", attempts, error);
                        error
                    }
                    RetryError::Cancelled(error) => error,
                };
                let kind = err.kind().to_string();
                Rendered {
                    text: format!("{}\nLLM fallback: {}", rules_summary(ctx), kind),
                    ai_enabled: true,
                    model_used: Some(model),
                    fallback: Some(kind),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AssetClass, RiskLevel};
    use crate::testing::FakeGenerator;
    use chrono::TimeZone;
    use std::time::Duration as StdDuration;

    fn event() -> CanonicalEvent {
        CanonicalEvent {
            device: Some(" WS-7 ".into()),
            detection_name: Some("HEUR:Trojan.Win32.Agent".into()),
            object_path: Some("C:\\tmp\\a.exe".into()),
            sha256: Some("ab".repeat(32)),
            user: Some("CORP\\op".into()),
            event_time: Some(Utc.with_ymd_and_hms(2026, 1, 27, 7, 14, 20).unwrap()),
            ..Default::default()
        }
    }

    fn classification() -> Classification {
        Classification {
            level: RiskLevel::Medium,
            reason: None,
            asset_class: Some(AssetClass::Workstation),
        }
    }

    fn fast() -> RetryPolicy {
        RetryPolicy::new(3, StdDuration::from_millis(1), StdDuration::from_millis(2))
    }

    #[test]
    fn test_rules_summary_layout() {
        let ev = event();
        let c = classification();
        let text = rules_summary(&RenderContext {
            event: &ev,
            classification: &c,
            repeat_count: 3,
        });
        let expected = format!(
            "🟡 | MEDIUM | Event | WS-7\n\
             Asset: WORKSTATION\n\
             Detection: HEUR:Trojan.Win32.Agent\n\
             Object: `C:\\tmp\\a.exe`\n\
             SHA256: `{}`\n\
             User: CORP\\op\n\
             Time(UTC): 2026-01-27T07:14:20Z\n\
             Repeats (dedup counter): 3",
            "ab".repeat(32)
        );
        assert_eq!(text, expected);
    }

    #[test]
    fn test_single_sighting_has_no_repeat_line() {
        let ev = CanonicalEvent::default();
        let c = Classification {
            level: RiskLevel::Info,
            reason: None,
            asset_class: None,
        };
        let text = rules_summary(&RenderContext {
            event: &ev,
            classification: &c,
            repeat_count: 1,
        });
        assert_eq!(text, "🟢 | INFO | Event | unknown");
    }

    #[tokio::test]
    async fn test_llm_success_gets_header() {
        let db = Arc::new(Database::open(":memory:").unwrap());
        let generator = Arc::new(FakeGenerator::new(vec![Ok("analysis".to_string())]));
        let renderer = LlmRenderer::new(generator.clone(), db, fast(), Shutdown::never());

        let ev = event();
        let c = classification();
        let out = renderer
            .render(&RenderContext {
                event: &ev,
                classification: &c,
                repeat_count: 1,
            })
            .await;
        assert_eq!(out.text, "AI: enabled | model=fake-model\n\nanalysis");
        assert_eq!(out.model_used.as_deref(), Some("fake-model"));
        assert_eq!(out.fallback, None);
    }

    #[tokio::test]
    async fn test_transient_errors_retried_then_fallback() {
        let db = Arc::new(Database::open(":memory:").unwrap());
        let generator = Arc::new(FakeGenerator::new(vec![
            Err(TransportError::Transient("timeout".into())),
            Err(TransportError::Transient("timeout".into())),
            Err(TransportError::Transient("timeout".into())),
            Ok("late".into()),
        ]));
        let renderer = LlmRenderer::new(generator.clone(), db, fast(), Shutdown::never());

        let ev = event();
        let c = classification();
        let ctx = RenderContext {
            event: &ev,
            classification: &c,
            repeat_count: 1,
        };
        let out = renderer.render(&ctx).await;
        assert_eq!(generator.calls(), 3);
        assert_eq!(out.fallback.as_deref(), Some("TransientError"));
        assert_eq!(
            out.text,
            format!("{}\nLLM fallback: TransientError", rules_summary(&ctx))
        );
    }

    #[tokio::test]
    async fn test_permanent_error_falls_back_immediately() {
        let db = Arc::new(Database::open(":memory:").unwrap());
        let generator = Arc::new(FakeGenerator::new(vec![Err(TransportError::Permanent(
            "401".into(),
        ))]));
        let renderer = LlmRenderer::new(generator.clone(), db, fast(), Shutdown::never());

        let ev = event();
        let c = classification();
        let out = renderer
            .render(&RenderContext {
                event: &ev,
                classification: &c,
                repeat_count: 1,
            })
            .await;
        assert_eq!(generator.calls(), 1);
        assert_eq!(out.fallback.as_deref(), Some("PermanentError"));
    }
}
