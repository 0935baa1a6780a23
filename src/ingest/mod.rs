//! Polling loop driving extraction, dedup, classification and dispatch

use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use tracing::Instrument;

use crate::channels::MailSource;
use crate::db::Database;
use crate::dedup::DedupEngine;
use crate::dispatch::{DispatchOutcome, RenderContext, Renderer, Router};
use crate::error::TransportError;
use crate::extract;
use crate::models::{CanonicalEvent, RawMessage};
use crate::risk;
use crate::utils::{RetryError, RetryPolicy, Shutdown};

/// Lower bound for the polling interval
pub const MIN_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Which messages a cycle fetches
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum FetchMode {
    /// Only messages not yet acknowledged
    Unseen,
    /// The most recent messages regardless of acknowledgment
    Latest,
}

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub sender_filter: String,
    pub fetch_limit: usize,
    pub poll_interval: Duration,
    pub mark_processed: bool,
    pub source_retry: RetryPolicy,
}

/// What happened to one fetched message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageOutcome {
    /// Dedup decided not to alert; nothing sent
    Suppressed,
    Dispatched(DispatchOutcome),
    /// Already delivered earlier; stored text re-sent to any new eligible address
    Replayed(DispatchOutcome),
}

impl MessageOutcome {
    pub fn acknowledgeable(&self) -> bool {
        match self {
            Self::Suppressed => true,
            Self::Dispatched(o) | Self::Replayed(o) => o.acknowledgeable(),
        }
    }
}

/// Summary of one polling cycle
#[derive(Debug, Clone, Default)]
pub struct CycleReport {
    pub fetched: usize,
    pub acknowledged: usize,
    pub outcomes: Vec<(String, MessageOutcome)>,
}

pub struct Pipeline {
    db: Arc<Database>,
    source: Arc<dyn MailSource>,
    dedup: DedupEngine,
    renderer: Arc<dyn Renderer>,
    router: Router,
    config: PipelineConfig,
    shutdown: Shutdown,
}

impl Pipeline {
    pub fn new(
        db: Arc<Database>,
        source: Arc<dyn MailSource>,
        dedup: DedupEngine,
        renderer: Arc<dyn Renderer>,
        router: Router,
        config: PipelineConfig,
        shutdown: Shutdown,
    ) -> Self {
        Self {
            db,
            source,
            dedup,
            renderer,
            router,
            config,
            shutdown,
        }
    }

    /// Poll until shutdown. A failed cycle is logged and the next tick proceeds as usual.
    pub async fn run(&self) {
        let interval = self.config.poll_interval.max(MIN_POLL_INTERVAL);
        tracing::info!(
            "Ingestion loop started (interval {:?}, limit {})",
            interval,
            self.config.fetch_limit
        );

        while !self.shutdown.is_triggered() {
            if let Err(e) = self.run_cycle(FetchMode::Unseen, self.config.fetch_limit).await {
                tracing::error!("Cycle failed: {:#}", e);
            }
            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                _ = self.shutdown.triggered() => break,
            }
        }
        tracing::info!("Ingestion loop stopped");
    }

    /// Fetch one batch, process it in source order, then acknowledge eligible messages together
    pub async fn run_cycle(&self, mode: FetchMode, limit: usize) -> Result<CycleReport> {
        let cycle_id = uuid::Uuid::new_v4();
        let span = tracing::info_span!("cycle", id = %cycle_id, mode = ?mode);
        self.cycle(mode, limit).instrument(span).await
    }

    async fn cycle(&self, mode: FetchMode, limit: usize) -> Result<CycleReport> {
        let messages = self.fetch(mode, limit).await?;
        let mut report = CycleReport {
            fetched: messages.len(),
            ..Default::default()
        };
        if messages.is_empty() {
            tracing::debug!("No new messages");
            return Ok(report);
        }

        let mut to_ack = Vec::new();
        let mut failure = None;
        for raw in &messages {
            match self.process_message(raw, Utc::now()).await {
                Ok(outcome) => {
                    if outcome.acknowledgeable() {
                        to_ack.push(raw.uid.clone());
                    }
                    report.outcomes.push((raw.uid.clone(), outcome));
                }
                Err(e) => {
                    // Store trouble: stop here, the rest is picked up next tick
                    failure = Some(e.context(format!("processing uid {}", raw.uid)));
                    break;
                }
            }
        }

        report.acknowledged = self.acknowledge(&to_ack).await;
        tracing::info!(
            "Cycle done: fetched={} processed={} acknowledged={}",
            report.fetched,
            report.outcomes.len(),
            report.acknowledged
        );

        match failure {
            Some(e) => Err(e),
            None => Ok(report),
        }
    }

    async fn fetch(&self, mode: FetchMode, limit: usize) -> Result<Vec<RawMessage>> {
        let source = self.source.as_ref();
        let sender = self.config.sender_filter.as_str();
        let fetched = self
            .config
            .source_retry
            .retry(&self.shutdown, TransportError::is_transient, move || async move {
                match mode {
                    FetchMode::Unseen => source.fetch_unseen(sender, limit).await,
                    FetchMode::Latest => source.fetch_latest(sender, limit).await,
                }
            })
            .await;

        fetched.map_err(|e| match e {
            RetryError::Failed { error, attempts } => {
                anyhow!("mail fetch failed after {} attempt(s): {}", attempts, error)
            }
            RetryError::Cancelled(error) => anyhow!("mail fetch cancelled: {}", error),
        })
    }

    async fn acknowledge(&self, uids: &[String]) -> usize {
        if uids.is_empty() || !self.config.mark_processed {
            return 0;
        }
        let source = self.source.as_ref();
        let result = self
            .config
            .source_retry
            .retry(&self.shutdown, TransportError::is_transient, move || {
                source.acknowledge(uids)
            })
            .await;
        match result {
            Ok(n) => n,
            Err(e) => {
                // Unacknowledged messages come back next cycle and take the replay path
                tracing::warn!("Acknowledge of {} message(s) failed: {}", uids.len(), e.into_inner());
                0
            }
        }
    }

    /// Run one message through the pipeline.
    ///
    /// A UID seen before is never extracted again: it is replayed from its stored receipt, or,
    /// when no admin has received it yet, dispatched again from its stored event and dedup decision.
    pub async fn process_message(
        &self,
        raw: &RawMessage,
        now: DateTime<Utc>,
    ) -> Result<MessageOutcome> {
        if let Some(stored) = self.db.find_message(&raw.uid)? {
            let event = self
                .db
                .event_for_message(stored.id)?
                .ok_or_else(|| anyhow!("message {} has no event row", stored.id))?;

            if let Some(outcome) = self
                .router
                .replay(stored.id, event.event.device_name())
                .await?
            {
                return Ok(MessageOutcome::Replayed(outcome));
            }

            let decision = match event.decision {
                Some(d) => d,
                None => self
                    .dedup
                    .decide(&event.fingerprint, stored.id, event.id, now)?,
            };
            if !decision.should_alert {
                return Ok(MessageOutcome::Suppressed);
            }
            tracing::info!("Retrying delivery for uid={} (no successful receipt)", raw.uid);
            return self
                .alert(stored.id, &event.event, decision.count)
                .await
                .map(MessageOutcome::Dispatched);
        }

        let extracted = extract::extract(&raw.uid, &raw.body);
        let ids = self.db.insert_message_with_event(&extracted, now)?;
        if let Some(device) = extracted.event.device_name() {
            self.db.ensure_asset(device)?;
        }

        let decision = self
            .dedup
            .decide(&extracted.fingerprint, ids.message_ref, ids.event_ref, now)?;
        tracing::info!(
            "Dedup: uid={} alert={} repeats={} fingerprint={}...",
            raw.uid,
            decision.should_alert,
            decision.count,
            &extracted.fingerprint[..12]
        );
        if !decision.should_alert {
            return Ok(MessageOutcome::Suppressed);
        }

        self.alert(ids.message_ref, &extracted.event, decision.count)
            .await
            .map(MessageOutcome::Dispatched)
    }

    async fn alert(
        &self,
        message_ref: i64,
        event: &CanonicalEvent,
        repeat_count: u64,
    ) -> Result<DispatchOutcome> {
        let device = event.device_name();
        let asset_class = match device {
            Some(d) => self.db.ensure_asset(d)?,
            None => None,
        };
        let classification = risk::classify(event, asset_class);
        let rendered = self
            .renderer
            .render(&RenderContext {
                event,
                classification: &classification,
                repeat_count,
            })
            .await;

        self.router
            .dispatch(message_ref, device, classification.level, &rendered)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::RuleRenderer;
    use crate::models::{AssetClass, RiskLevel};
    use crate::testing::{FakeChannel, FakeMailSource};
    use crate::utils::ShutdownTrigger;

    const ADMIN: &str = "100";

    struct Harness {
        db: Arc<Database>,
        source: Arc<FakeMailSource>,
        channel: Arc<FakeChannel>,
        pipeline: Pipeline,
        _trigger: ShutdownTrigger,
    }

    fn harness() -> Harness {
        let (trigger, shutdown) = Shutdown::new();
        let db = Arc::new(Database::open(":memory:").unwrap());
        let source = Arc::new(FakeMailSource::default());
        let channel = Arc::new(FakeChannel::default());
        let fast = RetryPolicy::new(2, Duration::from_millis(1), Duration::from_millis(2));

        let router = Router::new(
            db.clone(),
            channel.clone(),
            vec![ADMIN.to_string()],
            fast,
            shutdown.clone(),
        );
        let pipeline = Pipeline::new(
            db.clone(),
            source.clone(),
            DedupEngine::new(db.clone(), 600, 3),
            Arc::new(RuleRenderer),
            router,
            PipelineConfig {
                sender_filter: "cloud_noreply@kaspersky.com".to_string(),
                fetch_limit: 50,
                poll_interval: Duration::from_secs(60),
                mark_processed: true,
                source_retry: fast,
            },
            shutdown,
        );
        Harness {
            db,
            source,
            channel,
            pipeline,
            _trigger: trigger,
        }
    }

    fn mail(device: &str, severity: &str, detection: &str) -> String {
        format!(
            "From: cloud_noreply@kaspersky.com\r\n\
             Subject: alert\r\n\
             Content-Type: text/plain; charset=utf-8\r\n\
             \r\n\
             Device: {}\r\n\
             Severity: {}\r\n\
             Detection name: {}\r\n",
            device, severity, detection
        )
    }

    fn event_rows(db: &Database) -> i64 {
        db.conn()
            .unwrap()
            .query_row("SELECT COUNT(*) FROM events", [], |r| r.get(0))
            .unwrap()
    }

    fn outcome<'a>(report: &'a CycleReport, uid: &str) -> &'a MessageOutcome {
        &report.outcomes.iter().find(|(u, _)| u == uid).unwrap().1
    }

    #[tokio::test]
    async fn test_new_message_dispatched_and_acknowledged() {
        let h = harness();
        h.source.push("1", &mail("WS-1", "Medium", "Generic.Suspicious"));

        let report = h.pipeline.run_cycle(FetchMode::Unseen, 10).await.unwrap();
        assert_eq!(report.fetched, 1);
        assert_eq!(report.acknowledged, 1);
        assert!(matches!(outcome(&report, "1"), MessageOutcome::Dispatched(_)));

        let sent = h.channel.sent_to(ADMIN);
        assert_eq!(sent.len(), 1);
        // new host is auto-registered, medium on unclassified escalates
        assert!(sent[0].text.starts_with("🔴 | HIGH | Event | WS-1"));
        assert_eq!(
            h.db.asset_by_hostname("WS-1").unwrap().unwrap().class,
            AssetClass::Unclassified
        );
        assert!(h.source.acked().contains("1"));
    }

    #[tokio::test]
    async fn test_duplicate_uid_replays_without_reprocessing() {
        let h = harness();
        h.source.push("1", &mail("WS-1", "Low", "Generic"));
        h.pipeline.run_cycle(FetchMode::Unseen, 10).await.unwrap();
        let fp = h
            .db
            .event_for_message(h.db.find_message("1").unwrap().unwrap().id)
            .unwrap()
            .unwrap()
            .fingerprint;

        let report = h.pipeline.run_cycle(FetchMode::Latest, 10).await.unwrap();
        assert!(matches!(outcome(&report, "1"), MessageOutcome::Replayed(_)));
        assert_eq!(h.channel.sent().len(), 1);
        assert_eq!(event_rows(&h.db), 1);
        // dedup state untouched by the replay
        assert_eq!(h.db.dedup_record(&fp).unwrap().unwrap().count, 1);
    }

    #[tokio::test]
    async fn test_failed_admin_delivery_is_retried_next_cycle() {
        let h = harness();
        h.source.push("1", &mail("WS-1", "High", "Generic"));
        h.channel.fail_permanently(ADMIN);

        let report = h.pipeline.run_cycle(FetchMode::Unseen, 10).await.unwrap();
        assert_eq!(report.acknowledged, 0);
        assert!(!h.source.acked().contains("1"));

        h.channel.heal(ADMIN);
        let report = h.pipeline.run_cycle(FetchMode::Unseen, 10).await.unwrap();
        match outcome(&report, "1") {
            MessageOutcome::Dispatched(o) => assert_eq!(o.admin_sent, 1),
            other => panic!("expected a fresh dispatch, got {:?}", other),
        }
        assert!(h.source.acked().contains("1"));
        assert_eq!(h.channel.sent_to(ADMIN).len(), 1);
        assert_eq!(event_rows(&h.db), 1);

        let ev = h
            .db
            .event_for_message(h.db.find_message("1").unwrap().unwrap().id)
            .unwrap()
            .unwrap();
        assert_eq!(h.db.dedup_record(&ev.fingerprint).unwrap().unwrap().count, 1);
    }

    #[tokio::test]
    async fn test_owner_waits_until_an_admin_has_the_alert() {
        let h = harness();
        let asset = h.db.upsert_asset("SRV-1", AssetClass::Server).unwrap().unwrap();
        h.db.upsert_recipient(asset.id, "300", None, RiskLevel::Info, true)
            .unwrap();
        h.channel.fail_permanently(ADMIN);
        h.source.push("1", &mail("SRV-1", "High", "Generic"));

        for _ in 0..2 {
            let report = h.pipeline.run_cycle(FetchMode::Unseen, 10).await.unwrap();
            match outcome(&report, "1") {
                MessageOutcome::Dispatched(o) => {
                    assert_eq!(o.admin_failed, 1);
                    assert_eq!(o.owner_sent + o.owner_already, 0);
                }
                other => panic!("expected a dispatch attempt, got {:?}", other),
            }
            assert_eq!(report.acknowledged, 0);
        }
        assert!(h.source.acked().is_empty());
        assert!(h.channel.sent().is_empty());

        h.channel.heal(ADMIN);
        let report = h.pipeline.run_cycle(FetchMode::Unseen, 10).await.unwrap();
        assert_eq!(report.acknowledged, 1);
        assert_eq!(h.channel.sent_to(ADMIN).len(), 1);
        assert_eq!(h.channel.sent_to("300").len(), 1);

        // already delivered everywhere: a re-fetch sends nothing more
        h.pipeline.run_cycle(FetchMode::Latest, 10).await.unwrap();
        assert_eq!(h.channel.sent_to("300").len(), 1);
        assert_eq!(h.channel.sent_to(ADMIN).len(), 1);
    }

    #[tokio::test]
    async fn test_suppressed_repeats_are_acknowledged_without_sending() {
        let h = harness();
        let body = mail("WS-1", "Low", "Generic");
        h.source.push("1", &body);
        h.source.push("2", &body);

        let report = h.pipeline.run_cycle(FetchMode::Unseen, 10).await.unwrap();
        assert!(matches!(outcome(&report, "2"), MessageOutcome::Suppressed));
        assert_eq!(report.acknowledged, 2);
        assert_eq!(h.channel.sent().len(), 1);

        let report = h.pipeline.run_cycle(FetchMode::Latest, 10).await.unwrap();
        assert!(matches!(outcome(&report, "1"), MessageOutcome::Replayed(_)));
        assert!(matches!(outcome(&report, "2"), MessageOutcome::Suppressed));
        assert_eq!(h.channel.sent().len(), 1);
    }

    #[tokio::test]
    async fn test_owner_threshold_and_late_binding_replay() {
        let h = harness();
        let asset = h.db.upsert_asset("SRV-1", AssetClass::Server).unwrap().unwrap();
        h.db.upsert_recipient(asset.id, "300", None, RiskLevel::Critical, true)
            .unwrap();
        h.db.upsert_recipient(asset.id, ADMIN, None, RiskLevel::Info, true)
            .unwrap();
        h.source.push("1", &mail("SRV-1", "Medium", "Generic"));

        h.pipeline.run_cycle(FetchMode::Unseen, 10).await.unwrap();
        // HIGH is below the owner's CRITICAL threshold; admin binding does not double-send
        assert!(h.channel.sent_to("300").is_empty());
        assert_eq!(h.channel.sent_to(ADMIN).len(), 1);
        let original = h.channel.sent_to(ADMIN)[0].text.clone();

        h.db.upsert_recipient(asset.id, "400", None, RiskLevel::High, true)
            .unwrap();
        h.pipeline.run_cycle(FetchMode::Latest, 10).await.unwrap();

        let late = h.channel.sent_to("400");
        assert_eq!(late.len(), 1);
        assert_eq!(late[0].text, original);
        assert_eq!(late[0].options.details_ref, None);
        assert!(h.channel.sent_to("300").is_empty());
    }

    #[tokio::test]
    async fn test_transient_fetch_failure_is_retried() {
        let h = harness();
        h.source.push("1", &mail("WS-1", "Low", "Generic"));
        h.source.fail_fetches(1);

        let report = h.pipeline.run_cycle(FetchMode::Unseen, 10).await.unwrap();
        assert_eq!(report.fetched, 1);
        assert_eq!(h.source.fetches(), 2);
    }

    #[tokio::test]
    async fn test_exhausted_fetch_fails_the_cycle() {
        let h = harness();
        h.source.fail_fetches(10);
        assert!(h.pipeline.run_cycle(FetchMode::Unseen, 10).await.is_err());
        assert!(h.channel.sent().is_empty());
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let h = harness();
        let Harness {
            pipeline,
            _trigger: trigger,
            ..
        } = h;
        let pipeline = Arc::new(pipeline);

        let runner = pipeline.clone();
        let handle = tokio::spawn(async move { runner.run().await });
        tokio::time::sleep(Duration::from_millis(20)).await;
        trigger.trigger();

        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
