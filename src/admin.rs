//! Operator tooling over the store: host classification, owner bindings, delivery history

use std::io::Write;

use anyhow::{anyhow, bail, Result};
use chrono::{DateTime, Duration, Utc};
use clap::{Subcommand, ValueEnum};

use crate::db::Database;
use crate::models::{Asset, AssetClass, InteractionKind, RiskLevel};

/// How long a started bind waits for the operator's follow-up
pub const BIND_TTL_MINUTES: i64 = 10;

/// Longest history lookback, ten years
pub const MAX_HISTORY_HOURS: i64 = 24 * 365 * 10;

/// Classes an operator may assign; hosts only start out unclassified
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ClassArg {
    Server,
    Workstation,
}

impl From<ClassArg> for AssetClass {
    fn from(c: ClassArg) -> Self {
        match c {
            ClassArg::Server => AssetClass::Server,
            ClassArg::Workstation => AssetClass::Workstation,
        }
    }
}

fn parse_risk(s: &str) -> Result<RiskLevel, String> {
    RiskLevel::parse(s).ok_or_else(|| format!("unknown risk level '{}'", s))
}

#[derive(Debug, Clone, Subcommand)]
pub enum AdminCommand {
    /// List hosts, unclassified first
    Assets,

    /// Set a host's classification
    Classify {
        host: String,
        #[arg(value_enum)]
        class: ClassArg,
    },

    /// Delete a host and its owner bindings
    RemoveAsset { host: String },

    /// Bind an owner address to a host
    Bind {
        host: String,
        address: String,
        #[arg(long, default_value = "MEDIUM", value_parser = parse_risk)]
        min_risk: RiskLevel,
        #[arg(long)]
        operator: Option<String>,
    },

    /// Remove an owner binding
    Unbind { host: String, address: String },

    /// Owner bindings of a host
    Recipients { host: String },

    /// Delivered alerts for a host
    History {
        host: String,
        #[arg(long, default_value_t = 24)]
        hours: i64,
        #[arg(long, default_value_t = 10)]
        limit: i64,
        #[arg(long, default_value_t = 0)]
        offset: i64,
    },

    /// Print a stored delivery with its exact text
    ShowReceipt { id: i64 },

    /// Start a two-step bind: the operator's next address goes to this host
    BeginBind {
        #[arg(long)]
        operator: String,
        host: String,
        #[arg(long, default_value = "MEDIUM", value_parser = parse_risk)]
        min_risk: RiskLevel,
    },

    /// Finish a bind started with begin-bind
    CompleteBind {
        #[arg(long)]
        operator: String,
        address: String,
    },
}

fn require_asset(db: &Database, host: &str) -> Result<Asset> {
    db.asset_by_hostname(host)?
        .ok_or_else(|| anyhow!("unknown host '{}'", host))
}

pub fn execute(
    db: &Database,
    cmd: AdminCommand,
    now: DateTime<Utc>,
    out: &mut dyn Write,
) -> Result<()> {
    match cmd {
        AdminCommand::Assets => {
            let assets = db.list_assets()?;
            if assets.is_empty() {
                writeln!(out, "No assets yet")?;
            }
            for a in assets {
                writeln!(out, "{:>5}  {:<12}  {}", a.id, a.class, a.hostname)?;
            }
        }
        AdminCommand::Classify { host, class } => {
            let asset = db
                .upsert_asset(&host, class.into())?
                .ok_or_else(|| anyhow!("hostname must not be empty"))?;
            tracing::info!("Asset {} classified as {}", asset.hostname, asset.class);
            writeln!(out, "{} -> {}", asset.hostname, asset.class)?;
        }
        AdminCommand::RemoveAsset { host } => {
            let asset = require_asset(db, &host)?;
            db.remove_asset(asset.id)?;
            writeln!(out, "Removed {}", asset.hostname)?;
        }
        AdminCommand::Bind {
            host,
            address,
            min_risk,
            operator,
        } => {
            db.ensure_asset(&host)?;
            let asset = require_asset(db, &host)?;
            db.upsert_recipient(asset.id, &address, operator.as_deref(), min_risk, true)?;
            writeln!(out, "Bound {} to {} (min risk {})", address.trim(), asset.hostname, min_risk)?;
        }
        AdminCommand::Unbind { host, address } => {
            let asset = require_asset(db, &host)?;
            if db.unbind_recipient(asset.id, &address)? {
                writeln!(out, "Unbound {} from {}", address.trim(), asset.hostname)?;
            } else {
                writeln!(out, "No binding for {} on {}", address.trim(), asset.hostname)?;
            }
        }
        AdminCommand::Recipients { host } => {
            let asset = require_asset(db, &host)?;
            writeln!(out, "{} ({})", asset.hostname, asset.class)?;
            for r in db.recipients_for_asset(asset.id)? {
                let state = if r.enabled { "on" } else { "off" };
                writeln!(out, "  {:<16} min={:<8} {}", r.address, r.min_risk, state)?;
            }
        }
        AdminCommand::History {
            host,
            hours,
            limit,
            offset,
        } => {
            let hours = hours.clamp(0, MAX_HISTORY_HOURS);
            let since = now - Duration::hours(hours);
            let total = db.count_device_history(&host, since)?;
            let class = db
                .asset_class(Some(&host))?
                .map(|c| format!(" ({})", c))
                .unwrap_or_default();
            writeln!(
                out,
                "{}{}: {} deliveries in the last {}h",
                host.trim(),
                class,
                total,
                hours
            )?;
            for h in db.device_history(&host, since, limit.max(1), offset.max(0))? {
                writeln!(
                    out,
                    "  #{:<6} {}  {:<8} message={} model={}",
                    h.receipt_id,
                    h.sent_at.format("%Y-%m-%d %H:%M:%S"),
                    h.risk_level,
                    h.message_ref,
                    h.model_used.as_deref().unwrap_or("-")
                )?;
            }
        }
        AdminCommand::ShowReceipt { id } => {
            let r = db
                .delivery_by_id(id)?
                .ok_or_else(|| anyhow!("no receipt #{}", id))?;
            writeln!(
                out,
                "#{} message={} to={} at={} risk={} ai={} model={} fallback={}",
                r.id,
                r.message_ref,
                r.address,
                r.sent_at.to_rfc3339(),
                r.risk_level,
                r.ai_enabled,
                r.model_used.as_deref().unwrap_or("-"),
                r.fallback.as_deref().unwrap_or("-")
            )?;
            if let Some(msg) = db.get_message(r.message_ref)? {
                writeln!(
                    out,
                    "uid={} subject={}",
                    msg.uid,
                    msg.subject.as_deref().unwrap_or("-")
                )?;
            }
            writeln!(out, "{}", r.text)?;
        }
        AdminCommand::BeginBind {
            operator,
            host,
            min_risk,
        } => {
            db.ensure_asset(&host)?;
            let asset = require_asset(db, &host)?;
            let pending = db.begin_interaction(
                &operator,
                InteractionKind::BindOwner,
                asset.id,
                min_risk,
                Duration::minutes(BIND_TTL_MINUTES),
                now,
            )?;
            writeln!(
                out,
                "Waiting for an address to bind to {} until {}",
                asset.hostname,
                pending.expires_at.to_rfc3339()
            )?;
        }
        AdminCommand::CompleteBind { operator, address } => {
            let Some(pending) = db.take_interaction(&operator, now)? else {
                bail!("no pending bind for operator '{}' (expired or never started)", operator);
            };
            let asset = db
                .asset_by_id(pending.asset_id)?
                .ok_or_else(|| anyhow!("host of the pending bind no longer exists"))?;
            db.upsert_recipient(asset.id, &address, Some(&operator), pending.min_risk, true)?;
            writeln!(
                out,
                "Bound {} to {} (min risk {})",
                address.trim(),
                asset.hostname,
                pending.min_risk
            )?;
        }
    }
    Ok(())
}
