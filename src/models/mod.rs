pub mod asset;
pub mod event;
pub mod message;
pub mod risk;
pub mod session;

pub use asset::{Asset, AssetClass, Recipient};
pub use event::{normalize_sha256, CanonicalEvent};
pub use message::{
    DedupDecision, DedupRecord, DeliveryReceipt, ExtractedMessage, HistoryEntry, IngestedEvent,
    IngestedMessage, InsertOutcome, NewReceipt, RawMessage,
};
pub use risk::{severity_rank, RiskLevel, DEFAULT_MIN_RISK};
pub use session::{Interaction, InteractionKind};
