//! Error types at the collaborator seams

use thiserror::Error;

/// Failure reported by a mail source, notification channel or text generator
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    /// Connectivity-class failure worth retrying
    #[error("transient: {0}")]
    Transient(String),

    #[error("permanent: {0}")]
    Permanent(String),
}

impl TransportError {
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }

    /// Short error class name, shown in fallback markers
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Transient(_) => "TransientError",
            Self::Permanent(_) => "PermanentError",
        }
    }
}

impl From<reqwest::Error> for TransportError {
    fn from(e: reqwest::Error) -> Self {
        let transient = e.is_connect()
            || e.is_timeout()
            || e.status().map_or(false, |s| s.as_u16() == 429 || s.is_server_error());
        if transient {
            Self::Transient(e.to_string())
        } else {
            Self::Permanent(e.to_string())
        }
    }
}

/// Invalid or incomplete settings
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{field} must be greater than zero")]
    Zero { field: &'static str },

    #[error("at least one admin address is required")]
    NoAdmins,

    #[error("telegram bot token is not set (config or TELEGRAM_BOT_TOKEN)")]
    MissingBotToken,

    #[error("llm is enabled but no API key is set (config or OPENAI_API_KEY)")]
    MissingApiKey,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(TransportError::Transient("timeout".into()).is_transient());
        assert!(!TransportError::Permanent("bad request".into()).is_transient());
        assert_eq!(
            TransportError::Permanent("x".into()).to_string(),
            "permanent: x"
        );
    }
}
