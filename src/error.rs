use rust_decimal::Decimal;
use teloxide::RequestError;
use thiserror::Error;

use crate::database::models::ConfirmationStatus;

#[derive(Error, Debug)]
pub enum SettleBotError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Configuration error: {0}")]
    Config(#[from] anyhow::Error),

    #[error("Telegram API error: {0}")]
    Telegram(#[from] RequestError),

    #[error("Member not found: {id}")]
    MemberNotFound { id: i64 },

    #[error("Payment confirmation not found: {id}")]
    ConfirmationNotFound { id: i64 },

    #[error("Actor {telegram_id} is not a party to this settlement")]
    Unauthorized { telegram_id: String },

    #[error("A pending confirmation already exists for debtor {debtor_id} and lender {lender_id}")]
    DuplicatePending { debtor_id: i64, lender_id: i64 },

    #[error("No unpaid records between debtor {debtor_id} and lender {lender_id}")]
    NothingToSettle { debtor_id: i64, lender_id: i64 },

    #[error("Invalid settlement amount: {amount}")]
    InvalidAmount { amount: Decimal },

    #[error("Confirmation {id} already processed (status: {status})")]
    AlreadyProcessed {
        id: i64,
        status: ConfirmationStatus,
    },

    #[error("Gateway delivery failed: {message}")]
    Gateway { message: String },

    #[error("Failed to persist update cursor: {0}")]
    CursorPersist(#[source] Box<SettleBotError>),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Environment variable error: {0}")]
    Env(#[from] std::env::VarError),
}

pub type Result<T> = std::result::Result<T, SettleBotError>;

impl SettleBotError {
    pub fn gateway(message: impl Into<String>) -> Self {
        Self::Gateway {
            message: message.into(),
        }
    }

    pub fn unauthorized(telegram_id: impl Into<String>) -> Self {
        Self::Unauthorized {
            telegram_id: telegram_id.into(),
        }
    }

    /// Transient errors worth another attempt; domain rejections are final.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SettleBotError::Database(_)
                | SettleBotError::Telegram(_)
                | SettleBotError::Gateway { .. }
                | SettleBotError::Io(_)
        )
    }

    /// The only error that must abort a polling run instead of being
    /// consumed with the event. Losing cursor progress means reprocessing
    /// the same updates on every subsequent run.
    pub fn is_fatal_for_polling(&self) -> bool {
        matches!(self, SettleBotError::CursorPersist(_))
    }

    /// Short user-facing explanation for a rejected operation, if the
    /// error is one the acting party should hear about.
    pub fn user_notice(&self) -> Option<String> {
        match self {
            SettleBotError::Unauthorized { .. } => {
                Some("❌ You are not allowed to perform this action.".to_string())
            }
            SettleBotError::DuplicatePending { .. } => {
                Some("⚠️ A payment confirmation request already exists.".to_string())
            }
            SettleBotError::NothingToSettle { .. } => {
                Some("✅ There is no outstanding debt between the two of you.".to_string())
            }
            SettleBotError::InvalidAmount { .. } => {
                Some("❌ The settlement amount is invalid.".to_string())
            }
            SettleBotError::AlreadyProcessed { status, .. } => {
                Some(format!("⚠️ This request was already handled ({status})."))
            }
            SettleBotError::MemberNotFound { .. } => Some("❌ Member not found.".to_string()),
            SettleBotError::ConfirmationNotFound { .. } => {
                Some("❌ This confirmation request no longer exists.".to_string())
            }
            _ => None,
        }
    }
}
