use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Member {
    pub id: Option<i64>,
    pub name: String,
    /// External chat identity. Immutable once created; the authorization
    /// checks compare against this, never against ids embedded in buttons.
    pub telegram_id: String,
    pub bank_name: Option<String>,
    pub account_number: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Expense {
    pub id: Option<i64>,
    pub name: String,
    pub total_amount: Decimal,
    pub payer_id: i64,
    pub created_at: Option<DateTime<Utc>>,
}

/// One member's unpaid share of one expense. Unique per (expense, member).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DebtRecord {
    pub id: Option<i64>,
    pub expense_id: i64,
    /// Denormalized from the owning expense; every read joins it anyway.
    pub expense_name: String,
    pub member_id: i64,
    pub amount_owed: Decimal,
    pub is_paid: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfirmationStatus {
    Pending,
    Confirmed,
    Rejected,
    /// Declared terminal state; no sweep currently produces it.
    Expired,
}

impl ConfirmationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConfirmationStatus::Pending => "pending",
            ConfirmationStatus::Confirmed => "confirmed",
            ConfirmationStatus::Rejected => "rejected",
            ConfirmationStatus::Expired => "expired",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(ConfirmationStatus::Pending),
            "confirmed" => Some(ConfirmationStatus::Confirmed),
            "rejected" => Some(ConfirmationStatus::Rejected),
            "expired" => Some(ConfirmationStatus::Expired),
            _ => None,
        }
    }
}

impl std::fmt::Display for ConfirmationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// The two-party settlement handshake between one debtor/lender pair.
///
/// `record_ids` is the snapshot of unpaid debt records linked at creation
/// time; confirming marks exactly that set paid, even if new expenses were
/// added between initiation and confirmation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentConfirmation {
    pub id: Option<i64>,
    pub debtor_id: i64,
    pub lender_id: i64,
    pub total_amount: Decimal,
    pub initiated_by_id: i64,
    pub status: ConfirmationStatus,
    /// Handle to the interactive message sent to the counterparty, needed
    /// to edit it into its terminal form. Stays null if the send failed.
    pub confirmation_message_id: Option<i64>,
    pub created_at: Option<DateTime<Utc>>,
    pub confirmed_at: Option<DateTime<Utc>>,
    pub record_ids: Vec<i64>,
}

impl PaymentConfirmation {
    /// Whichever of the pair did not initiate; the only member allowed to
    /// confirm or reject.
    pub fn counterparty_id(&self) -> i64 {
        if self.initiated_by_id == self.debtor_id {
            self.lender_id
        } else {
            self.debtor_id
        }
    }
}

/// One unpaid share together with the lender it is owed to, as fetched for
/// debt reminders.
#[derive(Debug, Clone)]
pub struct UnpaidShare {
    pub record: DebtRecord,
    pub lender_id: i64,
    pub lender_name: String,
}
