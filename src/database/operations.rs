use std::str::FromStr;
use std::sync::Arc;

use chrono::Utc;
use log::{debug, info};
use rusqlite::{params, Connection, OptionalExtension, Row};
use rust_decimal::Decimal;
use tokio::sync::Mutex;

use crate::database::models::{
    ConfirmationStatus, DebtRecord, Expense, Member, PaymentConfirmation, UnpaidShare,
};
use crate::error::{Result, SettleBotError};

#[derive(Clone)]
pub struct DatabaseOperations {
    conn: Arc<Mutex<Connection>>,
}

impl DatabaseOperations {
    pub async fn new(database_url: &str) -> Result<Self> {
        let conn = Connection::open(database_url)?;
        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };

        db.init_schema().await?;
        Ok(db)
    }

    async fn init_schema(&self) -> Result<()> {
        let conn = self.conn.lock().await;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS members (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL,
                telegram_id TEXT NOT NULL UNIQUE,
                bank_name TEXT,
                account_number TEXT,
                created_at DATETIME DEFAULT CURRENT_TIMESTAMP
            )",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS expenses (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL,
                total_amount TEXT NOT NULL,
                payer_id INTEGER NOT NULL,
                created_at DATETIME DEFAULT CURRENT_TIMESTAMP,
                FOREIGN KEY (payer_id) REFERENCES members(id)
            )",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS expense_participants (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                expense_id INTEGER NOT NULL,
                member_id INTEGER NOT NULL,
                amount_owed TEXT NOT NULL,
                is_paid BOOLEAN NOT NULL DEFAULT FALSE,
                FOREIGN KEY (expense_id) REFERENCES expenses(id),
                FOREIGN KEY (member_id) REFERENCES members(id),
                UNIQUE(expense_id, member_id)
            )",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS payment_confirmations (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                debtor_id INTEGER NOT NULL,
                lender_id INTEGER NOT NULL,
                total_amount TEXT NOT NULL,
                initiated_by_id INTEGER NOT NULL,
                status TEXT NOT NULL DEFAULT 'pending',
                confirmation_message_id INTEGER,
                created_at DATETIME DEFAULT CURRENT_TIMESTAMP,
                confirmed_at DATETIME,
                FOREIGN KEY (debtor_id) REFERENCES members(id),
                FOREIGN KEY (lender_id) REFERENCES members(id),
                FOREIGN KEY (initiated_by_id) REFERENCES members(id)
            )",
            [],
        )?;

        // Storage-level backstop for the one-pending-per-pair rule; the
        // transactional check in create_confirmation is the primary guard.
        conn.execute(
            "CREATE UNIQUE INDEX IF NOT EXISTS idx_confirmations_one_pending
             ON payment_confirmations(debtor_id, lender_id)
             WHERE status = 'pending'",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS confirmation_participants (
                confirmation_id INTEGER NOT NULL,
                participant_id INTEGER NOT NULL,
                UNIQUE(confirmation_id, participant_id),
                FOREIGN KEY (confirmation_id) REFERENCES payment_confirmations(id),
                FOREIGN KEY (participant_id) REFERENCES expense_participants(id)
            )",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS update_cursor (
                id INTEGER PRIMARY KEY CHECK (id = 1),
                last_update_id INTEGER NOT NULL
            )",
            [],
        )?;

        info!("Database schema initialized successfully");
        Ok(())
    }

    pub async fn create_member(
        &self,
        name: &str,
        telegram_id: &str,
        bank_name: Option<&str>,
        account_number: Option<&str>,
    ) -> Result<Member> {
        let conn = self.conn.lock().await;
        let now = Utc::now();

        conn.execute(
            "INSERT INTO members (name, telegram_id, bank_name, account_number, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![name, telegram_id, bank_name, account_number, now],
        )?;

        let member_id = conn.last_insert_rowid();
        debug!("Created member: {} with ID: {}", name, member_id);

        Ok(Member {
            id: Some(member_id),
            name: name.to_string(),
            telegram_id: telegram_id.to_string(),
            bank_name: bank_name.map(str::to_string),
            account_number: account_number.map(str::to_string),
            created_at: Some(now),
        })
    }

    pub async fn member_by_id(&self, id: i64) -> Result<Member> {
        let conn = self.conn.lock().await;

        let mut stmt = conn.prepare(
            "SELECT id, name, telegram_id, bank_name, account_number, created_at
             FROM members WHERE id = ?1",
        )?;
        let member = stmt
            .query_row(params![id], |row| {
                Ok(Member {
                    id: Some(row.get(0)?),
                    name: row.get(1)?,
                    telegram_id: row.get(2)?,
                    bank_name: row.get(3)?,
                    account_number: row.get(4)?,
                    created_at: row.get(5).ok(),
                })
            })
            .optional()?;

        member.ok_or(SettleBotError::MemberNotFound { id })
    }

    /// Creates an expense plus one debt record per (member, share) pair.
    /// The expense total is the sum of the shares.
    pub async fn create_expense(
        &self,
        name: &str,
        payer_id: i64,
        shares: &[(i64, Decimal)],
    ) -> Result<Expense> {
        let mut conn = self.conn.lock().await;
        let now = Utc::now();
        let total: Decimal = shares.iter().map(|(_, amount)| *amount).sum();

        let tx = conn.transaction()?;
        tx.execute(
            "INSERT INTO expenses (name, total_amount, payer_id, created_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![name, total.to_string(), payer_id, now],
        )?;
        let expense_id = tx.last_insert_rowid();

        for (member_id, amount) in shares {
            tx.execute(
                "INSERT INTO expense_participants (expense_id, member_id, amount_owed, is_paid)
                 VALUES (?1, ?2, ?3, FALSE)",
                params![expense_id, member_id, amount.to_string()],
            )?;
        }
        tx.commit()?;

        debug!("Created expense: {} with ID: {}", name, expense_id);

        Ok(Expense {
            id: Some(expense_id),
            name: name.to_string(),
            total_amount: total,
            payer_id,
            created_at: Some(now),
        })
    }

    /// All unpaid debt records where `debtor_id` owes `lender_id`.
    pub async fn unpaid_records(&self, debtor_id: i64, lender_id: i64) -> Result<Vec<DebtRecord>> {
        let conn = self.conn.lock().await;
        unpaid_records_sync(&conn, debtor_id, lender_id)
    }

    pub async fn unpaid_total(&self, debtor_id: i64, lender_id: i64) -> Result<Decimal> {
        let conn = self.conn.lock().await;
        let records = unpaid_records_sync(&conn, debtor_id, lender_id)?;
        Ok(records.iter().map(|r| r.amount_owed).sum())
    }

    /// Every unpaid share of `member_id` across all lenders, ordered by
    /// lender so reminders can group them.
    pub async fn unpaid_shares_for_member(&self, member_id: i64) -> Result<Vec<UnpaidShare>> {
        let conn = self.conn.lock().await;

        let mut stmt = conn.prepare(
            "SELECT ep.id, ep.expense_id, e.name, ep.member_id, ep.amount_owed, ep.is_paid,
                    e.payer_id, m.name
             FROM expense_participants ep
             JOIN expenses e ON e.id = ep.expense_id
             JOIN members m ON m.id = e.payer_id
             WHERE ep.member_id = ?1 AND ep.is_paid = FALSE AND e.payer_id != ?1
             ORDER BY e.payer_id, ep.id",
        )?;
        let rows = stmt.query_map(params![member_id], |row| {
            Ok(UnpaidShare {
                record: debt_record_from_row(row)?,
                lender_id: row.get(6)?,
                lender_name: row.get(7)?,
            })
        })?;

        let mut shares = Vec::new();
        for share in rows {
            shares.push(share?);
        }
        Ok(shares)
    }

    /// Creates a pending confirmation and links the settlement snapshot,
    /// in one transaction with the duplicate-pending check. Two racing
    /// initiations for the same pair cannot both pass the check: the whole
    /// read-check-insert runs under the connection lock and a transaction,
    /// and the partial unique index backs it up in storage.
    pub async fn create_confirmation(
        &self,
        debtor_id: i64,
        lender_id: i64,
        initiated_by_id: i64,
        total_amount: Decimal,
        record_ids: &[i64],
    ) -> Result<PaymentConfirmation> {
        let mut conn = self.conn.lock().await;
        let now = Utc::now();

        let tx = conn.transaction()?;

        let pending_exists: i64 = tx.query_row(
            "SELECT COUNT(*) FROM payment_confirmations
             WHERE debtor_id = ?1 AND lender_id = ?2 AND status = 'pending'",
            params![debtor_id, lender_id],
            |row| row.get(0),
        )?;
        if pending_exists > 0 {
            return Err(SettleBotError::DuplicatePending {
                debtor_id,
                lender_id,
            });
        }

        tx.execute(
            "INSERT INTO payment_confirmations
                 (debtor_id, lender_id, total_amount, initiated_by_id, status, created_at)
             VALUES (?1, ?2, ?3, ?4, 'pending', ?5)",
            params![
                debtor_id,
                lender_id,
                total_amount.to_string(),
                initiated_by_id,
                now
            ],
        )?;
        let confirmation_id = tx.last_insert_rowid();

        for record_id in record_ids {
            tx.execute(
                "INSERT INTO confirmation_participants (confirmation_id, participant_id)
                 VALUES (?1, ?2)",
                params![confirmation_id, record_id],
            )?;
        }
        tx.commit()?;

        info!(
            "Created pending confirmation {} for debtor {} -> lender {} ({} records)",
            confirmation_id,
            debtor_id,
            lender_id,
            record_ids.len()
        );

        Ok(PaymentConfirmation {
            id: Some(confirmation_id),
            debtor_id,
            lender_id,
            total_amount,
            initiated_by_id,
            status: ConfirmationStatus::Pending,
            confirmation_message_id: None,
            created_at: Some(now),
            confirmed_at: None,
            record_ids: record_ids.to_vec(),
        })
    }

    pub async fn confirmation_by_id(&self, id: i64) -> Result<PaymentConfirmation> {
        let conn = self.conn.lock().await;
        load_confirmation(&conn, id)
    }

    pub async fn set_confirmation_message_id(&self, id: i64, message_id: i64) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "UPDATE payment_confirmations SET confirmation_message_id = ?2 WHERE id = ?1",
            params![id, message_id],
        )?;
        Ok(())
    }

    /// The confirming transition: re-checks the status under the write
    /// transaction, flips the linked snapshot to paid and stamps
    /// confirmed_at. Only this path ever mutates the paid flags.
    pub async fn confirm_confirmation(&self, id: i64) -> Result<PaymentConfirmation> {
        let mut conn = self.conn.lock().await;
        let now = Utc::now();

        let tx = conn.transaction()?;

        let mut confirmation = load_confirmation(&tx, id)?;
        if confirmation.status != ConfirmationStatus::Pending {
            return Err(SettleBotError::AlreadyProcessed {
                id,
                status: confirmation.status,
            });
        }

        tx.execute(
            "UPDATE expense_participants SET is_paid = TRUE
             WHERE id IN (SELECT participant_id FROM confirmation_participants
                          WHERE confirmation_id = ?1)",
            params![id],
        )?;
        tx.execute(
            "UPDATE payment_confirmations SET status = 'confirmed', confirmed_at = ?2
             WHERE id = ?1",
            params![id, now],
        )?;
        tx.commit()?;

        info!(
            "Confirmed payment confirmation {} ({} records marked paid)",
            id,
            confirmation.record_ids.len()
        );

        confirmation.status = ConfirmationStatus::Confirmed;
        confirmation.confirmed_at = Some(now);
        Ok(confirmation)
    }

    /// The rejecting transition. Returns false without touching anything
    /// when the confirmation is no longer pending; never mutates the
    /// ledger either way.
    pub async fn reject_confirmation(&self, id: i64) -> Result<bool> {
        let mut conn = self.conn.lock().await;

        let tx = conn.transaction()?;

        let confirmation = load_confirmation(&tx, id)?;
        if confirmation.status != ConfirmationStatus::Pending {
            return Ok(false);
        }

        tx.execute(
            "UPDATE payment_confirmations SET status = 'rejected' WHERE id = ?1",
            params![id],
        )?;
        tx.commit()?;

        info!("Rejected payment confirmation {}", id);
        Ok(true)
    }

    /// Last fully processed update id; the singleton row is created lazily.
    pub async fn cursor(&self) -> Result<i64> {
        let conn = self.conn.lock().await;

        let stored: Option<i64> = conn
            .query_row(
                "SELECT last_update_id FROM update_cursor WHERE id = 1",
                [],
                |row| row.get(0),
            )
            .optional()?;

        match stored {
            Some(value) => Ok(value),
            None => {
                conn.execute(
                    "INSERT OR IGNORE INTO update_cursor (id, last_update_id) VALUES (1, 0)",
                    [],
                )?;
                Ok(0)
            }
        }
    }

    /// Monotonic advance: set-to-max, never an unconditional overwrite, so
    /// a writer that already moved the cursor further is not regressed.
    pub async fn advance_cursor(&self, update_id: i64) -> Result<()> {
        let conn = self.conn.lock().await;

        conn.execute(
            "INSERT INTO update_cursor (id, last_update_id) VALUES (1, ?1)
             ON CONFLICT(id) DO UPDATE SET
                 last_update_id = max(last_update_id, excluded.last_update_id)",
            params![update_id],
        )?;

        debug!("Cursor advanced to {}", update_id);
        Ok(())
    }
}

fn decimal_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<Decimal> {
    let raw: String = row.get(idx)?;
    Decimal::from_str(&raw).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
    })
}

fn status_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<ConfirmationStatus> {
    let raw: String = row.get(idx)?;
    ConfirmationStatus::parse(&raw).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            idx,
            rusqlite::types::Type::Text,
            format!("unknown confirmation status: {raw}").into(),
        )
    })
}

fn debt_record_from_row(row: &Row<'_>) -> rusqlite::Result<DebtRecord> {
    Ok(DebtRecord {
        id: Some(row.get(0)?),
        expense_id: row.get(1)?,
        expense_name: row.get(2)?,
        member_id: row.get(3)?,
        amount_owed: decimal_column(row, 4)?,
        is_paid: row.get(5)?,
    })
}

fn unpaid_records_sync(
    conn: &Connection,
    debtor_id: i64,
    lender_id: i64,
) -> Result<Vec<DebtRecord>> {
    let mut stmt = conn.prepare(
        "SELECT ep.id, ep.expense_id, e.name, ep.member_id, ep.amount_owed, ep.is_paid
         FROM expense_participants ep
         JOIN expenses e ON e.id = ep.expense_id
         WHERE ep.member_id = ?1 AND e.payer_id = ?2 AND ep.is_paid = FALSE
         ORDER BY ep.id",
    )?;
    let rows = stmt.query_map(params![debtor_id, lender_id], debt_record_from_row)?;

    let mut records = Vec::new();
    for record in rows {
        records.push(record?);
    }
    Ok(records)
}

fn load_confirmation(conn: &Connection, id: i64) -> Result<PaymentConfirmation> {
    let mut stmt = conn.prepare(
        "SELECT id, debtor_id, lender_id, total_amount, initiated_by_id, status,
                confirmation_message_id, created_at, confirmed_at
         FROM payment_confirmations WHERE id = ?1",
    )?;
    let confirmation = stmt
        .query_row(params![id], |row| {
            Ok(PaymentConfirmation {
                id: Some(row.get(0)?),
                debtor_id: row.get(1)?,
                lender_id: row.get(2)?,
                total_amount: decimal_column(row, 3)?,
                initiated_by_id: row.get(4)?,
                status: status_column(row, 5)?,
                confirmation_message_id: row.get(6)?,
                created_at: row.get(7).ok(),
                confirmed_at: row.get(8).ok(),
                record_ids: Vec::new(),
            })
        })
        .optional()?;

    let mut confirmation = confirmation.ok_or(SettleBotError::ConfirmationNotFound { id })?;

    let mut stmt = conn.prepare(
        "SELECT participant_id FROM confirmation_participants
         WHERE confirmation_id = ?1 ORDER BY participant_id",
    )?;
    let ids = stmt.query_map(params![id], |row| row.get(0))?;
    for record_id in ids {
        confirmation.record_ids.push(record_id?);
    }

    Ok(confirmation)
}
