use std::sync::Arc;

use log::{debug, error, info, warn};
use rust_decimal::Decimal;

use crate::bot::callback::CallbackAction;
use crate::bot::gateway::{CallbackEvent, InlineAction, TelegramGateway};
use crate::database::models::{Member, PaymentConfirmation};
use crate::database::DatabaseOperations;
use crate::error::{Result, SettleBotError};
use crate::utils::{Formatter, Validator};

/// Owns the payment-confirmation workflow: routes button presses, enforces
/// the pending -> confirmed/rejected lifecycle and performs the ledger
/// mutation on confirmation.
///
/// Every transition commits before any notification goes out; outbound
/// delivery failures are logged and swallowed, never rolled back into the
/// business state.
pub struct PaymentCallbackHandler {
    gateway: Arc<dyn TelegramGateway>,
    db: DatabaseOperations,
}

impl PaymentCallbackHandler {
    pub fn new(gateway: Arc<dyn TelegramGateway>, db: DatabaseOperations) -> Self {
        Self { gateway, db }
    }

    /// Single dispatch entry point for inbound button presses. Returns
    /// whether the event was handled successfully; it never propagates an
    /// error past this boundary.
    pub async fn handle_callback(&self, event: &CallbackEvent) -> bool {
        // Answer first so the client-side spinner clears, regardless of
        // what the business logic decides below.
        self.gateway
            .answer_callback(&event.callback_id, None, false)
            .await;

        let Some(action) = CallbackAction::parse(&event.data) else {
            warn!("Unknown callback data: {}", event.data);
            return false;
        };

        let result = match action {
            CallbackAction::InitiatePayment {
                debtor_id,
                lender_id,
            } => {
                self.initiate(&event.actor_telegram_id, debtor_id, lender_id)
                    .await
            }
            CallbackAction::ConfirmPayment { confirmation_id } => {
                self.confirm(&event.actor_telegram_id, confirmation_id).await
            }
            CallbackAction::RejectPayment { confirmation_id } => {
                self.reject(&event.actor_telegram_id, confirmation_id).await
            }
        };

        match result {
            Ok(()) => true,
            Err(e) => {
                error!("Callback dispatch failed for '{}': {}", event.data, e);
                let notice = e.user_notice().unwrap_or_else(|| {
                    "⚠️ Something went wrong. Please try again later.".to_string()
                });
                // Best effort; the operation already failed cleanly.
                self.gateway.send_text(&event.origin_chat_id, &notice).await;
                false
            }
        }
    }

    /// Opens a settlement claim between a debtor/lender pair. The actor
    /// must be one of the two members named in the routing data; the
    /// initiator role is derived from the actor's identity, never asserted
    /// by the button.
    pub async fn initiate(
        &self,
        actor_telegram_id: &str,
        debtor_id: i64,
        lender_id: i64,
    ) -> Result<()> {
        let debtor = self.db.member_by_id(debtor_id).await?;
        let lender = self.db.member_by_id(lender_id).await?;

        if actor_telegram_id != debtor.telegram_id && actor_telegram_id != lender.telegram_id {
            return Err(SettleBotError::unauthorized(actor_telegram_id));
        }
        let initiated_by_id = if actor_telegram_id == debtor.telegram_id {
            debtor_id
        } else {
            lender_id
        };

        // Snapshot of everything currently unpaid between the pair. This
        // exact set is what a later confirm marks paid.
        let records = self.db.unpaid_records(debtor_id, lender_id).await?;
        if records.is_empty() {
            return Err(SettleBotError::NothingToSettle {
                debtor_id,
                lender_id,
            });
        }

        let total_amount: Decimal = records.iter().map(|r| r.amount_owed).sum();
        if !Validator::is_valid_amount(total_amount) {
            return Err(SettleBotError::InvalidAmount {
                amount: total_amount,
            });
        }

        let record_ids: Vec<i64> = records.iter().filter_map(|r| r.id).collect();
        let confirmation = self
            .db
            .create_confirmation(debtor_id, lender_id, initiated_by_id, total_amount, &record_ids)
            .await?;

        // The pending row is committed; everything below is network I/O
        // and must not undo it. A failed send leaves the confirmation
        // pending with a null message handle, which is an accepted
        // degraded state.
        let (initiator, counterparty) = if initiated_by_id == debtor_id {
            (&debtor, &lender)
        } else {
            (&lender, &debtor)
        };
        let expense_names: Vec<String> = records.iter().map(|r| r.expense_name.clone()).collect();

        self.send_confirmation_request(&confirmation, initiator, counterparty, &expense_names)
            .await;

        self.gateway
            .send_text(
                &initiator.telegram_id,
                &format!("✅ Confirmation request sent to {}.", counterparty.name),
            )
            .await;

        Ok(())
    }

    async fn send_confirmation_request(
        &self,
        confirmation: &PaymentConfirmation,
        initiator: &Member,
        counterparty: &Member,
        expense_names: &[String],
    ) {
        let Some(confirmation_id) = confirmation.id else {
            return;
        };

        let text = format!(
            "💰 <b>PAYMENT CONFIRMATION</b>\n\n\
             {} says they paid you <b>{}</b>\n\
             📝 For: {}\n\n\
             Have you received the money?",
            initiator.name,
            Formatter::format_amount(confirmation.total_amount),
            Formatter::format_expense_list(expense_names),
        );

        let confirm = CallbackAction::ConfirmPayment { confirmation_id };
        let reject = CallbackAction::RejectPayment { confirmation_id };
        let actions = match (confirm.encode_for_button(), reject.encode_for_button()) {
            (Some(confirm_data), Some(reject_data)) => vec![
                InlineAction {
                    label: "✅ Received".to_string(),
                    data: confirm_data,
                },
                InlineAction {
                    label: "❌ Not yet".to_string(),
                    data: reject_data,
                },
            ],
            _ => {
                warn!(
                    "Routing data for confirmation {} exceeds the callback ceiling, \
                     sending without buttons",
                    confirmation_id
                );
                Vec::new()
            }
        };

        let message_handle = if actions.is_empty() {
            self.gateway
                .send_text(&counterparty.telegram_id, &text)
                .await;
            None
        } else {
            self.gateway
                .send_interactive(&counterparty.telegram_id, &text, &actions)
                .await
        };

        match message_handle {
            Some(message_id) => {
                if let Err(e) = self
                    .db
                    .set_confirmation_message_id(confirmation_id, message_id)
                    .await
                {
                    error!(
                        "Failed to store message handle for confirmation {}: {}",
                        confirmation_id, e
                    );
                }
            }
            None => warn!(
                "Confirmation {} stays pending with no message handle",
                confirmation_id
            ),
        }
    }

    /// The confirming transition. Only the counterparty may act; the
    /// status is re-checked inside the write transaction so two racing
    /// confirm/reject attempts cannot both succeed.
    pub async fn confirm(&self, actor_telegram_id: &str, confirmation_id: i64) -> Result<()> {
        let confirmation = self.db.confirmation_by_id(confirmation_id).await?;
        let debtor = self.db.member_by_id(confirmation.debtor_id).await?;
        let lender = self.db.member_by_id(confirmation.lender_id).await?;

        let counterparty = if confirmation.counterparty_id() == confirmation.debtor_id {
            &debtor
        } else {
            &lender
        };
        if actor_telegram_id != counterparty.telegram_id {
            return Err(SettleBotError::unauthorized(actor_telegram_id));
        }

        let confirmed = self.db.confirm_confirmation(confirmation_id).await?;

        // Committed. Notifications below are best-effort.
        self.edit_to_confirmed(&confirmed, &debtor, counterparty).await;
        self.notify_payment_success(&confirmed, &debtor, &lender).await;

        Ok(())
    }

    async fn edit_to_confirmed(
        &self,
        confirmation: &PaymentConfirmation,
        debtor: &Member,
        counterparty: &Member,
    ) {
        let Some(message_id) = confirmation.confirmation_message_id else {
            debug!("No message handle stored, skipping terminal edit");
            return;
        };

        let text = format!(
            "✅ <b>PAYMENT CONFIRMED</b>\n\n\
             {} from {}\n\
             Status: settled ✅",
            Formatter::format_amount(confirmation.total_amount),
            debtor.name,
        );
        self.gateway
            .edit_message(&counterparty.telegram_id, message_id, &text)
            .await;
    }

    async fn notify_payment_success(
        &self,
        confirmation: &PaymentConfirmation,
        debtor: &Member,
        lender: &Member,
    ) {
        let amount = Formatter::format_amount(confirmation.total_amount);

        let mut debtor_message = format!(
            "✅ <b>PAYMENT CONFIRMED</b>\n\n\
             Paid to {}: <b>{}</b>\n\
             Status: settled ✅\n\n",
            lender.name, amount
        );
        // Recomputed fresh: other confirmations may cover other expenses
        // between the same pair.
        match self
            .db
            .unpaid_total(confirmation.debtor_id, confirmation.lender_id)
            .await
        {
            Ok(remaining) if remaining > Decimal::ZERO => {
                debtor_message.push_str(&format!(
                    "⚠️ You still owe {}: {}",
                    lender.name,
                    Formatter::format_amount(remaining)
                ));
            }
            Ok(_) => {
                debtor_message
                    .push_str(&format!("🎉 You are all settled up with {}!", lender.name));
            }
            Err(e) => warn!("Failed to recompute remaining balance: {e}"),
        }
        self.gateway
            .send_text(&debtor.telegram_id, &debtor_message)
            .await;

        let lender_message = format!(
            "✅ <b>PAYMENT RECORDED</b>\n\n\
             Received from {}: <b>{}</b>\n\
             Status: confirmed ✅",
            debtor.name, amount
        );
        self.gateway
            .send_text(&lender.telegram_id, &lender_message)
            .await;

        info!(
            "Confirmation {} settled: {} -> {} ({})",
            confirmation.id.unwrap_or_default(),
            debtor.name,
            lender.name,
            amount
        );
    }

    /// The rejecting transition: same authorization rule as confirm, no
    /// ledger mutation, and a silent no-op when the confirmation is no
    /// longer pending.
    pub async fn reject(&self, actor_telegram_id: &str, confirmation_id: i64) -> Result<()> {
        let confirmation = self.db.confirmation_by_id(confirmation_id).await?;
        let debtor = self.db.member_by_id(confirmation.debtor_id).await?;
        let lender = self.db.member_by_id(confirmation.lender_id).await?;

        let counterparty = if confirmation.counterparty_id() == confirmation.debtor_id {
            &debtor
        } else {
            &lender
        };
        if actor_telegram_id != counterparty.telegram_id {
            return Err(SettleBotError::unauthorized(actor_telegram_id));
        }

        let transitioned = self.db.reject_confirmation(confirmation_id).await?;
        if !transitioned {
            debug!(
                "Confirmation {} no longer pending, reject ignored",
                confirmation_id
            );
            return Ok(());
        }

        let amount = Formatter::format_amount(confirmation.total_amount);

        if let Some(message_id) = confirmation.confirmation_message_id {
            let text = format!(
                "❌ <b>PAYMENT REJECTED</b>\n\n\
                 {} from {}\n\
                 Status: rejected ❌",
                amount, debtor.name,
            );
            self.gateway
                .edit_message(&counterparty.telegram_id, message_id, &text)
                .await;
        }

        let initiator = if confirmation.initiated_by_id == confirmation.debtor_id {
            &debtor
        } else {
            &lender
        };
        let initiator_message = format!(
            "❌ <b>REQUEST REJECTED</b>\n\n\
             {} says they have not received {}\n\n\
             Please double-check or contact them directly.",
            counterparty.name, amount
        );
        self.gateway
            .send_text(&initiator.telegram_id, &initiator_message)
            .await;

        Ok(())
    }

    /// Pushes an unpaid-share reminder to a member, grouped by lender,
    /// with one "I paid" button per lender. Returns false when the member
    /// has nothing unpaid.
    pub async fn send_debt_reminder(&self, member_id: i64) -> Result<bool> {
        let member = self.db.member_by_id(member_id).await?;
        let shares = self.db.unpaid_shares_for_member(member_id).await?;
        if shares.is_empty() {
            return Ok(false);
        }

        let total: Decimal = shares.iter().map(|s| s.record.amount_owed).sum();

        let mut text = format!(
            "🔔 <b>Payment reminder</b>\n\n\
             Hi {}!\n\n\
             You have {} unpaid share(s):\n\n",
            member.name,
            shares.len()
        );
        for share in &shares {
            text.push_str(&format!(
                "• {} ({}): {}\n",
                share.record.expense_name,
                share.lender_name,
                Formatter::format_amount(share.record.amount_owed)
            ));
        }
        text.push_str(&format!(
            "\n💰 Total: {}\n📅 Please settle up when you can!",
            Formatter::format_amount(total)
        ));

        let mut actions = Vec::new();
        let mut seen_lenders = Vec::new();
        for share in &shares {
            if seen_lenders.contains(&share.lender_id) {
                continue;
            }
            seen_lenders.push(share.lender_id);

            let action = CallbackAction::InitiatePayment {
                debtor_id: member_id,
                lender_id: share.lender_id,
            };
            match action.encode_for_button() {
                Some(data) => actions.push(InlineAction {
                    label: format!("💸 I paid {}", share.lender_name),
                    data,
                }),
                None => warn!(
                    "Initiate routing for pair ({}, {}) exceeds the callback ceiling",
                    member_id, share.lender_id
                ),
            }
        }

        let delivered = if actions.is_empty() {
            self.gateway.send_text(&member.telegram_id, &text).await
        } else {
            self.gateway
                .send_interactive(&member.telegram_id, &text, &actions)
                .await
                .is_some()
        };

        Ok(delivered)
    }
}
