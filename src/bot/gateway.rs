use async_trait::async_trait;
use log::{debug, warn};
use teloxide::payloads::{
    AnswerCallbackQuerySetters, EditMessageTextSetters, GetUpdatesSetters, SendMessageSetters,
};
use teloxide::requests::Requester;
use teloxide::types::{
    AllowedUpdate, ChatId, InlineKeyboardButton, InlineKeyboardMarkup, MessageId, ParseMode,
    Update, UpdateKind,
};
use teloxide::Bot;

use crate::error::Result;
use crate::retry::{retry_with_backoff, RetryConfig};

/// One inline button: label plus the routing string it carries back.
#[derive(Debug, Clone)]
pub struct InlineAction {
    pub label: String,
    pub data: String,
}

/// An inbound button press, stripped down to what dispatch needs.
#[derive(Debug, Clone)]
pub struct CallbackEvent {
    pub callback_id: String,
    pub data: String,
    /// Identity of the member who pressed the button. Authorization is
    /// checked against this, never against ids inside `data`.
    pub actor_telegram_id: String,
    /// Chat to send validation notices back to.
    pub origin_chat_id: String,
}

/// One entry from the update feed. Non-callback updates still carry an id
/// and must advance the cursor, so they are not filtered out here.
#[derive(Debug, Clone)]
pub struct InboundUpdate {
    pub id: i64,
    pub callback: Option<CallbackEvent>,
}

/// Thin client for the external chat service. Outbound operations are
/// best-effort: failures are logged by the implementation and reported as
/// false / None, never as errors — delivery problems must not undo
/// committed business state.
#[async_trait]
pub trait TelegramGateway: Send + Sync {
    /// Updates with id > `after_id`, waiting up to `timeout_secs` for new
    /// ones. Network or API errors degrade to an empty batch.
    async fn fetch_updates(&self, after_id: i64, timeout_secs: u32) -> Vec<InboundUpdate>;

    async fn send_text(&self, telegram_id: &str, text: &str) -> bool;

    /// Sends a message with one row of inline buttons; returns the message
    /// handle needed to edit it later, or None on failure.
    async fn send_interactive(
        &self,
        telegram_id: &str,
        text: &str,
        actions: &[InlineAction],
    ) -> Option<i64>;

    /// Replaces the message text and removes its buttons.
    async fn edit_message(&self, telegram_id: &str, message_id: i64, text: &str) -> bool;

    /// Acknowledges a button press so the client-side spinner is cleared.
    async fn answer_callback(&self, callback_id: &str, text: Option<&str>, emphasize: bool)
        -> bool;
}

/// Concrete adapter over the Telegram Bot API. Constructed once per process
/// and injected wherever the gateway is needed.
pub struct BotGateway {
    bot: Bot,
    retry_attempts: u32,
}

impl BotGateway {
    pub fn new(bot: Bot, retry_attempts: u32) -> Self {
        Self {
            bot,
            retry_attempts,
        }
    }

    fn chat_id(telegram_id: &str) -> Option<ChatId> {
        match telegram_id.parse::<i64>() {
            Ok(raw) => Some(ChatId(raw)),
            Err(_) => {
                warn!("Invalid telegram id: {telegram_id}");
                None
            }
        }
    }
}

fn map_update(update: Update) -> InboundUpdate {
    let id = update.id as i64;
    let callback = match update.kind {
        UpdateKind::CallbackQuery(query) => query.data.map(|data| CallbackEvent {
            callback_id: query.id,
            data,
            actor_telegram_id: query.from.id.0.to_string(),
            origin_chat_id: query
                .message
                .map(|message| message.chat.id.0.to_string())
                .unwrap_or_else(|| query.from.id.0.to_string()),
        }),
        _ => None,
    };
    InboundUpdate { id, callback }
}

#[async_trait]
impl TelegramGateway for BotGateway {
    async fn fetch_updates(&self, after_id: i64, timeout_secs: u32) -> Vec<InboundUpdate> {
        let result = self
            .bot
            .get_updates()
            .offset((after_id + 1) as i32)
            .timeout(timeout_secs)
            .allowed_updates(vec![AllowedUpdate::Message, AllowedUpdate::CallbackQuery])
            .await;

        match result {
            Ok(updates) => {
                debug!("Fetched {} update(s) after id {}", updates.len(), after_id);
                updates.into_iter().map(map_update).collect()
            }
            Err(e) => {
                warn!("getUpdates failed, treating as empty batch: {e}");
                Vec::new()
            }
        }
    }

    async fn send_text(&self, telegram_id: &str, text: &str) -> bool {
        let Some(chat_id) = Self::chat_id(telegram_id) else {
            return false;
        };

        let result: Result<()> = retry_with_backoff(
            || {
                let bot = self.bot.clone();
                let text = text.to_string();
                async move {
                    bot.send_message(chat_id, text)
                        .parse_mode(ParseMode::Html)
                        .await?;
                    Ok(())
                }
            },
            RetryConfig::for_gateway(self.retry_attempts),
            "send_text",
        )
        .await;

        match result {
            Ok(()) => true,
            Err(e) => {
                warn!("Failed to send message to {telegram_id}: {e}");
                false
            }
        }
    }

    async fn send_interactive(
        &self,
        telegram_id: &str,
        text: &str,
        actions: &[InlineAction],
    ) -> Option<i64> {
        let chat_id = Self::chat_id(telegram_id)?;

        let buttons: Vec<InlineKeyboardButton> = actions
            .iter()
            .map(|action| InlineKeyboardButton::callback(action.label.clone(), action.data.clone()))
            .collect();
        let markup = InlineKeyboardMarkup::new(vec![buttons]);

        let result: Result<i64> = retry_with_backoff(
            || {
                let bot = self.bot.clone();
                let text = text.to_string();
                let markup = markup.clone();
                async move {
                    let message = bot
                        .send_message(chat_id, text)
                        .parse_mode(ParseMode::Html)
                        .reply_markup(markup)
                        .await?;
                    Ok(message.id.0 as i64)
                }
            },
            RetryConfig::for_gateway(self.retry_attempts),
            "send_interactive",
        )
        .await;

        match result {
            Ok(message_id) => Some(message_id),
            Err(e) => {
                warn!("Failed to send interactive message to {telegram_id}: {e}");
                None
            }
        }
    }

    async fn edit_message(&self, telegram_id: &str, message_id: i64, text: &str) -> bool {
        let Some(chat_id) = Self::chat_id(telegram_id) else {
            return false;
        };

        // editMessageText with no reply markup drops the buttons, which is
        // exactly what the terminal states want.
        let result: Result<()> = retry_with_backoff(
            || {
                let bot = self.bot.clone();
                let text = text.to_string();
                async move {
                    bot.edit_message_text(chat_id, MessageId(message_id as i32), text)
                        .parse_mode(ParseMode::Html)
                        .await?;
                    Ok(())
                }
            },
            RetryConfig::for_gateway(self.retry_attempts),
            "edit_message",
        )
        .await;

        match result {
            Ok(()) => true,
            Err(e) => {
                warn!("Failed to edit message {message_id} in chat {telegram_id}: {e}");
                false
            }
        }
    }

    async fn answer_callback(
        &self,
        callback_id: &str,
        text: Option<&str>,
        emphasize: bool,
    ) -> bool {
        // Single attempt: the spinner acknowledgment is time-sensitive and
        // purely cosmetic, retrying it after the business logic ran would
        // be pointless.
        let mut request = self.bot.answer_callback_query(callback_id.to_string());
        if let Some(text) = text {
            request = request.text(text.to_string());
        }
        if emphasize {
            request = request.show_alert(true);
        }

        match request.await {
            Ok(_) => true,
            Err(e) => {
                warn!("Failed to answer callback {callback_id}: {e}");
                false
            }
        }
    }
}
