pub mod bot;
pub mod config;
pub mod database;
pub mod error;
pub mod retry;
pub mod utils;

pub use bot::{
    BotGateway, CallbackAction, PaymentCallbackHandler, PollOutcome, PollRunner, PollSummary,
    TelegramGateway,
};
pub use config::Settings;
pub use database::{models, DatabaseOperations};
pub use error::{Result, SettleBotError};
