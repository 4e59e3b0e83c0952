use std::sync::Arc;

use anyhow::Result;
use dotenv::dotenv;
use log::info;
use teloxide::Bot;

use settlebot::bot::{BotGateway, PaymentCallbackHandler, PollOutcome, PollRunner, TelegramGateway};
use settlebot::config::Settings;
use settlebot::database::DatabaseOperations;
use settlebot::utils::Logger;

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();
    env_logger::init();

    Logger::log_operation_start("SettleBot", "Initializing polling run");

    let settings = match Settings::new() {
        Ok(s) => {
            Logger::log_operation_success("Configuration", "Settings loaded successfully");
            s
        }
        Err(e) => {
            Logger::log_operation_failure("Configuration", &e.to_string());
            return Err(e);
        }
    };

    if let Err(e) = settings.validate() {
        Logger::log_operation_failure("Configuration validation", &e.to_string());
        return Err(e);
    }

    let db = match DatabaseOperations::new(&settings.database_url).await {
        Ok(db) => {
            Logger::log_operation_success("Database", "Database initialized successfully");
            db
        }
        Err(e) => {
            Logger::log_operation_failure("Database", &e.to_string());
            return Err(e.into());
        }
    };

    let bot = Bot::new(settings.telegram_bot_token.clone());
    let gateway: Arc<dyn TelegramGateway> =
        Arc::new(BotGateway::new(bot, settings.max_retry_attempts));
    let handler = PaymentCallbackHandler::new(gateway.clone(), db.clone());
    let runner = PollRunner::new(gateway, handler, db, settings.lock_file.clone());

    info!("🤖 {} polling run starting", settings.bot_name);
    info!("  - Database: {}", settings.database_url);
    info!("  - Poll timeout: {}s", settings.poll_timeout_secs);
    info!("  - Lock file: {}", settings.lock_file);

    match runner.run_once(settings.poll_timeout_secs).await {
        Ok(PollOutcome::Ran(summary)) => {
            Logger::log_operation_success(
                "Polling",
                &format!(
                    "processed={} errors={} total={}",
                    summary.processed, summary.errors, summary.total
                ),
            );
        }
        Ok(PollOutcome::AlreadyRunning) => {
            info!("Another instance already running. Skipping.");
        }
        Err(e) => {
            Logger::log_operation_failure("Polling", &e.to_string());
            return Err(e.into());
        }
    }

    Ok(())
}
