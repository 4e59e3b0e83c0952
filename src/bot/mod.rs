pub mod callback;
pub mod gateway;
pub mod handler;
pub mod poller;

pub use callback::CallbackAction;
pub use gateway::{BotGateway, TelegramGateway};
pub use handler::PaymentCallbackHandler;
pub use poller::{PollOutcome, PollRunner, PollSummary};
