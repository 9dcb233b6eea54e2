pub mod broker;
pub mod db;
pub mod openai_chat;
pub mod pdf;
pub mod vision;

pub use broker::AiBrokerAdapter;
pub use db::PgStore;
pub use openai_chat::{azure_client, openai_client, OpenAiChatAdapter};
pub use pdf::PdftoppmRasterizer;
pub use vision::OpenAiVisionAdapter;
