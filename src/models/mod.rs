pub mod conversation;
pub mod message;
pub mod user;

pub use conversation::Conversation;
pub use message::{Message, MessageStatus};
pub use user::User;
