pub mod conversation;
pub mod cursor;
pub mod inbox;
pub mod message;

// Re-export for convenience
pub use conversation::{ConversationKey, SYSTEM_USER_ID};
pub use cursor::ThreadCursor;
pub use inbox::InboxEntry;
pub use message::{Message, MessageId, MessageKind, NewMessage};
