pub mod inbox_service;
pub mod message_service;
pub mod notifier;
pub mod read_state;
pub mod status_classifier;
pub mod thread_service;

pub use inbox_service::{DriftReport, InboxService};
pub use message_service::{MessageService, SendMessage};
pub use notifier::{SystemNotifier, TemplateKind};
pub use read_state::ReadStateService;
pub use status_classifier::{classify_thread, ConversationStatus};
pub use thread_service::{ThreadPage, ThreadService};
