use std::sync::Arc;

use crate::{
    config::Config,
    events::EventBus,
    services::{
        InboxService, MessageService, ReadStateService, SystemNotifier, ThreadService,
    },
    store::MessagingStore,
};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub store: Arc<dyn MessagingStore>,
    pub events: EventBus,
    pub messages: MessageService,
    pub reads: ReadStateService,
    pub inbox: InboxService,
    pub threads: ThreadService,
    pub notifier: SystemNotifier,
}

impl AppState {
    /// Wire every service around one store and one event bus.
    pub fn new(config: Arc<Config>, store: Arc<dyn MessagingStore>) -> Self {
        let limits = config.limits.clone();
        let events = EventBus::new(config.event_buffer_size);
        let messages = MessageService::new(store.clone(), events.clone(), limits.clone());

        Self {
            reads: ReadStateService::new(store.clone(), events.clone()),
            inbox: InboxService::new(store.clone(), limits.inbox_preview_chars),
            threads: ThreadService::new(store.clone(), limits),
            notifier: SystemNotifier::new(messages.clone()),
            messages,
            events,
            store,
            config,
        }
    }
}
