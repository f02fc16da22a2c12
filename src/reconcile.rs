use std::sync::Arc;
use std::time::Duration;

use teloxide::macros::BotCommands;
use teloxide::types::ChatId;
use teloxide::utils::command::BotCommands as _;
use tokio_util::sync::CancellationToken;

use crate::failure::{Action, Classify, PlatformError};
use crate::platform::{ChatPlatform, Event, EventKind, Profile};
use crate::subscribers::{Error as StoreError, SubscriberStore};

#[derive(BotCommands, Clone, Debug, PartialEq, Eq)]
#[command(rename_rule = "lowercase", description = "These commands are supported:")]
pub enum Command {
    #[command(description = "subscribe to the daily dollar exchange rate.")]
    Start,
}

/// Offset of the next update to fetch. Unset until the first event is seen.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PollCursor(Option<i32>);

impl PollCursor {
    pub fn offset(self) -> Option<i32> {
        self.0
    }

    pub fn advance_past(&mut self, id: i32) {
        let next = id.saturating_add(1);
        if self.0.map_or(true, |current| next > current) {
            self.0 = Some(next);
        }
    }
}

pub struct ReconciliationLoop {
    store: SubscriberStore,
    platform: Arc<dyn ChatPlatform>,
    bot_name: String,
    greeting: String,
    poll_wait: Duration,
    retry_pause: Duration,
    cursor: PollCursor,
}

impl ReconciliationLoop {
    pub fn new(
        store: SubscriberStore,
        platform: Arc<dyn ChatPlatform>,
        bot_name: String,
        greeting: String,
        poll_wait: Duration,
        retry_pause: Duration,
    ) -> Self {
        Self {
            store,
            platform,
            bot_name,
            greeting,
            poll_wait,
            retry_pause,
            cursor: PollCursor::default(),
        }
    }

    pub fn cursor(&self) -> PollCursor {
        self.cursor
    }

    fn is_start(&self, text: &str) -> bool {
        matches!(Command::parse(text, &self.bot_name), Ok(Command::Start))
    }

    /// Fetches one batch and handles it. The cursor moves past every event
    /// of the batch, whatever happened while handling it.
    pub async fn poll_once(&mut self) -> Result<usize, PlatformError> {
        let events = self
            .platform
            .fetch_updates(self.cursor.offset(), self.poll_wait)
            .await?;

        let count = events.len();
        for event in events {
            self.handle_event(&event).await;
            self.cursor.advance_past(event.id);
        }

        Ok(count)
    }

    async fn handle_event(&self, event: &Event) {
        match &event.kind {
            EventKind::MembershipChanged {
                chat_id,
                status,
                profile,
            } if status.is_removed() => self.deregister(*chat_id, profile).await,
            EventKind::TextMessage {
                chat_id,
                text,
                profile,
            } if self.is_start(text) => self.handle_start(*chat_id, profile).await,
            _ => log::debug!("Ignoring update {}", event.id),
        }
    }

    async fn handle_start(&self, chat_id: ChatId, profile: &Profile) {
        if !self.store.is_active(chat_id).await {
            match self.store.add(chat_id, profile.clone()).await {
                Ok(()) => log::info!("Chat {chat_id} subscribed ({profile:?})"),
                Err(StoreError::AlreadyRegistered(_)) => {}
                Err(e) => log::error!("Failed to subscribe chat {chat_id}: {e}"),
            }
        }

        if let Err(e) = self
            .platform
            .send_message(chat_id, self.greeting.clone())
            .await
        {
            match e.action() {
                Action::Deregister => self.deregister(chat_id, profile).await,
                _ => log::warn!("Couldn't greet chat {chat_id}: {e}"),
            }
        }
    }

    async fn deregister(&self, chat_id: ChatId, profile: &Profile) {
        if !self.store.is_active(chat_id).await {
            return;
        }

        match self.store.remove(chat_id).await {
            Ok(_) => log::info!("Chat {chat_id} has removed or blocked the bot ({profile:?})"),
            Err(StoreError::NotFound(_)) => {}
            Err(e) => log::error!("Failed to unsubscribe chat {chat_id}: {e}"),
        }
    }

    pub async fn run(mut self, cancel: CancellationToken) {
        log::info!("Starting reconciliation loop");

        while !cancel.is_cancelled() {
            let Err(e) = self.poll_once().await else {
                continue;
            };

            log::error!("Fetching updates failed ({:?}): {e}", e.class());
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(e.pause(self.retry_pause)) => {}
            }
        }

        log::info!(
            "Reconciliation loop shut down at offset {:?}.",
            self.cursor().offset()
        );
    }
}
