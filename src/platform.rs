mod telegram;

use std::time::Duration;

use futures_core::future::BoxFuture;
use serde::{Deserialize, Serialize};
use teloxide::types::ChatId;

use crate::failure::PlatformError;

pub use telegram::{ClientError, TelegramPlatform};

/// Display attributes of a chat. Never used for identity.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Profile {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub user_name: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MembershipStatus {
    Member,
    Left,
    Kicked,
}

impl MembershipStatus {
    /// The user removed or blocked the bot.
    pub fn is_removed(self) -> bool {
        matches!(self, MembershipStatus::Left | MembershipStatus::Kicked)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventKind {
    MembershipChanged {
        chat_id: ChatId,
        status: MembershipStatus,
        profile: Profile,
    },
    TextMessage {
        chat_id: ChatId,
        text: String,
        profile: Profile,
    },
    Other,
}

/// One inbound update, in the order the platform delivered it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    pub id: i32,
    pub kind: EventKind,
}

/// The operations the relay needs from a chat platform.
pub trait ChatPlatform: Send + Sync + 'static {
    /// Returns the bot's username; fails with
    /// [`PlatformError::InvalidToken`] if the credential is rejected.
    fn verify(&self) -> BoxFuture<'_, Result<String, PlatformError>>;

    /// Long-polls for events with id `>= offset`, waiting at most `wait`.
    fn fetch_updates(
        &self,
        offset: Option<i32>,
        wait: Duration,
    ) -> BoxFuture<'_, Result<Vec<Event>, PlatformError>>;

    fn send_message(&self, chat_id: ChatId, text: String)
        -> BoxFuture<'_, Result<(), PlatformError>>;
}
