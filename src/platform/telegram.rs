use std::time::Duration;

use futures_core::future::BoxFuture;
use teloxide::prelude::*;
use teloxide::types::{AllowedUpdate, Chat, UpdateKind};
use teloxide::utils::command::BotCommands;
use thiserror::Error;

use super::{ChatPlatform, Event, EventKind, MembershipStatus, Profile};
use crate::failure::PlatformError;
use crate::reconcile::Command;

/// Headroom on top of the long-poll wait before the HTTP client gives up.
const CLIENT_TIMEOUT_MARGIN: Duration = Duration::from_secs(10);

/// The HTTP client teloxide runs on could not be built.
#[derive(Debug, Error)]
#[error("cannot build telegram client: {0}")]
pub struct ClientError(String);

#[derive(Clone)]
pub struct TelegramPlatform {
    bot: Bot,
}

impl TelegramPlatform {
    pub fn new(token: &str, poll_wait: Duration) -> Result<Self, ClientError> {
        // teloxide brings its own reqwest, so its error type is not ours
        let client = teloxide::net::default_reqwest_settings()
            .timeout(poll_wait + CLIENT_TIMEOUT_MARGIN)
            .build()
            .map_err(|e| ClientError(e.to_string()))?;
        Ok(Self {
            bot: Bot::with_client(token, client),
        })
    }

    /// Publishes the command list shown in Telegram's command menu.
    pub async fn register_commands(&self) -> Result<(), PlatformError> {
        self.bot.set_my_commands(Command::bot_commands()).await?;
        Ok(())
    }
}

fn profile(chat: &Chat) -> Profile {
    Profile {
        first_name: chat.first_name().map(str::to_owned),
        last_name: chat.last_name().map(str::to_owned),
        user_name: chat.username().map(str::to_owned),
    }
}

/// Update ids are `u32` on the wire but `getUpdates` takes an `i32` offset.
fn event_id(raw: u32) -> i32 {
    i32::try_from(raw).unwrap_or(i32::MAX)
}

fn poll_timeout(wait: Duration) -> u32 {
    u32::try_from(wait.as_secs()).unwrap_or(u32::MAX)
}

fn convert(update: Update) -> Event {
    let id = event_id(update.id.0);
    let kind = match update.kind {
        UpdateKind::Message(msg) => match msg.text() {
            Some(text) => EventKind::TextMessage {
                chat_id: msg.chat.id,
                text: text.to_owned(),
                profile: profile(&msg.chat),
            },
            None => EventKind::Other,
        },
        UpdateKind::MyChatMember(change) => {
            let kind = &change.new_chat_member.kind;
            let status = if kind.is_banned() {
                MembershipStatus::Kicked
            } else if kind.is_left() {
                MembershipStatus::Left
            } else {
                MembershipStatus::Member
            };
            EventKind::MembershipChanged {
                chat_id: change.chat.id,
                status,
                profile: profile(&change.chat),
            }
        }
        _ => EventKind::Other,
    };
    Event { id, kind }
}

impl ChatPlatform for TelegramPlatform {
    fn verify(&self) -> BoxFuture<'_, Result<String, PlatformError>> {
        Box::pin(async move {
            let me = self.bot.get_me().await?;
            Ok(me.user.username.clone().unwrap_or_default())
        })
    }

    fn fetch_updates(
        &self,
        offset: Option<i32>,
        wait: Duration,
    ) -> BoxFuture<'_, Result<Vec<Event>, PlatformError>> {
        Box::pin(async move {
            let mut request = self
                .bot
                .get_updates()
                .timeout(poll_timeout(wait))
                .allowed_updates(vec![AllowedUpdate::Message, AllowedUpdate::MyChatMember]);
            if let Some(offset) = offset {
                request = request.offset(offset);
            }

            let updates = request.await?;
            log::debug!("Fetched {} updates", updates.len());

            Ok(updates.into_iter().map(convert).collect())
        })
    }

    fn send_message(
        &self,
        chat_id: ChatId,
        text: String,
    ) -> BoxFuture<'_, Result<(), PlatformError>> {
        Box::pin(async move {
            self.bot.send_message(chat_id, text).await?;
            Ok(())
        })
    }
}
