mod snapshot;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use teloxide::types::ChatId;
use thiserror::Error;
use tokio::sync::Mutex;

use crate::failure::{Action, Classify};
use crate::platform::{ChatPlatform, Profile};
use snapshot::Snapshot;

#[derive(Debug, Error)]
pub enum Error {
    #[error("chat {0} is already subscribed")]
    AlreadyRegistered(ChatId),
    #[error("chat {0} is not subscribed")]
    NotFound(ChatId),
    #[error("failed to access subscriber file: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid subscriber file: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Subscriber {
    #[serde(flatten)]
    pub profile: Profile,
    pub chat_id: ChatId,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    pub delivered: usize,
    pub removed: usize,
    pub failed: usize,
}

struct Registry {
    subscribers: Vec<Subscriber>,
    snapshot: Snapshot,
}

impl Registry {
    fn contains(&self, chat_id: ChatId) -> bool {
        self.subscribers.iter().any(|s| s.chat_id == chat_id)
    }
}

/// The set of subscribers plus its persisted snapshot.
///
/// Every mutation holds the lock until the snapshot has been rewritten, so
/// the file and the in-memory registry never disagree once a call returns,
/// and a failed write leaves both untouched.
#[derive(Clone)]
pub struct SubscriberStore {
    inner: Arc<Mutex<Registry>>,
}

impl SubscriberStore {
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self, Error> {
        let snapshot = Snapshot::new(path);
        let subscribers = snapshot.load().await?;
        log::info!(
            "Loaded {} subscribers from {}",
            subscribers.len(),
            snapshot.path().display()
        );

        Ok(Self {
            inner: Arc::new(Mutex::new(Registry {
                subscribers,
                snapshot,
            })),
        })
    }

    pub async fn is_active(&self, chat_id: ChatId) -> bool {
        self.inner.lock().await.contains(chat_id)
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.subscribers.len()
    }

    pub async fn subscribers(&self) -> Vec<Subscriber> {
        self.inner.lock().await.subscribers.clone()
    }

    pub async fn add(&self, chat_id: ChatId, profile: Profile) -> Result<(), Error> {
        let mut registry = self.inner.lock().await;
        if registry.contains(chat_id) {
            return Err(Error::AlreadyRegistered(chat_id));
        }

        let mut next = registry.subscribers.clone();
        next.push(Subscriber { profile, chat_id });
        registry.snapshot.save(&next).await?;
        registry.subscribers = next;

        Ok(())
    }

    pub async fn remove(&self, chat_id: ChatId) -> Result<Subscriber, Error> {
        let mut registry = self.inner.lock().await;
        let Some(idx) = registry.subscribers.iter().position(|s| s.chat_id == chat_id) else {
            return Err(Error::NotFound(chat_id));
        };

        let mut next = registry.subscribers.clone();
        let removed = next.remove(idx);
        registry.snapshot.save(&next).await?;
        registry.subscribers = next;

        Ok(removed)
    }

    /// Sends `text` to every subscriber, pausing `pacing` after each send.
    ///
    /// Recipients that reject the bot are removed during the pass. Other
    /// failures, including a removal that could not be persisted, are
    /// logged and left for the next broadcast.
    pub async fn broadcast(
        &self,
        platform: &dyn ChatPlatform,
        text: &str,
        pacing: Duration,
    ) -> BroadcastReport {
        let mut report = BroadcastReport::default();

        for sub in self.subscribers().await {
            let chat_id = sub.chat_id;
            if !self.is_active(chat_id).await {
                log::debug!("Chat {chat_id} left during the broadcast, skipping");
                continue;
            }

            match platform.send_message(chat_id, text.to_owned()).await {
                Ok(()) => {
                    log::debug!("Rate sent to chat {chat_id} ({:?})", sub.profile);
                    report.delivered += 1;
                }
                Err(e) if e.action() == Action::Deregister => {
                    log::info!("Chat {chat_id} has removed or blocked the bot: {e}");
                    match self.remove(chat_id).await {
                        Ok(_) | Err(Error::NotFound(_)) => report.removed += 1,
                        Err(e) => {
                            log::error!("Failed to remove chat {chat_id}: {e}");
                            report.failed += 1;
                        }
                    }
                }
                Err(e) => {
                    log::warn!("Couldn't send rate to chat {chat_id}: {e}");
                    report.failed += 1;
                }
            }

            if !pacing.is_zero() {
                tokio::time::sleep(pacing).await;
            }
        }

        report
    }
}
