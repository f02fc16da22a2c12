use std::time::Duration;

use teloxide::{ApiError, RequestError};
use thiserror::Error;

/// Error surfaced by a [`ChatPlatform`](crate::platform::ChatPlatform)
/// call, already stripped of the transport library's types.
#[derive(Debug, Clone, Error)]
pub enum PlatformError {
    #[error("network failure: {0}")]
    Network(String),
    #[error("request timed out")]
    TimedOut,
    #[error("bad request: {0}")]
    BadRequest(String),
    #[error("recipient rejected the bot: {0}")]
    Unauthorized(String),
    #[error("flood control, retry after {0:?}")]
    RetryAfter(Duration),
    #[error("invalid bot token")]
    InvalidToken,
}

impl From<RequestError> for PlatformError {
    fn from(err: RequestError) -> Self {
        match err {
            RequestError::Api(api) => match api {
                ApiError::InvalidToken => PlatformError::InvalidToken,
                ApiError::BotBlocked
                | ApiError::BotKicked
                | ApiError::BotKickedFromSupergroup
                | ApiError::UserDeactivated
                | ApiError::CantInitiateConversation
                | ApiError::CantTalkWithBots => PlatformError::Unauthorized(api.to_string()),
                ApiError::Unknown(text) if text.starts_with("Forbidden") => {
                    PlatformError::Unauthorized(text)
                }
                other => PlatformError::BadRequest(other.to_string()),
            },
            RequestError::RetryAfter(secs) => PlatformError::RetryAfter(secs.duration()),
            RequestError::Network(e) if e.is_timeout() => PlatformError::TimedOut,
            RequestError::Network(e) => PlatformError::Network(e.to_string()),
            RequestError::Io(e) => PlatformError::Network(e.to_string()),
            RequestError::MigrateToChatId(id) => {
                PlatformError::BadRequest(format!("chat migrated to {id}"))
            }
            RequestError::InvalidJson { source, .. } => PlatformError::BadRequest(source.to_string()),
            #[allow(unreachable_patterns)]
            other => PlatformError::Network(other.to_string()),
        }
    }
}

/// Failure taxonomy shared by both loops.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    TransientNetwork,
    TransientUpstreamData,
    PermanentRecipient,
    FatalStartup,
}

/// What the caller should do about a classified failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Pause, then repeat the same operation.
    Retry,
    /// Give up on this cycle; the next scheduled one tries again.
    SkipCycle,
    /// Drop the subscriber the failed request was addressed to.
    Deregister,
    /// Only valid before the loops are started.
    Abort,
}

impl FailureClass {
    pub fn action(self) -> Action {
        match self {
            FailureClass::TransientNetwork => Action::Retry,
            FailureClass::TransientUpstreamData => Action::SkipCycle,
            FailureClass::PermanentRecipient => Action::Deregister,
            FailureClass::FatalStartup => Action::Abort,
        }
    }
}

pub trait Classify {
    fn class(&self) -> FailureClass;

    fn action(&self) -> Action {
        self.class().action()
    }
}

impl Classify for PlatformError {
    fn class(&self) -> FailureClass {
        match self {
            PlatformError::Network(_) | PlatformError::TimedOut | PlatformError::RetryAfter(_) => {
                FailureClass::TransientNetwork
            }
            // the poll loop retries these just like network errors
            PlatformError::BadRequest(_) => FailureClass::TransientUpstreamData,
            PlatformError::Unauthorized(_) => FailureClass::PermanentRecipient,
            PlatformError::InvalidToken => FailureClass::FatalStartup,
        }
    }
}

impl PlatformError {
    /// How long to wait before repeating the request that produced this error.
    pub fn pause(&self, default: Duration) -> Duration {
        match self {
            PlatformError::RetryAfter(d) => (*d).max(default),
            _ => default,
        }
    }
}
