mod broadcast;
mod config;
mod failure;
mod messages;
mod platform;
mod rate_source;
mod reconcile;
mod subscribers;

use std::fs::OpenOptions;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use broadcast::BroadcastScheduler;
use config::{Config, ConfigError};
use failure::{Action, Classify, PlatformError};
use platform::{ChatPlatform, ClientError, TelegramPlatform};
use rate_source::HttpRateSource;
use reconcile::ReconciliationLoop;
use subscribers::SubscriberStore;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Error)]
enum StartupError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("cannot open log file: {0}")]
    LogFile(std::io::Error),
    #[error("cannot load subscribers: {0}")]
    Store(#[from] subscribers::Error),
    #[error(transparent)]
    Client(#[from] ClientError),
    #[error("cannot build rate source: {0}")]
    RateSource(#[from] rate_source::Error),
    #[error("telegram rejected the bot token: {0}")]
    Credential(PlatformError),
    #[error("cannot listen for shutdown signals: {0}")]
    Signal(std::io::Error),
}

fn init_logging(log_file: Option<&Path>) -> Result<(), StartupError> {
    let mut builder =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"));

    let file = log_file.map(|path| OpenOptions::new().create(true).append(true).open(path));
    let result = match file {
        Some(Ok(file)) => {
            builder.target(env_logger::Target::Pipe(Box::new(file)));
            Ok(())
        }
        Some(Err(e)) => Err(StartupError::LogFile(e)),
        None => Ok(()),
    };

    builder.init();
    result
}

/// Resolves the bot's username, waiting out transient failures.
async fn verify_token(
    platform: &dyn ChatPlatform,
    retry_pause: Duration,
) -> Result<String, StartupError> {
    loop {
        match platform.verify().await {
            Ok(name) => return Ok(name),
            Err(e) if e.action() == Action::Abort => return Err(StartupError::Credential(e)),
            Err(e) => {
                log::warn!("Couldn't reach telegram ({:?}): {e}", e.class());
                tokio::time::sleep(e.pause(retry_pause)).await;
            }
        }
    }
}

/// Resolves on Ctrl-C or SIGTERM.
#[cfg(unix)]
async fn shutdown_signal() -> std::io::Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut terminate = signal(SignalKind::terminate())?;
    tokio::select! {
        result = tokio::signal::ctrl_c() => result,
        _ = terminate.recv() => {
            log::info!("Received SIGTERM");
            Ok(())
        }
    }
}

#[cfg(not(unix))]
async fn shutdown_signal() -> std::io::Result<()> {
    tokio::signal::ctrl_c().await
}

async fn run() -> Result<(), StartupError> {
    let config = Config::from_env();
    init_logging(config.as_ref().ok().and_then(|c| c.log_file.as_deref()))?;
    let config = config?;

    log::info!("Starting bot...");

    let store = SubscriberStore::open(&config.subscriber_file).await?;

    let telegram = TelegramPlatform::new(&config.token, config.poll_wait)?;
    let bot_name = verify_token(&telegram, config.retry_pause).await?;
    log::info!("Bot has been authorized as @{bot_name}");

    if let Err(e) = telegram.register_commands().await {
        log::warn!("Couldn't register bot commands: {e}");
    }

    let platform: Arc<dyn ChatPlatform> = Arc::new(telegram);
    let rates = Arc::new(HttpRateSource::new(config.rate_source_url.clone())?);
    let cancel = CancellationToken::new();

    let reconcile = ReconciliationLoop::new(
        store.clone(),
        platform.clone(),
        bot_name,
        messages::greeting(config.daily_trigger_time),
        config.poll_wait,
        config.retry_pause,
    );
    let reconcile = tokio::spawn(reconcile.run(cancel.clone()));

    let broadcast = BroadcastScheduler::new(
        store,
        platform,
        rates,
        config.daily_trigger_time,
        config.zone,
        config.send_delay,
    );
    let broadcast = tokio::spawn(broadcast.run(cancel.clone()));

    let signal = shutdown_signal().await;

    log::info!("Shutting down, waiting for loops to finish...");
    cancel.cancel();
    let (reconciled, broadcasted) = tokio::join!(reconcile, broadcast);
    for result in [reconciled, broadcasted] {
        if let Err(e) = result {
            log::error!("Loop task failed: {e}");
        }
    }
    log::info!("Bot has been stopped");

    signal.map_err(StartupError::Signal)
}

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        log::error!("{e}");
        std::process::exit(1);
    }
}
