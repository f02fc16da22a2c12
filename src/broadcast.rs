use std::sync::Arc;
use std::time::Duration;

use chrono::{Days, NaiveDate, NaiveDateTime, NaiveTime};
use tokio_util::sync::CancellationToken;

use crate::config::Zone;
use crate::failure::Classify;
use crate::messages;
use crate::platform::ChatPlatform;
use crate::rate_source::RateSource;
use crate::subscribers::{BroadcastReport, SubscriberStore};

/// Longest single sleep while waiting for the trigger.
const MAX_TICK: Duration = Duration::from_secs(30);

/// First occurrence of `at` strictly after `now`.
pub fn next_trigger(now: NaiveDateTime, at: NaiveTime) -> NaiveDateTime {
    let today = now.date().and_time(at);
    if today > now {
        return today;
    }
    now.date()
        .checked_add_days(Days::new(1))
        .map(|d| d.and_time(at))
        .unwrap_or(NaiveDateTime::MAX)
}

fn until(now: NaiveDateTime, trigger: NaiveDateTime) -> Duration {
    (trigger - now).to_std().unwrap_or(Duration::ZERO).min(MAX_TICK)
}

pub struct BroadcastScheduler {
    store: SubscriberStore,
    platform: Arc<dyn ChatPlatform>,
    rates: Arc<dyn RateSource>,
    trigger_at: NaiveTime,
    zone: Zone,
    send_delay: Duration,
}

impl BroadcastScheduler {
    pub fn new(
        store: SubscriberStore,
        platform: Arc<dyn ChatPlatform>,
        rates: Arc<dyn RateSource>,
        trigger_at: NaiveTime,
        zone: Zone,
        send_delay: Duration,
    ) -> Self {
        Self {
            store,
            platform,
            rates,
            trigger_at,
            zone,
            send_delay,
        }
    }

    /// Fetches today's rate and sends it to every subscriber. A failed
    /// fetch skips the day: nothing is sent and nothing is retried.
    pub async fn fire(&self, today: NaiveDate) -> Option<BroadcastReport> {
        let value = match self.rates.fetch_usd().await {
            Ok(value) => value,
            Err(e) => {
                log::error!(
                    "Skipping today's broadcast, rate fetch failed ({:?}): {e}",
                    e.class()
                );
                return None;
            }
        };

        log::info!(
            "Broadcasting rate {value} to {} subscribers",
            self.store.len().await
        );
        let text = messages::daily_rate(today, value);
        let report = self
            .store
            .broadcast(self.platform.as_ref(), &text, self.send_delay)
            .await;

        log::info!(
            "Broadcast done: {} delivered, {} removed, {} failed",
            report.delivered,
            report.removed,
            report.failed
        );
        Some(report)
    }

    pub async fn run(self, cancel: CancellationToken) {
        let mut next = next_trigger(self.zone.now(), self.trigger_at);
        log::info!("Starting broadcast scheduler, next broadcast at {next}");

        while !cancel.is_cancelled() {
            let now = self.zone.now();
            if now >= next {
                self.fire(now.date()).await;
                next = next_trigger(self.zone.now(), self.trigger_at);
                log::info!("Next broadcast at {next}");
                continue;
            }

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(until(now, next)) => {}
            }
        }

        log::info!("Broadcast scheduler shut down.");
    }
}

#[cfg(test)]
mod tests {
    use futures_core::future::BoxFuture;
    use teloxide::types::ChatId;

    use super::*;
    use crate::failure::PlatformError;
    use crate::platform::fake::FakePlatform;
    use crate::platform::Profile;
    use crate::rate_source::Error as RateError;

    enum FakeRates {
        Value(f64),
        Unavailable,
    }

    impl RateSource for FakeRates {
        fn fetch_usd(&self) -> BoxFuture<'_, Result<f64, RateError>> {
            let result = match self {
                FakeRates::Value(v) => Ok(*v),
                FakeRates::Unavailable => {
                    Err(RateError::Status(reqwest::StatusCode::SERVICE_UNAVAILABLE))
                }
            };
            Box::pin(async move { result })
        }
    }

    fn at(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 10, d).unwrap()
    }

    async fn scheduler(
        dir: &tempfile::TempDir,
        rates: FakeRates,
    ) -> (BroadcastScheduler, SubscriberStore, Arc<FakePlatform>) {
        let store = SubscriberStore::open(dir.path().join("users.json"))
            .await
            .unwrap();
        store.add(ChatId(42), Profile::default()).await.unwrap();
        store.add(ChatId(7), Profile::default()).await.unwrap();

        let platform = Arc::new(FakePlatform::default());
        let scheduler = BroadcastScheduler::new(
            store.clone(),
            platform.clone(),
            Arc::new(rates),
            at(15, 0),
            Zone::Local,
            Duration::ZERO,
        );
        (scheduler, store, platform)
    }

    #[test]
    fn trigger_later_today() {
        let now = day(19).and_time(at(9, 12));
        assert_eq!(next_trigger(now, at(15, 0)), day(19).and_time(at(15, 0)));
    }

    #[test]
    fn trigger_passed_moves_to_tomorrow() {
        let now = day(19).and_time(at(15, 0));
        assert_eq!(next_trigger(now, at(15, 0)), day(20).and_time(at(15, 0)));

        let now = day(31).and_time(at(23, 59));
        assert_eq!(
            next_trigger(now, at(15, 0)),
            NaiveDate::from_ymd_opt(2026, 11, 1).unwrap().and_time(at(15, 0))
        );
    }

    #[test]
    fn sleeps_are_capped() {
        let now = day(19).and_time(at(9, 0));
        assert_eq!(until(now, day(19).and_time(at(15, 0))), MAX_TICK);
        assert_eq!(
            until(now, now + chrono::Duration::seconds(4)),
            Duration::from_secs(4)
        );
        assert_eq!(until(now, now - chrono::Duration::seconds(4)), Duration::ZERO);
    }

    #[tokio::test]
    async fn unauthorized_recipient_is_dropped() {
        let dir = tempfile::tempdir().unwrap();
        let (scheduler, store, platform) = scheduler(&dir, FakeRates::Value(93.25)).await;
        platform.fail_sends_to(ChatId(7), PlatformError::Unauthorized("blocked".into()));

        let report = scheduler.fire(day(19)).await.unwrap();

        assert_eq!(
            report,
            BroadcastReport {
                delivered: 1,
                removed: 1,
                failed: 0
            }
        );
        let ids: Vec<_> = store.subscribers().await.iter().map(|s| s.chat_id).collect();
        assert_eq!(ids, vec![ChatId(42)]);
        assert_eq!(
            platform.sent(),
            vec![(
                ChatId(42),
                "Dollar exchange rate for today (19/10/2026): 93.25 💵".to_owned()
            )]
        );
    }

    #[tokio::test]
    async fn unavailable_source_skips_the_day() {
        let dir = tempfile::tempdir().unwrap();
        let (scheduler, store, platform) = scheduler(&dir, FakeRates::Unavailable).await;

        assert_eq!(scheduler.fire(day(19)).await, None);
        assert!(platform.sent().is_empty());
        assert_eq!(store.len().await, 2);
    }

    #[tokio::test]
    async fn run_stops_on_cancel() {
        let dir = tempfile::tempdir().unwrap();
        let (scheduler, _store, platform) = scheduler(&dir, FakeRates::Value(1.0)).await;

        let cancel = CancellationToken::new();
        let task = tokio::spawn(scheduler.run(cancel.clone()));
        tokio::time::sleep(Duration::from_millis(20)).await;
        cancel.cancel();

        tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .unwrap()
            .unwrap();
        assert!(platform.sent().is_empty());
    }
}
