use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use chrono::{NaiveDateTime, NaiveTime, Utc};
use chrono_tz::Tz;
use thiserror::Error;

use crate::rate_source;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("bot token missing, set BOT_TOKEN")]
    MissingToken,
    #[error("invalid value {value:?} for {key}: {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: &'static str,
    },
}

/// Wall clock the daily trigger is evaluated against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Zone {
    Local,
    Named(Tz),
}

impl Zone {
    pub fn now(&self) -> NaiveDateTime {
        match self {
            Zone::Local => chrono::Local::now().naive_local(),
            Zone::Named(tz) => Utc::now().with_timezone(tz).naive_local(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub token: String,
    pub daily_trigger_time: NaiveTime,
    pub poll_wait: Duration,
    pub send_delay: Duration,
    pub retry_pause: Duration,
    pub subscriber_file: PathBuf,
    pub rate_source_url: String,
    pub zone: Zone,
    pub log_file: Option<PathBuf>,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let token = get("BOT_TOKEN")
            .or_else(|| get("TELOXIDE_TOKEN"))
            .ok_or(ConfigError::MissingToken)?;

        let daily_trigger_time = match get("DAILY_TRIGGER_TIME") {
            Some(v) => NaiveTime::parse_from_str(v.trim(), "%H:%M").map_err(|_| {
                ConfigError::Invalid {
                    key: "DAILY_TRIGGER_TIME",
                    value: v.clone(),
                    reason: "expected HH:MM",
                }
            })?,
            None => NaiveTime::from_hms_opt(15, 0, 0).expect("valid time"),
        };

        let poll_wait = match get("POLL_WAIT_SECONDS") {
            Some(v) => Duration::from_secs(parse_number("POLL_WAIT_SECONDS", &v)?),
            None => Duration::from_secs(10),
        };

        let send_delay = match get("SEND_DELAY_SECONDS") {
            Some(v) => parse_seconds("SEND_DELAY_SECONDS", &v)?,
            None => Duration::from_millis(500),
        };

        let retry_pause = match get("RETRY_PAUSE_SECONDS") {
            Some(v) => parse_seconds("RETRY_PAUSE_SECONDS", &v)?,
            None => Duration::from_secs(2),
        };

        let zone = match get("TIMEZONE") {
            Some(v) => Zone::Named(v.trim().parse().map_err(|_| ConfigError::Invalid {
                key: "TIMEZONE",
                value: v.clone(),
                reason: "unknown time zone",
            })?),
            None => Zone::Local,
        };

        Ok(Self {
            token,
            daily_trigger_time,
            poll_wait,
            send_delay,
            retry_pause,
            subscriber_file: get("SUBSCRIBER_FILE")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("users.json")),
            rate_source_url: get("RATE_SOURCE_URL")
                .unwrap_or_else(|| rate_source::DEFAULT_URL.to_owned()),
            zone,
            log_file: get("LOG_FILE").map(PathBuf::from),
        })
    }
}

fn parse_number<T: FromStr>(key: &'static str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::Invalid {
        key,
        value: value.to_owned(),
        reason: "expected a non-negative number",
    })
}

fn parse_seconds(key: &'static str, value: &str) -> Result<Duration, ConfigError> {
    let secs: f64 = parse_number(key, value)?;
    Duration::try_from_secs_f64(secs).map_err(|_| ConfigError::Invalid {
        key,
        value: value.to_owned(),
        reason: "expected a non-negative number of seconds",
    })
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn load(vars: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults() {
        let cfg = load(&[("BOT_TOKEN", "123:abc")]).unwrap();
        assert_eq!(cfg.token, "123:abc");
        assert_eq!(cfg.daily_trigger_time, NaiveTime::from_hms_opt(15, 0, 0).unwrap());
        assert_eq!(cfg.poll_wait, Duration::from_secs(10));
        assert_eq!(cfg.send_delay, Duration::from_millis(500));
        assert_eq!(cfg.retry_pause, Duration::from_secs(2));
        assert_eq!(cfg.subscriber_file, PathBuf::from("users.json"));
        assert_eq!(cfg.rate_source_url, rate_source::DEFAULT_URL);
        assert_eq!(cfg.zone, Zone::Local);
        assert!(cfg.log_file.is_none());
    }

    #[test]
    fn missing_token_is_fatal() {
        assert!(matches!(load(&[]), Err(ConfigError::MissingToken)));
        assert!(matches!(
            load(&[("BOT_TOKEN", "  ")]),
            Err(ConfigError::MissingToken)
        ));
        assert_eq!(load(&[("TELOXIDE_TOKEN", "t")]).unwrap().token, "t");
    }

    #[test]
    fn overrides() {
        let cfg = load(&[
            ("BOT_TOKEN", "t"),
            ("DAILY_TRIGGER_TIME", "09:30"),
            ("POLL_WAIT_SECONDS", "25"),
            ("SEND_DELAY_SECONDS", "0.25"),
            ("SUBSCRIBER_FILE", "/var/lib/relay/users.json"),
            ("TIMEZONE", "Europe/Moscow"),
            ("LOG_FILE", ".log"),
        ])
        .unwrap();
        assert_eq!(cfg.daily_trigger_time, NaiveTime::from_hms_opt(9, 30, 0).unwrap());
        assert_eq!(cfg.poll_wait, Duration::from_secs(25));
        assert_eq!(cfg.send_delay, Duration::from_millis(250));
        assert_eq!(cfg.subscriber_file, PathBuf::from("/var/lib/relay/users.json"));
        assert_eq!(cfg.zone, Zone::Named(chrono_tz::Europe::Moscow));
        assert_eq!(cfg.log_file, Some(PathBuf::from(".log")));
    }

    #[test]
    fn rejects_malformed_values() {
        for (key, value) in [
            ("DAILY_TRIGGER_TIME", "3pm"),
            ("POLL_WAIT_SECONDS", "-1"),
            ("SEND_DELAY_SECONDS", "-0.5"),
            ("TIMEZONE", "Mars/Olympus"),
        ] {
            let err = load(&[("BOT_TOKEN", "t"), (key, value)]).unwrap_err();
            assert!(
                matches!(err, ConfigError::Invalid { key: k, .. } if k == key),
                "{key}={value}: {err}"
            );
        }
    }
}
