use std::time::Duration;

use futures_core::future::BoxFuture;
use serde::Deserialize;
use thiserror::Error;

use crate::failure::{Classify, FailureClass};

pub const DEFAULT_URL: &str = "https://www.cbr-xml-daily.ru/daily_json.js";

#[derive(Debug, Error)]
pub enum Error {
    #[error("failed to reach rate source: {0}")]
    Reqwest(#[from] reqwest::Error),
    #[error("rate source answered with status {0}")]
    Status(reqwest::StatusCode),
    #[error("invalid rate payload: {0}")]
    Payload(#[from] serde_json::Error),
}

impl Classify for Error {
    fn class(&self) -> FailureClass {
        match self {
            Error::Reqwest(_) => FailureClass::TransientNetwork,
            Error::Status(_) | Error::Payload(_) => FailureClass::TransientUpstreamData,
        }
    }
}

#[derive(Deserialize)]
struct DailyRates {
    #[serde(rename = "Valute")]
    valute: Valute,
}

#[derive(Deserialize)]
struct Valute {
    #[serde(rename = "USD")]
    usd: Currency,
}

#[derive(Deserialize)]
struct Currency {
    #[serde(rename = "Value")]
    value: f64,
}

/// Extracts `Valute.USD.Value` from the daily rates document.
pub fn parse_usd(body: &str) -> Result<f64, Error> {
    let rates: DailyRates = serde_json::from_str(body)?;
    Ok(rates.valute.usd.value)
}

pub trait RateSource: Send + Sync + 'static {
    fn fetch_usd(&self) -> BoxFuture<'_, Result<f64, Error>>;
}

pub struct HttpRateSource {
    client: reqwest::Client,
    url: String,
}

impl HttpRateSource {
    pub fn new(url: impl Into<String>) -> Result<Self, Error> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

impl RateSource for HttpRateSource {
    fn fetch_usd(&self) -> BoxFuture<'_, Result<f64, Error>> {
        Box::pin(async move {
            log::info!("Get rates from {}", self.url);
            let response = self.client.get(&self.url).send().await?;

            let status = response.status();
            if status != reqwest::StatusCode::OK {
                return Err(Error::Status(status));
            }

            let body = response.text().await?;
            parse_usd(&body)
        })
    }
}
