use async_trait::async_trait;
use chrono::NaiveDateTime;
use quotefeed_core::*;
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

use crate::http::{build_client, get_json, parse_decimal};

const DEFAULT_BASE_URL: &str = "https://www.alphavantage.co/query";

/// Keys Alpha Vantage uses to report failures inside a 200 response.
const ERROR_KEYS: &[&str] = &["Error Message", "Note", "Information"];

/// Alpha Vantage quote source (`GLOBAL_QUOTE` and `TIME_SERIES_INTRADAY`).
pub struct AlphaVantageSource {
    api_key: String,
    base_url: String,
    timeout: Duration,
    client: reqwest::Client,
}

impl AlphaVantageSource {
    pub fn new(api_key: &str, timeout: Duration) -> Result<Self, QuoteError> {
        Ok(Self {
            api_key: api_key.to_string(),
            base_url: DEFAULT_BASE_URL.to_string(),
            timeout,
            client: build_client(timeout)?,
        })
    }

    /// Point the source at another host (a proxy or a local fake).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }
}

#[async_trait]
impl QuoteSource for AlphaVantageSource {
    fn name(&self) -> &str {
        "alpha_vantage"
    }

    async fn fetch_quote(&self, symbol: &str) -> Result<Quote, QuoteError> {
        let body = get_json(
            &self.client,
            "alphavantage",
            &self.base_url,
            &[
                ("function", "GLOBAL_QUOTE"),
                ("symbol", symbol),
                ("apikey", &self.api_key),
            ],
            self.timeout,
        )
        .await?;
        parse_global_quote(&body, symbol)
    }

    async fn fetch_intraday(
        &self,
        symbol: &str,
        interval: &str,
        limit: usize,
    ) -> Result<Vec<Candle>, QuoteError> {
        let body = get_json(
            &self.client,
            "alphavantage",
            &self.base_url,
            &[
                ("function", "TIME_SERIES_INTRADAY"),
                ("symbol", symbol),
                ("interval", interval),
                ("outputsize", "compact"),
                ("datatype", "json"),
                ("apikey", &self.api_key),
            ],
            self.timeout,
        )
        .await?;
        parse_intraday(&body, limit)
    }
}

fn vendor_error(body: &Value) -> Option<QuoteError> {
    ERROR_KEYS.iter().find_map(|key| {
        body.get(*key)
            .and_then(Value::as_str)
            .map(|msg| QuoteError::Upstream(format!("alphavantage: {}", msg)))
    })
}

fn field<'a>(fields: &'a serde_json::Map<String, Value>, key: &str) -> &'a str {
    fields.get(key).and_then(Value::as_str).unwrap_or("")
}

/// Decode a `GLOBAL_QUOTE` body.
pub fn parse_global_quote(body: &Value, symbol: &str) -> Result<Quote, QuoteError> {
    if let Some(err) = vendor_error(body) {
        return Err(err);
    }
    let fields = body
        .get("Global Quote")
        .and_then(Value::as_object)
        .filter(|m| !m.is_empty())
        .ok_or_else(|| QuoteError::NotFound(symbol.to_string()))?;

    let reported = field(fields, "01. symbol");
    let trading_day = field(fields, "07. latest trading day");

    Ok(Quote {
        symbol: if reported.is_empty() {
            symbol.to_string()
        } else {
            normalize_symbol(reported)
        },
        open: parse_decimal(field(fields, "02. open"), "open")?,
        high: parse_decimal(field(fields, "03. high"), "high")?,
        low: parse_decimal(field(fields, "04. low"), "low")?,
        price: parse_decimal(field(fields, "05. price"), "price")?,
        previous_close: parse_decimal(field(fields, "08. previous close"), "previous close")?,
        change: parse_decimal(field(fields, "09. change"), "change")?,
        change_percent: parse_decimal(field(fields, "10. change percent"), "change percent")?,
        timestamp: (!trading_day.is_empty()).then(|| trading_day.to_string()),
    })
}

/// Decode a `TIME_SERIES_INTRADAY` body into ascending candles.
pub fn parse_intraday(body: &Value, limit: usize) -> Result<Vec<Candle>, QuoteError> {
    if let Some(err) = vendor_error(body) {
        return Err(err);
    }
    let series = body
        .as_object()
        .and_then(|top| {
            top.iter()
                .find(|(key, _)| key.starts_with("Time Series ("))
                .and_then(|(_, v)| v.as_object())
        })
        .ok_or_else(|| QuoteError::Upstream("alphavantage: no time series in response".into()))?;

    let mut candles = Vec::with_capacity(series.len());
    for (ts, bar) in series {
        let Some(bar) = bar.as_object() else {
            continue;
        };
        let time = match NaiveDateTime::parse_from_str(ts, "%Y-%m-%d %H:%M:%S") {
            Ok(t) => t.and_utc(),
            Err(_) => {
                debug!(timestamp = %ts, "Skipping candle with unparseable timestamp");
                continue;
            }
        };
        let volume = parse_decimal(field(bar, "5. volume"), "volume")?;
        candles.push(Candle {
            time,
            open: parse_decimal(field(bar, "1. open"), "open")?,
            high: parse_decimal(field(bar, "2. high"), "high")?,
            low: parse_decimal(field(bar, "3. low"), "low")?,
            close: parse_decimal(field(bar, "4. close"), "close")?,
            volume: volume.trunc().try_into().unwrap_or(i64::MAX),
        });
    }

    Ok(latest_candles(candles, limit))
}
