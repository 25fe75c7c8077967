use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use quotefeed_core::*;
use serde::Deserialize;
use std::time::Duration;

use crate::http::{build_client, float_to_decimal, get_json};

const DEFAULT_BASE_URL: &str = "https://finnhub.io/api/v1";

/// Finnhub quote source (`/quote` and `/stock/candle`).
pub struct FinnhubSource {
    api_key: String,
    base_url: String,
    timeout: Duration,
    client: reqwest::Client,
}

/// Body of `/quote`. Finnhub answers unknown symbols with zeros and nulls.
#[derive(Debug, Deserialize)]
struct FinnhubQuote {
    /// Current price.
    c: f64,
    /// Change.
    d: Option<f64>,
    /// Percent change.
    dp: Option<f64>,
    h: f64,
    l: f64,
    o: f64,
    /// Previous close.
    pc: f64,
    /// Unix seconds.
    #[serde(default)]
    t: i64,
}

/// Body of `/stock/candle`: parallel arrays plus a status.
#[derive(Debug, Deserialize)]
struct FinnhubCandles {
    s: String,
    #[serde(default)]
    t: Vec<i64>,
    #[serde(default)]
    o: Vec<f64>,
    #[serde(default)]
    h: Vec<f64>,
    #[serde(default)]
    l: Vec<f64>,
    #[serde(default)]
    c: Vec<f64>,
    #[serde(default)]
    v: Vec<f64>,
}

impl FinnhubSource {
    pub fn new(api_key: &str, timeout: Duration) -> Result<Self, QuoteError> {
        Ok(Self {
            api_key: api_key.to_string(),
            base_url: DEFAULT_BASE_URL.to_string(),
            timeout,
            client: build_client(timeout)?,
        })
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }
}

#[async_trait]
impl QuoteSource for FinnhubSource {
    fn name(&self) -> &str {
        "finnhub"
    }

    async fn fetch_quote(&self, symbol: &str) -> Result<Quote, QuoteError> {
        let url = format!("{}/quote", self.base_url);
        let body = get_json(
            &self.client,
            "finnhub",
            &url,
            &[("symbol", symbol), ("token", &self.api_key)],
            self.timeout,
        )
        .await?;
        parse_quote(body, symbol)
    }

    async fn fetch_intraday(
        &self,
        symbol: &str,
        interval: &str,
        limit: usize,
    ) -> Result<Vec<Candle>, QuoteError> {
        let resolution = resolution_for(interval);
        let to = Utc::now();
        let lookback = if resolution == "D" {
            chrono::Duration::days(365)
        } else {
            chrono::Duration::days(7)
        };
        let from = (to - lookback).timestamp().to_string();
        let to = to.timestamp().to_string();

        let url = format!("{}/stock/candle", self.base_url);
        let body = get_json(
            &self.client,
            "finnhub",
            &url,
            &[
                ("symbol", symbol),
                ("resolution", resolution),
                ("from", &from),
                ("to", &to),
                ("token", &self.api_key),
            ],
            self.timeout,
        )
        .await?;
        parse_candles(body, limit)
    }
}

/// Map an Alpha Vantage style interval ("5min") to a Finnhub resolution.
pub fn resolution_for(interval: &str) -> &'static str {
    match interval {
        "1min" => "1",
        "5min" => "5",
        "15min" => "15",
        "30min" => "30",
        "60min" => "60",
        _ => "D",
    }
}

fn malformed(e: serde_json::Error) -> QuoteError {
    QuoteError::Upstream(format!("finnhub returned unexpected payload: {}", e))
}

pub fn parse_quote(body: serde_json::Value, symbol: &str) -> Result<Quote, QuoteError> {
    let raw: FinnhubQuote = serde_json::from_value(body).map_err(malformed)?;

    if raw.c == 0.0 && raw.o == 0.0 && raw.pc == 0.0 {
        return Err(QuoteError::NotFound(symbol.to_string()));
    }

    let timestamp = DateTime::<Utc>::from_timestamp(raw.t, 0)
        .map(|ts| ts.to_rfc3339_opts(SecondsFormat::Secs, true));

    Ok(Quote {
        symbol: symbol.to_string(),
        price: float_to_decimal(raw.c, "c")?,
        open: float_to_decimal(raw.o, "o")?,
        high: float_to_decimal(raw.h, "h")?,
        low: float_to_decimal(raw.l, "l")?,
        previous_close: float_to_decimal(raw.pc, "pc")?,
        change: float_to_decimal(raw.d.unwrap_or_default(), "d")?,
        change_percent: float_to_decimal(raw.dp.unwrap_or_default(), "dp")?,
        timestamp,
    })
}

pub fn parse_candles(body: serde_json::Value, limit: usize) -> Result<Vec<Candle>, QuoteError> {
    let raw: FinnhubCandles = serde_json::from_value(body).map_err(malformed)?;

    match raw.s.as_str() {
        "ok" => {}
        "no_data" => return Ok(Vec::new()),
        other => {
            return Err(QuoteError::Upstream(format!(
                "finnhub error status: {}",
                other
            )))
        }
    }

    let count = raw.t.len();
    if [raw.o.len(), raw.h.len(), raw.l.len(), raw.c.len(), raw.v.len()]
        .iter()
        .any(|&len| len != count)
    {
        return Err(QuoteError::Upstream(
            "finnhub candle arrays have mismatched lengths".into(),
        ));
    }

    let mut candles = Vec::with_capacity(count);
    for i in 0..count {
        let Some(time) = DateTime::<Utc>::from_timestamp(raw.t[i], 0) else {
            continue;
        };
        candles.push(Candle {
            time,
            open: float_to_decimal(raw.o[i], "o")?,
            high: float_to_decimal(raw.h[i], "h")?,
            low: float_to_decimal(raw.l[i], "l")?,
            close: float_to_decimal(raw.c[i], "c")?,
            volume: raw.v[i] as i64,
        });
    }

    Ok(latest_candles(candles, limit))
}
