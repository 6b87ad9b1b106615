//! Quotes from the Yahoo Finance chart API.

use chrono::{DateTime, FixedOffset};
use rust_decimal::Decimal;
use serde::Deserialize;

use crate::{PriceError, PriceSource, SourcePrice};

const BASE_URL: &str = "https://query1.finance.yahoo.com/v8/finance/chart";

#[derive(Debug, Deserialize)]
struct ChartResponse {
    chart: Chart,
}

#[derive(Debug, Deserialize)]
struct Chart {
    #[serde(default)]
    result: Option<Vec<ChartResult>>,
    #[serde(default)]
    error: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct ChartResult {
    meta: ChartMeta,
}

#[derive(Debug, Deserialize)]
struct ChartMeta {
    #[serde(rename = "regularMarketPrice")]
    regular_market_price: Decimal,
    /// Exchange UTC offset in seconds.
    gmtoffset: i32,
    #[serde(rename = "regularMarketTime")]
    regular_market_time: i64,
    currency: String,
}

/// Parse a chart API body into a quote, timestamped in the exchange's zone.
fn parse_chart(body: &str) -> Result<SourcePrice, PriceError> {
    let response: ChartResponse = serde_json::from_str(body)?;
    if let Some(error) = response.chart.error {
        if !error.is_null() {
            return Err(PriceError::Api(error.to_string()));
        }
    }
    let result = response
        .chart
        .result
        .and_then(|mut r| if r.is_empty() { None } else { Some(r.remove(0)) })
        .ok_or_else(|| PriceError::Decode("empty chart result".to_string()))?;
    let meta = result.meta;
    let offset = FixedOffset::east_opt(meta.gmtoffset)
        .ok_or_else(|| PriceError::Decode(format!("gmtoffset {}", meta.gmtoffset)))?;
    let time = DateTime::from_timestamp(meta.regular_market_time, 0)
        .ok_or_else(|| PriceError::Decode(format!("timestamp {}", meta.regular_market_time)))?
        .with_timezone(&offset);
    Ok(SourcePrice {
        price: meta.regular_market_price,
        time,
        currency: meta.currency,
    })
}

pub struct Source {
    base_url: String,
}

impl Source {
    pub fn new() -> Self {
        Source {
            base_url: BASE_URL.to_string(),
        }
    }

    fn fetch(&self, ticker: &str) -> Result<SourcePrice, PriceError> {
        let url = format!("{}/{ticker}", self.base_url);
        let body = reqwest::blocking::get(&url)?.error_for_status()?.text()?;
        parse_chart(&body)
    }
}

impl Default for Source {
    fn default() -> Self {
        Source::new()
    }
}

impl PriceSource for Source {
    fn name(&self) -> &str {
        "yahoo"
    }

    fn get_latest_price(&self, ticker: &str) -> Option<SourcePrice> {
        log::info!("yahoo:{ticker}");
        match self.fetch(ticker) {
            Ok(price) => Some(price),
            Err(err) => {
                log::error!("yahoo:{ticker}: {err}");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    const BODY: &str = r#"{
        "chart": {
            "result": [{
                "meta": {
                    "currency": "EUR",
                    "regularMarketPrice": 42.17,
                    "gmtoffset": 3600,
                    "exchangeTimezoneName": "Europe/Paris",
                    "regularMarketTime": 1709823600
                }
            }],
            "error": null
        }
    }"#;

    #[test]
    fn test_parse_chart() {
        let quote = parse_chart(BODY).unwrap();
        assert_eq!(quote.price, Decimal::from_str("42.17").unwrap());
        assert_eq!(quote.currency, "EUR");
        // 2024-03-07 15:00:00 UTC, rendered at UTC+1
        assert_eq!(quote.time.to_rfc3339(), "2024-03-07T16:00:00+01:00");
    }

    #[test]
    fn test_parse_chart_api_error() {
        let body = r#"{"chart": {"result": null, "error": {"code": "Not Found"}}}"#;
        assert!(matches!(parse_chart(body), Err(PriceError::Api(_))));
    }

    #[test]
    fn test_parse_chart_empty_result() {
        let body = r#"{"chart": {"result": [], "error": null}}"#;
        assert!(matches!(parse_chart(body), Err(PriceError::Decode(_))));
    }
}
