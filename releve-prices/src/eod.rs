//! End-of-day fund quotes from eodhistoricaldata.com.
//!
//! The provider indexes European funds by ISIN under the `.EUFUND` virtual
//! exchange. Quotes are day-level; the timestamp is pinned to the Paris
//! close (17:30) of the quote date.

use chrono::NaiveDate;
use chrono_tz::Europe::Paris;
use rust_decimal::Decimal;
use serde::Deserialize;

use releve_core::strpdate;

use crate::{PriceError, PriceSource, SourcePrice};

const BASE_URL: &str = "https://eodhistoricaldata.com/api/eod";
const APIKEY_VAR: &str = "APIKEY_EOD";

#[derive(Debug, Deserialize)]
struct EodQuote {
    date: String,
    close: Decimal,
}

fn close_time(date: NaiveDate) -> Result<chrono::DateTime<chrono::FixedOffset>, PriceError> {
    let naive = date
        .and_hms_opt(17, 30, 0)
        .ok_or_else(|| PriceError::Decode(format!("date {date}")))?;
    naive
        .and_local_timezone(Paris)
        .single()
        .map(|t| t.fixed_offset())
        .ok_or_else(|| PriceError::Decode(format!("ambiguous close time on {date}")))
}

/// Parse the provider body (most recent quote first) into a quote rounded to
/// the cent, as fund NAVs are published.
fn parse_quotes(body: &str) -> Result<SourcePrice, PriceError> {
    let quotes: Vec<EodQuote> = serde_json::from_str(body)?;
    let latest = quotes
        .first()
        .ok_or_else(|| PriceError::Decode("empty quote list".to_string()))?;
    let date = strpdate(&latest.date, "%Y-%m-%d")?;
    Ok(SourcePrice {
        price: latest.close.round_dp(2),
        time: close_time(date)?,
        currency: "EUR".to_string(),
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

    fn fetch(&self, isin: &str) -> Result<SourcePrice, PriceError> {
        let apikey = std::env::var(APIKEY_VAR)
            .map_err(|_| PriceError::Api(format!("{APIKEY_VAR} not configured")))?;
        let url = format!("{}/{isin}.EUFUND", self.base_url);
        let client = reqwest::blocking::Client::new();
        let body = client
            .get(&url)
            .query(&[("api_token", apikey.as_str()), ("fmt", "json"), ("order", "d")])
            .send()?
            .error_for_status()?
            .text()?;
        parse_quotes(&body)
    }
}

impl Default for Source {
    fn default() -> Self {
        Source::new()
    }
}

impl PriceSource for Source {
    fn name(&self) -> &str {
        "eod"
    }

    fn get_latest_price(&self, ticker: &str) -> Option<SourcePrice> {
        log::info!("eod:{ticker}");
        match self.fetch(ticker) {
            Ok(price) => Some(price),
            Err(err) => {
                log::error!("eod:{ticker}: {err}");
                None
            }
        }
    }
}
