//! SICAV net asset values from the AMF GECO public search.
//!
//! The regulator's site has no API; the adapter queries the search form by
//! ISIN and reads the result criteria table out of the HTML. A 5 second pause
//! before each request keeps the crawler polite.

use regex::Regex;
use std::collections::HashMap;
use std::time::Duration;

use releve_core::{DecimalSep, ThousandsSep, strpdate, to_decimal};

use crate::{PriceError, PriceSource, SourcePrice};

const BASE_URL: &str = "https://geco.amf-france.org/Bio/rech_part.aspx";
const NO_RESULT: &str = "Votre recherche a abouti à 0 réponse(s).";
const THROTTLE: Duration = Duration::from_secs(5);

/// Text content of every element matched by a class pattern, in document
/// order.
fn class_texts(html: &str, re: &Regex) -> Vec<String> {
    re.captures_iter(html)
        .map(|caps| caps[1].trim().to_string())
        .collect()
}

pub struct Source {
    base_url: String,
    re_keys: Regex,
    re_values: Regex,
}

impl Source {
    pub fn new() -> Self {
        // both patterns are fixed literals around one capture group
        Source {
            base_url: BASE_URL.to_string(),
            re_keys: Regex::new(r#"class="ResultatCritere"[^>]*>\s*([^<]*?)\s*<"#).unwrap(),
            re_values: Regex::new(r#"class="ResultatCritereValue"[^>]*>\s*([^<]*?)\s*<"#).unwrap(),
        }
    }

    /// Extract the quote from a GECO result page.
    fn parse_page(&self, html: &str, ticker: &str) -> Result<SourcePrice, PriceError> {
        if html.contains(NO_RESULT) {
            return Err(PriceError::NotFound(ticker.to_string()));
        }
        let keys = class_texts(html, &self.re_keys);
        let values = class_texts(html, &self.re_values);
        let table: HashMap<String, String> = keys.into_iter().zip(values).collect();

        let raw_date = table
            .get("Date VL :")
            .ok_or_else(|| PriceError::Decode("missing 'Date VL :'".to_string()))?;
        let date = strpdate(raw_date, "%d/%m/%Y")?;

        let mut raw_value = table
            .get("Valeur (€) :")
            .ok_or_else(|| PriceError::Decode("missing 'Valeur (€) :'".to_string()))?
            .clone();
        // GECO pads some NAVs with two trailing zeros past the cents
        if raw_value.ends_with("00") && raw_value.contains(',') && raw_value.len() > 4 {
            raw_value.truncate(raw_value.len() - 2);
        }
        let price = to_decimal(&raw_value, ThousandsSep::Space, DecimalSep::Comma)?;

        let time = date
            .and_hms_opt(0, 0, 0)
            .ok_or_else(|| PriceError::Decode(format!("date {date}")))?
            .and_utc()
            .fixed_offset();
        Ok(SourcePrice {
            price,
            time,
            currency: "EUR".to_string(),
        })
    }

    fn fetch(&self, ticker: &str) -> Result<SourcePrice, PriceError> {
        std::thread::sleep(THROTTLE);
        let client = reqwest::blocking::Client::new();
        let body = client
            .get(&self.base_url)
            .query(&[
                ("varvalidform", "on"),
                ("NomProd", ""),
                ("FAMILLEPROD", "0"),
                ("selectNRJ", "0"),
                ("NumAgr", ""),
                ("CLASSPROD", "0"),
                ("CodeISIN", ticker),
                ("NomSOc", ""),
                ("action", "new"),
                ("valid_form", "Lancer+la+recherche"),
                ("sltix", "1+2+3+INVESTMENT+MANAGERS"),
            ])
            .send()?
            .error_for_status()?
            .text()?;
        self.parse_page(&body, ticker)
    }
}

impl Default for Source {
    fn default() -> Self {
        Source::new()
    }
}

impl PriceSource for Source {
    fn name(&self) -> &str {
        "amf"
    }

    fn get_latest_price(&self, ticker: &str) -> Option<SourcePrice> {
        log::info!("amf:{ticker}");
        match self.fetch(ticker) {
            Ok(price) => Some(price),
            Err(err) => {
                log::error!("amf:{ticker}: {err}");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;
    use std::str::FromStr;

    const PAGE: &str = r#"
        <table>
          <tr><td class="ResultatCritere">Code ISIN :</td>
              <td class="ResultatCritereValue">FR0000000001</td></tr>
          <tr><td class="ResultatCritere">Date VL :</td>
              <td class="ResultatCritereValue">07/03/2024</td></tr>
          <tr><td class="ResultatCritere">Valeur (&euro;) :</td>
              <td class="ResultatCritereValue">104,3500</td></tr>
        </table>"#;

    fn fix_entity(html: &str) -> String {
        html.replace("(&euro;)", "(€)")
    }

    #[test]
    fn test_parse_page_trims_padded_cents() {
        let src = Source::new();
        let quote = src.parse_page(&fix_entity(PAGE), "FR0000000001").unwrap();
        // "104,3500" loses the padding and reads 104,35
        assert_eq!(quote.price, Decimal::from_str("104.35").unwrap());
        assert_eq!(quote.currency, "EUR");
        assert_eq!(quote.time.to_rfc3339(), "2024-03-07T00:00:00+00:00");
    }

    #[test]
    fn test_parse_page_no_result() {
        let src = Source::new();
        let html = format!("<html><caption>{NO_RESULT}</caption></html>");
        assert!(matches!(
            src.parse_page(&html, "XX123"),
            Err(PriceError::NotFound(_))
        ));
    }

    #[test]
    fn test_parse_page_missing_field() {
        let src = Source::new();
        let html = r#"<td class="ResultatCritere">Date VL :</td>
                      <td class="ResultatCritereValue">07/03/2024</td>"#;
        assert!(matches!(
            src.parse_page(html, "FR0000000001"),
            Err(PriceError::Decode(_))
        ));
    }
}
