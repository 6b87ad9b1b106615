//! Locale-aware decoding of statement numbers and dates.
//!
//! French exports write `1 234,56`, German ones `1.234,56`; the decoder takes
//! the separator convention explicitly instead of guessing.

use chrono::{NaiveDate, NaiveDateTime};
use rust_decimal::Decimal;
use std::str::FromStr;

use crate::error::ImportError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThousandsSep {
    None,
    Point,
    Space,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecimalSep {
    Comma,
    Point,
}

/// Parse a locale-formatted amount into a `Decimal`.
///
/// An empty or whitespace-only input yields zero: statements leave the amount
/// column blank on informational rows, and that is not a format error.
pub fn to_decimal(
    raw: &str,
    thousands: ThousandsSep,
    decimal: DecimalSep,
) -> Result<Decimal, ImportError> {
    let s = raw.trim();
    if s.is_empty() {
        return Ok(Decimal::ZERO);
    }
    if thousands == ThousandsSep::Point && decimal == DecimalSep::Point {
        return Err(ImportError::format(raw, "separator configuration"));
    }
    let mut cleaned = s.to_string();
    match thousands {
        ThousandsSep::Point => cleaned = cleaned.replace('.', ""),
        ThousandsSep::Space => {
            cleaned = cleaned.replace(' ', "");
            cleaned = cleaned.replace('\u{a0}', "");
        }
        ThousandsSep::None => {}
    }
    if decimal == DecimalSep::Comma {
        cleaned = cleaned.replace(',', ".");
    }
    // stray spaces survive Point-thousands inputs like "1.234,56 "
    cleaned = cleaned.replace(' ', "");
    Decimal::from_str(&cleaned).map_err(|_| ImportError::format(raw, "decimal number"))
}

/// Parse a date against a chrono format string.
///
/// A datetime-formatted input is accepted and truncated to its date, matching
/// the pass-through behavior statements rely on for timestamp columns.
pub fn strpdate(raw: &str, fmt: &str) -> Result<NaiveDate, ImportError> {
    let s = raw.trim();
    if let Ok(d) = NaiveDate::parse_from_str(s, fmt) {
        return Ok(d);
    }
    if let Ok(dt) = NaiveDateTime::parse_from_str(s, fmt) {
        return Ok(dt.date());
    }
    Err(ImportError::format(raw, "date"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    #[test]
    fn test_french_and_plain_agree() {
        let fr = to_decimal("1 234,56", ThousandsSep::Space, DecimalSep::Comma).unwrap();
        let plain = to_decimal("1234.56", ThousandsSep::None, DecimalSep::Point).unwrap();
        assert_eq!(fr, plain);
        assert_eq!(fr, dec("1234.56"));
    }

    #[test]
    fn test_german_thousands_point() {
        let de = to_decimal("1.234,56", ThousandsSep::Point, DecimalSep::Comma).unwrap();
        assert_eq!(de, dec("1234.56"));
    }

    #[test]
    fn test_negative_comma() {
        let v = to_decimal("-12,34", ThousandsSep::None, DecimalSep::Comma).unwrap();
        assert_eq!(v, dec("-12.34"));
    }

    #[test]
    fn test_empty_is_zero() {
        let v = to_decimal("  ", ThousandsSep::None, DecimalSep::Comma).unwrap();
        assert_eq!(v, Decimal::ZERO);
    }

    #[test]
    fn test_invalid_is_format_error() {
        let err = to_decimal("EUR", ThousandsSep::None, DecimalSep::Comma).unwrap_err();
        assert!(matches!(err, ImportError::Format { .. }));
    }

    #[test]
    fn test_point_point_rejected() {
        let err = to_decimal("1.234.56", ThousandsSep::Point, DecimalSep::Point).unwrap_err();
        assert!(matches!(err, ImportError::Format { .. }));
    }

    #[test]
    fn test_strpdate_formats() {
        assert_eq!(
            strpdate("15/01/2024", "%d/%m/%Y").unwrap(),
            NaiveDate::from_ymd_opt(2024, 1, 15).unwrap()
        );
        assert_eq!(
            strpdate("2024-01-15", "%Y-%m-%d").unwrap(),
            NaiveDate::from_ymd_opt(2024, 1, 15).unwrap()
        );
    }

    #[test]
    fn test_strpdate_datetime_passthrough() {
        assert_eq!(
            strpdate("2024-01-15T10:30:00", "%Y-%m-%dT%H:%M:%S").unwrap(),
            NaiveDate::from_ymd_opt(2024, 1, 15).unwrap()
        );
    }

    #[test]
    fn test_strpdate_garbage() {
        assert!(strpdate("pas une date", "%d/%m/%Y").is_err());
    }
}
