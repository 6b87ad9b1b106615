//! Forward-only cursor over a delimited statement file.
//!
//! Statements carry a variable number of metadata rows before the data block
//! (2, 5 or 8 depending on the template), so the cursor takes the schema and
//! the skip count explicitly instead of trusting a header row.

use regex::Regex;
use std::collections::HashMap;
use std::io::Read;

use releve_core::{ImportError, Result};

/// Decode a windows-125x statement export. The upper byte range of those code
/// pages is Latin-1-compatible for the characters banks actually emit.
pub fn decode_latin1(bytes: &[u8]) -> String {
    bytes.iter().map(|&b| b as char).collect()
}

/// Result of a sub-match lookup inside a row field.
///
/// Encodes the one-capture/many-captures ambiguity in the type instead of
/// silently stringifying a list.
#[derive(Debug, Clone, PartialEq)]
pub enum DetailMatch {
    One(String),
    Many(Vec<String>),
}

impl DetailMatch {
    pub fn as_one(&self) -> Option<&str> {
        match self {
            DetailMatch::One(s) => Some(s),
            DetailMatch::Many(_) => None,
        }
    }
}

/// One statement line: canonical field name -> raw value, plus the 1-based
/// source line number for diagnostics. Never mutated once yielded.
#[derive(Debug, Clone)]
pub struct Row {
    fields: HashMap<String, String>,
    detail_field: String,
    pub line: usize,
}

impl Row {
    /// Raw value of a named field; empty when the column is missing.
    pub fn get(&self, name: &str) -> &str {
        self.fields.get(name).map(String::as_str).unwrap_or("")
    }

    /// The trimmed free-text detail field.
    pub fn detail(&self) -> &str {
        self.fields
            .get(&self.detail_field)
            .map(String::as_str)
            .unwrap_or("")
            .trim()
    }

    /// Find all matches of `pattern` in `field` (detail field when `None`).
    ///
    /// Returns `None` on no match, `One` on exactly one captured text, `Many`
    /// otherwise. Every participating capture group contributes its text, in
    /// match order; a groupless pattern contributes the whole match.
    pub fn in_detail(&self, pattern: &Regex, field: Option<&str>) -> Option<DetailMatch> {
        let haystack = match field {
            Some(name) => self.get(name),
            None => self.get(&self.detail_field),
        };
        let mut found: Vec<String> = Vec::new();
        for caps in pattern.captures_iter(haystack) {
            if caps.len() > 1 {
                for group in caps.iter().skip(1).flatten() {
                    found.push(group.as_str().to_string());
                }
            } else if let Some(whole) = caps.get(0) {
                found.push(whole.as_str().to_string());
            }
        }
        match found.len() {
            0 => None,
            1 => Some(DetailMatch::One(found.pop().unwrap())),
            _ => Some(DetailMatch::Many(found)),
        }
    }
}

/// Lazy, single-pass iterator of [`Row`] over a `;`-delimited stream.
/// Not restartable; re-open the stream to iterate again.
pub struct RowCursor {
    records: csv::StringRecordsIntoIter<Box<dyn Read>>,
    schema: Vec<String>,
    detail_field: String,
    line: usize,
    skip: usize,
}

impl RowCursor {
    pub fn new<R: Read + 'static>(
        reader: R,
        schema: &[&str],
        detail_field: &str,
        skip: usize,
    ) -> Self {
        let rdr = csv::ReaderBuilder::new()
            .delimiter(b';')
            .flexible(true)
            .has_headers(false)
            .from_reader(Box::new(reader) as Box<dyn Read>);
        RowCursor {
            records: rdr.into_records(),
            schema: schema.iter().map(|s| s.to_string()).collect(),
            detail_field: detail_field.to_string(),
            line: 0,
            skip,
        }
    }
}

impl Iterator for RowCursor {
    type Item = Result<Row>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let record = match self.records.next()? {
                Ok(r) => r,
                Err(e) => return Some(Err(ImportError::Csv(e))),
            };
            self.line += 1;
            if self.line <= self.skip {
                continue;
            }
            let mut fields = HashMap::with_capacity(self.schema.len());
            for (i, name) in self.schema.iter().enumerate() {
                let value = record.get(i).unwrap_or("").to_string();
                fields.insert(name.clone(), value);
            }
            return Some(Ok(Row {
                fields,
                detail_field: self.detail_field.clone(),
                line: self.line,
            }));
        }
    }
}
