//! Ordered pattern -> value tables for counterparty cleanup and
//! categorization. First match wins; deterministic, no side effects.

use regex::{Regex, RegexBuilder};

#[derive(Debug, Clone)]
struct Rule {
    pattern: Regex,
    value: String,
}

/// An ordered list of (pattern, value) pairs scanned first-match-wins.
#[derive(Debug, Clone, Default)]
pub struct RuleTable {
    rules: Vec<Rule>,
}

impl RuleTable {
    /// Compile a table from (pattern, value) pairs. Patterns are
    /// case-insensitive; order is the priority order.
    pub fn new<S: AsRef<str>>(pairs: &[(S, S)]) -> Result<Self, regex::Error> {
        let mut rules = Vec::with_capacity(pairs.len());
        for (pattern, value) in pairs {
            rules.push(Rule {
                pattern: RegexBuilder::new(pattern.as_ref())
                    .case_insensitive(true)
                    .build()?,
                value: value.as_ref().to_string(),
            });
        }
        Ok(RuleTable { rules })
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Clean a raw counterparty string: the first matching rule replaces the
    /// whole candidate and stops the scan; an unmatched input falls back to a
    /// capitalized copy.
    pub fn resolve_counterparty(&self, raw: &str) -> String {
        for rule in &self.rules {
            if rule.pattern.is_match(raw) {
                return rule.value.clone();
            }
        }
        capitalize(raw.trim())
    }

    /// Map a cleaned counterparty to a category account, or `default` when no
    /// rule matches.
    pub fn resolve_category(&self, candidate: &str, default: &str) -> String {
        for rule in &self.rules {
            if rule.pattern.is_match(candidate) {
                return rule.value.clone();
            }
        }
        default.to_string()
    }
}

/// First character uppercased, the rest lowercased.
pub fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + &chars.as_str().to_lowercase(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_match_wins() {
        let table = RuleTable::new(&[("^A", "X"), ("^AB", "Y")]).unwrap();
        assert_eq!(table.resolve_counterparty("ABC"), "X");
        assert_eq!(table.resolve_category("ABC", "Z"), "X");
    }

    #[test]
    fn test_counterparty_fallback_capitalizes() {
        let table = RuleTable::new(&[("CARREFOUR", "Carrefour")]).unwrap();
        assert_eq!(table.resolve_counterparty("AMAZON EU SARL"), "Amazon eu sarl");
    }

    #[test]
    fn test_counterparty_case_insensitive() {
        let table = RuleTable::new(&[("carrefour", "Carrefour Market")]).unwrap();
        assert_eq!(table.resolve_counterparty("CARREFOUR CITY PARIS"), "Carrefour Market");
    }

    #[test]
    fn test_category_default() {
        let table = RuleTable::new(&[("Edf", "Expenses:Logement:Electricite")]).unwrap();
        assert_eq!(
            table.resolve_category("Boulangerie", "Expenses:Non-affecte"),
            "Expenses:Non-affecte"
        );
    }

    #[test]
    fn test_unicode_match() {
        let table = RuleTable::new(&[("pr.l.vement", "Prelevement")]).unwrap();
        assert_eq!(table.resolve_counterparty("PRÉLÈVEMENT SEPA"), "Prelevement");
    }

    #[test]
    fn test_capitalize() {
        assert_eq!(capitalize("AMAZON"), "Amazon");
        assert_eq!(capitalize(""), "");
        assert_eq!(capitalize("éCOLE"), "École");
    }
}
