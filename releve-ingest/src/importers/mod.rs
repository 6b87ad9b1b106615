//! Per-institution statement classifiers.
//!
//! Every importer follows the same pipeline: identify the file by name,
//! iterate rows, match each row against the institution's transaction shapes
//! in priority order, resolve counterparty and category through the rule
//! tables, and emit validated directives. Row errors are logged and counted;
//! a non-zero count at end of file rejects the whole statement.

use std::path::Path;

use releve_core::{Directive, ImportError, Result, ledger::account};

pub mod boursorama;
pub mod generic_json;
pub mod postbank;
pub mod sg;
pub mod trade;

/// Common capability set of the statement classifiers.
pub trait Importer {
    /// Distinguishes two instances of the same institution in logs/config.
    fn name(&self) -> String;

    /// Cheap filename predicate; routing mistakes are the caller's concern.
    fn identify(&self, filename: &str) -> bool;

    /// The root account the statement belongs to.
    fn file_account(&self) -> &str;

    /// Classify every row of the statement into directives.
    ///
    /// `existing` carries already-committed directives for open-account
    /// discovery and identifier-based deduplication.
    fn extract(&self, path: &Path, existing: &[Directive]) -> Result<Vec<Directive>>;
}

/// Directional transfer narration: "source => destination" in short names.
pub(crate) fn transfer_narration(from: &str, to: &str) -> String {
    format!("{} => {}", account::short(from), account::short(to))
}

/// Tracks row-level failures across one statement file.
///
/// In strict mode the first error aborts; otherwise errors are logged and the
/// file is rejected at the end (all-or-nothing, never a partial statement).
pub(crate) struct ErrorFlag {
    strict: bool,
    count: usize,
}

impl ErrorFlag {
    pub(crate) fn new(strict: bool) -> Self {
        ErrorFlag { strict, count: 0 }
    }

    /// Record a row failure. Returns `Err` when strict mode aborts the run.
    pub(crate) fn row_error(&mut self, err: ImportError) -> Result<()> {
        if self.strict {
            return Err(err);
        }
        log::error!("{err}");
        self.count += 1;
        Ok(())
    }

    /// Finish the file: pass the directives through, or reject them all.
    pub(crate) fn finish(self, entries: Vec<Directive>) -> Result<Vec<Directive>> {
        if self.count > 0 {
            Err(ImportError::Rejected(self.count))
        } else {
            Ok(entries)
        }
    }
}

/// `basename` of a path, for `identify` checks.
pub(crate) fn basename(path: &str) -> &str {
    Path::new(path)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transfer_narration() {
        assert_eq!(
            transfer_narration("Assets:Banque:SG", "Assets:Caisse"),
            "SG => Caisse"
        );
    }

    #[test]
    fn test_error_flag_rejects_file() {
        let mut flag = ErrorFlag::new(false);
        flag.row_error(ImportError::format("abc", "decimal number"))
            .unwrap();
        let err = flag.finish(vec![]).unwrap_err();
        assert!(matches!(err, ImportError::Rejected(1)));
    }

    #[test]
    fn test_error_flag_strict_aborts() {
        let mut flag = ErrorFlag::new(true);
        assert!(
            flag.row_error(ImportError::format("abc", "decimal number"))
                .is_err()
        );
    }

    #[test]
    fn test_error_flag_clean_passthrough() {
        let flag = ErrorFlag::new(false);
        assert!(flag.finish(vec![]).is_ok());
    }

    #[test]
    fn test_basename() {
        assert_eq!(basename("/tmp/export-operations-01-03-2024.csv"), "export-operations-01-03-2024.csv");
    }
}
