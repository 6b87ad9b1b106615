//! Statement ingestion: file cursors and the per-institution importers that
//! turn bank and broker exports into normalized ledger directives.

pub mod cursor;
pub mod importers;

pub use cursor::{DetailMatch, Row, RowCursor, decode_latin1};
pub use importers::Importer;
