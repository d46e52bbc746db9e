//! Event journal subsystem: append-only sequenced records, the
//! memory-mapped file journal, the double-entry accounting mirror, and
//! deterministic replay.

mod error;
mod file_journal;
#[allow(clippy::module_inception)]
mod journal;
mod ledger;
mod replay;
mod types;

pub use error::JournalError;
pub use file_journal::FileJournal;
pub use journal::{Journal, JournalReadIter, MemoryJournal, decode_record, encode_record};
pub use ledger::{
    ASSETS_BANK, ASSETS_INSURANCE, EQUITY_FUNDING, EQUITY_SOCIALIZED, EQUITY_TRADING, Ledger,
    REVENUE_FEES, customer_account,
};
pub use replay::{ReplaySummary, apply_record, replay_into};
pub use types::{EventKind, EventPayload, EventRecord, RecordListener};
