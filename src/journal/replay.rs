//! Deterministic journal replay.
//!
//! Replaying a journal from sequence 0 through a fresh [`AccountManager`]
//! (constructed with the same catalog and insurance configuration as the
//! live one) rebuilds balance, margin, and position state exactly. Trades
//! are re-settled through the same `apply_trade` path used live, so
//! derived records (`InsuranceContribution`) are skipped rather than
//! double-applied; draws and socialized losses replay from their recorded
//! amounts.

use super::error::JournalError;
use super::journal::Journal;
use super::ledger::Ledger;
use super::types::{EventPayload, EventRecord};
use crate::accounts::AccountManager;

/// Outcome of a replay pass.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReplaySummary {
    /// Records applied.
    pub records: u64,
    /// Trades re-settled.
    pub trades: u64,
}

/// Apply one journal record to an account manager.
pub fn apply_record(record: &EventRecord, accounts: &mut AccountManager) -> bool {
    match &record.payload {
        EventPayload::Deposit { user, amount } => {
            accounts.deposit(*user, *amount);
            false
        }
        EventPayload::Withdraw { user, amount } => {
            // The withdrawal succeeded when journaled; replay re-applies it
            // against the same state, so this cannot fail on a clean log.
            let _ = accounts.withdraw(*user, *amount);
            false
        }
        EventPayload::Trade { trade, .. } => {
            accounts.apply_trade(trade, trade.ts_us);
            true
        }
        EventPayload::FundingPayment { user, amount, .. } => {
            accounts.apply_funding(*user, *amount);
            false
        }
        EventPayload::InsuranceDraw { user, amount, .. } => {
            accounts.replay_insurance_draw(*user, *amount, record.ts_us);
            false
        }
        EventPayload::SocializedLoss { user, amount } => {
            accounts.replay_socialized_loss(*user, *amount);
            false
        }
        // Contributions are recomputed inside `apply_trade`; order
        // lifecycle records carry no account state.
        EventPayload::InsuranceContribution { .. }
        | EventPayload::OrderSubmitted { .. }
        | EventPayload::OrderUpdated { .. }
        | EventPayload::Cancel { .. }
        | EventPayload::Liquidation { .. }
        | EventPayload::CoreHalted { .. } => false,
    }
}

/// Replay every record from sequence 0 into `accounts`, optionally posting
/// each to `ledger` and checking the double-entry invariant as it goes.
pub fn replay_into(
    journal: &dyn Journal,
    accounts: &mut AccountManager,
    mut ledger: Option<&mut Ledger>,
) -> Result<ReplaySummary, JournalError> {
    let mut summary = ReplaySummary::default();
    for record in journal.read_from(0)? {
        let record = record?;
        if apply_record(&record, accounts) {
            summary.trades += 1;
        }
        if let Some(ledger) = ledger.as_deref_mut() {
            ledger.post(&record);
            debug_assert!(ledger.verify_balance(), "ledger unbalanced at seq {}", record.seq);
        }
        summary.records += 1;
    }
    Ok(summary)
}
