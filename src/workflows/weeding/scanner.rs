use std::collections::BTreeMap;

use chrono::NaiveDate;
use tracing::{debug, info};

use super::config::WeedingConfig;
use super::domain::CardFlags;
use super::ledger::CardLedger;

/// Result of one pass over the ledger: the health verdict per card, the ids
/// picked for conversion (in scan order), the ids that must be force-closed,
/// and the quota bookkeeping the orchestrator's stopping condition reads.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanOutcome {
    pub health: BTreeMap<String, CardFlags>,
    pub recommended: Vec<String>,
    pub force_close: Vec<String>,
    pub running_total: u64,
    pub cards_done: usize,
}

/// One deterministic pass over the ledger in id order.
///
/// `initial_total` seeds the running item total so that items already
/// converted earlier in the same cycle keep counting against the quota when
/// the orchestrator re-scans between batches; a dry scan passes zero.
///
/// The fudge factor only widens the OVERLOADED warning threshold. The
/// accept/reject arithmetic is strict against the quota, which also means an
/// overloaded card can never be recommended; OVERLOADED itself never blocks
/// the scan. BARRED is likewise a flag, not a veto.
pub fn scan(
    ledger: &CardLedger,
    config: &WeedingConfig,
    branch_filter: Option<&str>,
    initial_total: u64,
) -> ScanOutcome {
    let quota = u64::from(config.item_quota);
    let overload_threshold = config.overload_threshold();

    let mut outcome = ScanOutcome {
        running_total: initial_total,
        ..ScanOutcome::default()
    };

    for card in ledger.cards() {
        let mut flags = CardFlags::empty();
        let misnamed = !card.carries_marker(&config.card_marker);

        if misnamed {
            flags.insert(CardFlags::MISNAMED);
        }
        if card.status.is_barred() {
            flags.insert(CardFlags::BARRED);
        }
        if f64::from(card.item_count) > overload_threshold {
            flags.insert(CardFlags::OVERLOADED);
        }
        if !flags.contains(CardFlags::MISNAMED)
            && !flags.contains(CardFlags::BARRED)
            && !flags.contains(CardFlags::OVERLOADED)
        {
            flags.insert(CardFlags::OK);
        }

        if card.is_converted() {
            flags.insert(CardFlags::CONVERTED);
            outcome.cards_done += 1;
        } else if misnamed || card.item_count == 0 {
            // Not legitimate discard material; closed without consuming
            // quota or joining the recommendation set.
            flags.insert(CardFlags::CONVERTED);
            outcome.force_close.push(card.id.clone());
            debug!(card = %card.id, misnamed, "force-closing card");
        } else {
            let branch_matches = branch_filter
                .map(|branch| card.branch_code() == branch)
                .unwrap_or(true);
            let fits = outcome.running_total + u64::from(card.item_count) <= quota;
            if branch_matches && fits {
                flags.insert(CardFlags::RECOMMEND);
                outcome.recommended.push(card.id.clone());
                outcome.running_total += u64::from(card.item_count);
            }
        }

        outcome.health.insert(card.id.clone(), flags);
    }

    info!(
        recommended = outcome.recommended.len(),
        running_total = outcome.running_total,
        cards_done = outcome.cards_done,
        "ledger scan complete"
    );
    outcome
}

/// Stamp the scan's force-closures into the ledger. Kept separate from the
/// scan itself so a dry pass stays read-only.
pub fn apply_force_closures(
    ledger: &mut CardLedger,
    outcome: &ScanOutcome,
    today: NaiveDate,
) -> usize {
    for id in &outcome.force_close {
        ledger.close_card(id, today);
    }
    outcome.force_close.len()
}
