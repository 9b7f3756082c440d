use std::collections::BTreeMap;

use chrono::NaiveDate;
use serde::Serialize;

use super::config::WeedingConfig;
use super::domain::CardFlags;
use super::ledger::CardLedger;
use super::scanner::ScanOutcome;

/// One ledger card as shown in the scan listing.
#[derive(Debug, Clone, Serialize)]
pub struct CardScanView {
    pub id: String,
    pub branch: String,
    pub description: String,
    pub item_count: u32,
    pub status: String,
    pub flags: Vec<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date_converted: Option<NaiveDate>,
    pub converted_total: u64,
}

/// Per-branch rollup of the scan verdicts.
#[derive(Debug, Clone, Default, Serialize)]
pub struct BranchRollup {
    pub branch: String,
    pub cards: usize,
    pub done: usize,
    pub recommended: usize,
    pub recommended_items: u64,
    pub barred: usize,
    pub overloaded: usize,
    pub misnamed: usize,
}

/// Dry-pass report handed to the CLI renderers.
#[derive(Debug, Clone, Serialize)]
pub struct ScanReport {
    pub quota: u32,
    pub running_total: u64,
    pub cards_done: usize,
    pub cards_total: usize,
    pub branches: Vec<BranchRollup>,
    pub cards: Vec<CardScanView>,
}

impl ScanReport {
    pub fn build(ledger: &CardLedger, outcome: &ScanOutcome, config: &WeedingConfig) -> Self {
        let mut branches: BTreeMap<String, BranchRollup> = BTreeMap::new();
        let mut cards = Vec::with_capacity(ledger.len());

        for card in ledger.cards() {
            let flags = outcome
                .health
                .get(&card.id)
                .copied()
                .unwrap_or(CardFlags::empty());
            let branch = card.branch_code().to_string();

            let rollup = branches.entry(branch.clone()).or_insert_with(|| BranchRollup {
                branch: branch.clone(),
                ..BranchRollup::default()
            });
            rollup.cards += 1;
            if flags.contains(CardFlags::CONVERTED) {
                rollup.done += 1;
            }
            if flags.contains(CardFlags::RECOMMEND) {
                rollup.recommended += 1;
                rollup.recommended_items += u64::from(card.item_count);
            }
            if flags.contains(CardFlags::BARRED) {
                rollup.barred += 1;
            }
            if flags.contains(CardFlags::OVERLOADED) {
                rollup.overloaded += 1;
            }
            if flags.contains(CardFlags::MISNAMED) {
                rollup.misnamed += 1;
            }

            cards.push(CardScanView {
                id: card.id.clone(),
                branch,
                description: card.description.clone(),
                item_count: card.item_count,
                status: card.status.code().to_string(),
                flags: flags.labels(),
                date_converted: card.date_converted,
                converted_total: card.converted_total,
            });
        }

        Self {
            quota: config.item_quota,
            running_total: outcome.running_total,
            cards_done: outcome.cards_done,
            cards_total: ledger.len(),
            branches: branches.into_values().collect(),
            cards,
        }
    }
}
