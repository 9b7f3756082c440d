use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use chrono::NaiveDate;

use crate::workflows::weeding::catalog::{CardSeed, CatalogError, CatalogQueryAdapter};
use crate::workflows::weeding::domain::{CardStatus, DiscardCard, Holding, ItemKey};
use crate::workflows::weeding::orchestrator::{SinkError, TransactionSink};
use crate::workflows::weeding::WeedingConfig;

pub(super) fn config() -> WeedingConfig {
    WeedingConfig::default()
}

pub(super) fn today() -> NaiveDate {
    NaiveDate::from_ymd_opt(2026, 8, 6).expect("valid date")
}

pub(super) fn card(id: &str, description: &str, item_count: u32) -> DiscardCard {
    DiscardCard {
        id: id.to_string(),
        patron_key: format!("p-{id}"),
        description: description.to_string(),
        date_created: "20250103".to_string(),
        date_last_used: "20250601".to_string(),
        item_count,
        holds_count: 0,
        bills_count: 0,
        status: CardStatus::Ok,
        date_converted: None,
        converted_total: 0,
    }
}

pub(super) fn barred(mut card: DiscardCard) -> DiscardCard {
    card.status = CardStatus::Barred;
    card
}

pub(super) fn key(title: &str, copy: u32) -> ItemKey {
    ItemKey::new(title, "1", copy)
}

/// In-memory catalog double. Individual queries can be told to fail so the
/// fail-open path is exercisable.
#[derive(Default)]
pub(super) struct FixtureCatalog {
    pub charges: HashMap<String, Vec<ItemKey>>,
    pub holdings: Vec<Holding>,
    pub billed: Vec<ItemKey>,
    pub ordered: Vec<ItemKey>,
    pub serials: Vec<ItemKey>,
    pub title_holds: Vec<ItemKey>,
    pub copy_holds: Vec<ItemKey>,
    pub profile: Vec<CardSeed>,
    pub failing: HashSet<&'static str>,
}

impl FixtureCatalog {
    fn answer(
        &self,
        query: &'static str,
        keys: &[ItemKey],
    ) -> Result<Vec<ItemKey>, CatalogError> {
        if self.failing.contains(query) {
            return Err(CatalogError::Query { query, status: 1 });
        }
        Ok(keys.to_vec())
    }
}

impl CatalogQueryAdapter for FixtureCatalog {
    fn charges_for_patron(
        &self,
        patron_key: &str,
        _before: NaiveDate,
    ) -> Result<Vec<ItemKey>, CatalogError> {
        if self.failing.contains("charges") {
            return Err(CatalogError::Query {
                query: "charges",
                status: 1,
            });
        }
        Ok(self.charges.get(patron_key).cloned().unwrap_or_default())
    }

    fn title_holdings(&self, _items: &[ItemKey]) -> Result<Vec<Holding>, CatalogError> {
        if self.failing.contains("holdings") {
            return Err(CatalogError::Query {
                query: "holdings",
                status: 1,
            });
        }
        Ok(self.holdings.clone())
    }

    fn billed_items(&self, _items: &[ItemKey]) -> Result<Vec<ItemKey>, CatalogError> {
        self.answer("bills", &self.billed)
    }

    fn ordered_items(&self, _items: &[ItemKey]) -> Result<Vec<ItemKey>, CatalogError> {
        self.answer("orders", &self.ordered)
    }

    fn serial_controlled_items(&self, _items: &[ItemKey]) -> Result<Vec<ItemKey>, CatalogError> {
        self.answer("serials", &self.serials)
    }

    fn title_held_items(&self, _items: &[ItemKey]) -> Result<Vec<ItemKey>, CatalogError> {
        self.answer("title-holds", &self.title_holds)
    }

    fn copy_held_items(&self, _items: &[ItemKey]) -> Result<Vec<ItemKey>, CatalogError> {
        self.answer("copy-holds", &self.copy_holds)
    }

    fn discard_profile_cards(&self) -> Result<Vec<CardSeed>, CatalogError> {
        if self.failing.contains("discard-profile") {
            return Err(CatalogError::Query {
                query: "discard-profile",
                status: 1,
            });
        }
        Ok(self.profile.clone())
    }
}

/// Sink double capturing every submitted batch.
#[derive(Default)]
pub(super) struct RecordingSink {
    pub submissions: Mutex<Vec<Vec<ItemKey>>>,
    pub fail: bool,
}

impl TransactionSink for RecordingSink {
    fn submit(&self, items: &[ItemKey]) -> Result<usize, SinkError> {
        if self.fail {
            return Err(SinkError::Transport("fixture sink down".to_string()));
        }
        self.submissions
            .lock()
            .expect("sink mutex poisoned")
            .push(items.to_vec());
        Ok(items.len())
    }
}
