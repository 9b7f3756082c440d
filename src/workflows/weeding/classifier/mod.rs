mod last_copy;

use std::collections::BTreeMap;

use serde::Serialize;
use tracing::warn;

use super::catalog::{CatalogError, CatalogQueryAdapter};
use super::config::WeedingConfig;
use super::domain::{ItemFlags, ItemKey};

/// Per-predicate failure counts for one classification run. A failed query
/// is recovered as "no matches for that predicate", which quietly widens the
/// discard set, so the counts must reach the operator instead of vanishing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ClassifierDiagnostics {
    pub failed_queries: BTreeMap<String, u32>,
}

impl ClassifierDiagnostics {
    pub fn record(&mut self, query: &str) {
        *self.failed_queries.entry(query.to_string()).or_insert(0) += 1;
    }

    pub fn merge(&mut self, other: ClassifierDiagnostics) {
        for (query, count) in other.failed_queries {
            *self.failed_queries.entry(query).or_insert(0) += count;
        }
    }

    pub fn total_failures(&self) -> u32 {
        self.failed_queries.values().sum()
    }

    pub fn is_clean(&self) -> bool {
        self.failed_queries.is_empty()
    }
}

/// Marks every candidate item with the policies that disqualify it.
pub struct ItemClassifier<'a, C: CatalogQueryAdapter> {
    catalog: &'a C,
    config: &'a WeedingConfig,
}

impl<'a, C: CatalogQueryAdapter> ItemClassifier<'a, C> {
    pub fn new(catalog: &'a C, config: &'a WeedingConfig) -> Self {
        Self { catalog, config }
    }

    /// Compute the disqualification mask for every candidate.
    ///
    /// Classification is purely additive: every candidate seeds at DISC, the
    /// checks OR bits in, and no key is ever dropped from the table. Keys a
    /// query returns that are not candidates are ignored; the catalog's
    /// query granularity can be coarser than the exact composite key. The
    /// last-copy check runs first, against the full unfiltered candidate
    /// list; the remaining checks commute.
    pub fn classify(
        &self,
        items: &[ItemKey],
    ) -> (BTreeMap<ItemKey, ItemFlags>, ClassifierDiagnostics) {
        let mut table: BTreeMap<ItemKey, ItemFlags> = items
            .iter()
            .map(|key| (key.clone(), ItemFlags::seed()))
            .collect();
        let mut diagnostics = ClassifierDiagnostics::default();

        match self.catalog.title_holdings(items) {
            Ok(holdings) => {
                let confirmed = last_copy::confirm_last_copies(
                    holdings,
                    &self.config.non_viable_locations,
                    &self.config.staging_location,
                );
                for key in confirmed {
                    if let Some(flags) = table.get_mut(&key) {
                        flags.insert(ItemFlags::LAST_COPY);
                    }
                }
            }
            Err(err) => record_failure(&mut diagnostics, "last-copy", &err),
        }

        self.apply_check(&mut table, &mut diagnostics, "bills", ItemFlags::BILLED, |c, i| {
            c.billed_items(i)
        });
        self.apply_check(&mut table, &mut diagnostics, "orders", ItemFlags::ON_ORDER, |c, i| {
            c.ordered_items(i)
        });
        self.apply_check(&mut table, &mut diagnostics, "serials", ItemFlags::SERIAL, |c, i| {
            c.serial_controlled_items(i)
        });
        self.apply_check(
            &mut table,
            &mut diagnostics,
            "title-holds",
            ItemFlags::TITLE_HELD,
            |c, i| c.title_held_items(i),
        );
        self.apply_check(
            &mut table,
            &mut diagnostics,
            "copy-holds",
            ItemFlags::COPY_HELD,
            |c, i| c.copy_held_items(i),
        );

        (table, diagnostics)
    }

    fn apply_check<F>(
        &self,
        table: &mut BTreeMap<ItemKey, ItemFlags>,
        diagnostics: &mut ClassifierDiagnostics,
        name: &'static str,
        flag: ItemFlags,
        query: F,
    ) where
        F: FnOnce(&C, &[ItemKey]) -> Result<Vec<ItemKey>, CatalogError>,
    {
        let candidates: Vec<ItemKey> = table.keys().cloned().collect();
        match query(self.catalog, &candidates) {
            Ok(keys) => {
                for key in keys {
                    if let Some(flags) = table.get_mut(&key) {
                        flags.insert(flag);
                    }
                }
            }
            Err(err) => record_failure(diagnostics, name, &err),
        }
    }
}

fn record_failure(diagnostics: &mut ClassifierDiagnostics, query: &str, err: &CatalogError) {
    // Fail-open on the predicate: the run continues as if the query matched
    // nothing, which can only let more items through, never fewer.
    warn!(query, error = %err, "catalog predicate query failed; treating as no matches");
    diagnostics.record(query);
}
