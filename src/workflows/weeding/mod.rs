//! Discard-card selection and item policy screening for collection weeding.
//!
//! The quota scanner walks the persistent card ledger and picks a
//! recommendation set bounded by the daily item quota; the conversion
//! orchestrator drives each recommended card through the item classifier,
//! buckets its charges by preserve policy, and hands whatever survives to
//! the transaction sink.

pub mod catalog;
pub mod classifier;
mod config;
pub mod domain;
pub mod ledger;
pub mod orchestrator;
pub mod policy;
pub mod report;
pub mod scanner;

#[cfg(test)]
mod tests;

pub use config::WeedingConfig;
pub use domain::{CardFlags, CardStatus, DiscardCard, Holding, ItemFlags, ItemKey};
pub use ledger::CardLedger;
pub use orchestrator::{
    CardConversion, ConversionOrchestrator, CycleOutcome, CyclePaths, CycleSummary, ScriptSink,
    TransactionSink,
};
pub use report::{BranchRollup, CardScanView, ScanReport};
pub use scanner::{apply_force_closures, scan, ScanOutcome};
