use std::collections::BTreeMap;
use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDate;
use serde::Serialize;
use tracing::{info, warn};

use super::catalog::{run_script, CatalogQueryAdapter};
use super::classifier::{ClassifierDiagnostics, ItemClassifier};
use super::config::WeedingConfig;
use super::domain::{DiscardCard, ItemKey};
use super::ledger::CardLedger;
use super::policy::{bucket_items, discardable, PolicyBucket, DEFAULT_PRESERVE_POLICIES};
use super::scanner::{apply_force_closures, scan};

/// Turns an approved item set into discharge and relocation transactions.
/// The wire format is the sink's own business.
pub trait TransactionSink: Send + Sync {
    fn submit(&self, items: &[ItemKey]) -> Result<usize, SinkError>;
}

/// Transaction submission error.
#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    #[error("transaction sink unavailable: {0}")]
    Transport(String),
}

/// Live sink: hands the approved keys to the site toolchain, which answers
/// with the number of transactions it generated.
pub struct ScriptSink {
    command: String,
    timeout: Duration,
}

impl ScriptSink {
    pub fn new(command: impl Into<String>, timeout: Duration) -> Self {
        Self {
            command: command.into(),
            timeout,
        }
    }
}

impl TransactionSink for ScriptSink {
    fn submit(&self, items: &[ItemKey]) -> Result<usize, SinkError> {
        let mut input = String::new();
        for key in items {
            input.push_str(&key.to_string());
            input.push('\n');
        }
        let lines = run_script(
            &self.command,
            self.timeout,
            "submit-discards",
            &[],
            Some(input),
        )
        .map_err(|err| SinkError::Transport(err.to_string()))?;
        lines
            .first()
            .and_then(|line| line.parse::<usize>().ok())
            .ok_or_else(|| SinkError::Transport("sink did not report a count".to_string()))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CycleError {
    #[error(transparent)]
    Ledger(#[from] super::ledger::LedgerError),
    #[error(transparent)]
    Sink(#[from] SinkError),
    #[error("another weeding cycle holds the lock at {path}")]
    AlreadyRunning { path: PathBuf },
    #[error("could not manage {path}: {source}")]
    Scratch {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("no card '{0}' in the ledger")]
    UnknownCard(String),
    #[error("card '{0}' was already converted this cycle")]
    AlreadyConverted(String),
    #[error("charges query failed for card '{0}'; nothing converted")]
    ChargesUnavailable(String),
}

/// Paths to the run-scoped shared artifacts. Neither is safe for concurrent
/// multi-process access; the lock enforces single-instance execution.
#[derive(Debug, Clone)]
pub struct CyclePaths {
    pub ledger: PathBuf,
    pub pending: PathBuf,
    pub lock: PathBuf,
}

/// How a conversion cycle ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CycleOutcome {
    /// Every card in the ledger reached CONVERTED.
    Done,
    /// A pass converted zero items; the remaining cards cannot progress.
    Stalled,
}

impl CycleOutcome {
    pub const fn label(self) -> &'static str {
        match self {
            CycleOutcome::Done => "done",
            CycleOutcome::Stalled => "stalled",
        }
    }
}

/// End-of-run accounting for one conversion cycle.
#[derive(Debug, Clone, Serialize)]
pub struct CycleSummary {
    pub outcome: CycleOutcome,
    pub passes: u32,
    pub items_converted: u64,
    pub cards_converted: usize,
    pub cards_force_closed: usize,
    pub cards_remaining: usize,
    pub bucket_totals: BTreeMap<String, u64>,
    pub diagnostics: ClassifierDiagnostics,
}

impl CycleSummary {
    fn empty() -> Self {
        Self {
            outcome: CycleOutcome::Stalled,
            passes: 0,
            items_converted: 0,
            cards_converted: 0,
            cards_force_closed: 0,
            cards_remaining: 0,
            bucket_totals: BTreeMap::new(),
            diagnostics: ClassifierDiagnostics::default(),
        }
    }
}

/// Outcome of converting a single named card.
#[derive(Debug, Clone, Serialize)]
pub struct CardConversion {
    pub card_id: String,
    pub force_closed: bool,
    pub candidates: usize,
    pub staged: usize,
    pub submitted: usize,
    pub buckets: Vec<PolicyBucket>,
    pub diagnostics: ClassifierDiagnostics,
}

struct CardBatch {
    patron_key: String,
    candidates: usize,
    staged: usize,
    submitted: usize,
    buckets: Vec<PolicyBucket>,
}

/// Drives recommended cards through classification, policy bucketing, and
/// the transaction sink, committing ledger progress after every batch.
pub struct ConversionOrchestrator<C, S> {
    catalog: Arc<C>,
    sink: Arc<S>,
    config: WeedingConfig,
    paths: CyclePaths,
}

impl<C, S> ConversionOrchestrator<C, S>
where
    C: CatalogQueryAdapter + 'static,
    S: TransactionSink + 'static,
{
    pub fn new(catalog: Arc<C>, sink: Arc<S>, config: WeedingConfig, paths: CyclePaths) -> Self {
        Self {
            catalog,
            sink,
            config,
            paths,
        }
    }

    /// Run conversion passes until the ledger is done or a pass makes no
    /// progress.
    ///
    /// Each pass re-scans the updated ledger from scratch, seeding the
    /// running total with the items already converted this cycle so the
    /// quota keeps binding across passes, and commits ledger state before
    /// the next batch starts. Stale scratch artifacts are removed up front;
    /// a batch left behind by a crashed run is never resubmitted.
    pub fn run_cycle(
        &self,
        branch_filter: Option<&str>,
        today: NaiveDate,
    ) -> Result<CycleSummary, CycleError> {
        let _lock = CycleLock::acquire(&self.paths.lock)?;
        clear_scratch(&self.paths.pending)?;

        let mut ledger = CardLedger::load(&self.paths.ledger)?;
        let mut summary = CycleSummary::empty();

        loop {
            summary.passes += 1;
            let outcome = scan(&ledger, &self.config, branch_filter, summary.items_converted);

            let closed = apply_force_closures(&mut ledger, &outcome, today);
            if closed > 0 {
                summary.cards_force_closed += closed;
                ledger.save(&self.paths.ledger)?;
            }

            if ledger.all_converted() {
                summary.outcome = CycleOutcome::Done;
                break;
            }
            if outcome.recommended.is_empty() {
                summary.outcome = CycleOutcome::Stalled;
                break;
            }

            let mut results: BTreeMap<String, u64> = BTreeMap::new();
            let mut pass_items = 0u64;

            for id in &outcome.recommended {
                let Some(card) = ledger.get(id).cloned() else {
                    continue;
                };
                let Some(batch) = self.screen_and_submit(&card, today, &mut summary)? else {
                    continue;
                };
                if batch.submitted > 0 {
                    pass_items += batch.submitted as u64;
                    results.insert(batch.patron_key, batch.submitted as u64);
                }
            }

            if pass_items == 0 {
                summary.outcome = CycleOutcome::Stalled;
                break;
            }

            summary.items_converted += pass_items;
            summary.cards_converted += results.len();
            ledger.apply_conversion_results(&results, today);
            ledger.save(&self.paths.ledger)?;

            info!(
                pass = summary.passes,
                items = pass_items,
                cards = results.len(),
                "conversion pass committed"
            );
        }

        summary.cards_remaining = ledger.unconverted_count();
        info!(
            outcome = summary.outcome.label(),
            items = summary.items_converted,
            cards = summary.cards_converted,
            "conversion cycle finished"
        );
        Ok(summary)
    }

    /// Convert one named card, bypassing the quota arithmetic but not the
    /// policy screening or the force-close rules.
    pub fn convert_card(&self, id: &str, today: NaiveDate) -> Result<CardConversion, CycleError> {
        let _lock = CycleLock::acquire(&self.paths.lock)?;
        clear_scratch(&self.paths.pending)?;

        let mut ledger = CardLedger::load(&self.paths.ledger)?;
        let card = ledger
            .get(id)
            .cloned()
            .ok_or_else(|| CycleError::UnknownCard(id.to_string()))?;
        if card.is_converted() {
            return Err(CycleError::AlreadyConverted(id.to_string()));
        }

        if !card.carries_marker(&self.config.card_marker) || card.item_count == 0 {
            ledger.close_card(id, today);
            ledger.save(&self.paths.ledger)?;
            return Ok(CardConversion {
                card_id: id.to_string(),
                force_closed: true,
                candidates: 0,
                staged: 0,
                submitted: 0,
                buckets: Vec::new(),
                diagnostics: ClassifierDiagnostics::default(),
            });
        }

        let mut summary = CycleSummary::empty();
        let batch = self
            .screen_and_submit(&card, today, &mut summary)?
            .ok_or_else(|| CycleError::ChargesUnavailable(id.to_string()))?;

        if batch.submitted > 0 {
            let results = BTreeMap::from([(batch.patron_key.clone(), batch.submitted as u64)]);
            ledger.apply_conversion_results(&results, today);
            ledger.save(&self.paths.ledger)?;
        }

        Ok(CardConversion {
            card_id: id.to_string(),
            force_closed: false,
            candidates: batch.candidates,
            staged: batch.staged,
            submitted: batch.submitted,
            buckets: batch.buckets,
            diagnostics: summary.diagnostics,
        })
    }

    /// Classify one card's charges and submit whatever survives the
    /// preserve policies. Returns `None` when the charges query failed and
    /// the card must be left untouched this pass.
    fn screen_and_submit(
        &self,
        card: &DiscardCard,
        today: NaiveDate,
        summary: &mut CycleSummary,
    ) -> Result<Option<CardBatch>, CycleError> {
        let items = match self.catalog.charges_for_patron(&card.patron_key, today) {
            Ok(items) => items,
            Err(err) => {
                warn!(card = %card.id, error = %err, "charges query failed; leaving card open");
                summary.diagnostics.record("charges");
                return Ok(None);
            }
        };

        let classifier = ItemClassifier::new(self.catalog.as_ref(), &self.config);
        let (table, diagnostics) = classifier.classify(&items);
        summary.diagnostics.merge(diagnostics);

        let buckets = bucket_items(&table, &DEFAULT_PRESERVE_POLICIES);
        for bucket in &buckets {
            if !bucket.items.is_empty() {
                *summary
                    .bucket_totals
                    .entry(bucket.policy.to_string())
                    .or_insert(0) += bucket.items.len() as u64;
            }
        }

        let clean = discardable(&table, &DEFAULT_PRESERVE_POLICIES);
        let staged = clean.len();
        let submitted = if clean.is_empty() {
            0
        } else {
            stage_batch(&self.paths.pending, &clean)?;
            let submitted = self.sink.submit(&clean)?;
            // Submitted batches never linger; a crash between stage and
            // submit leaves an artifact the next cycle's hygiene removes.
            clear_scratch(&self.paths.pending)?;
            submitted
        };

        info!(
            card = %card.id,
            candidates = items.len(),
            staged,
            submitted,
            "card screened"
        );

        Ok(Some(CardBatch {
            patron_key: card.patron_key.clone(),
            candidates: items.len(),
            staged,
            submitted,
            buckets,
        }))
    }
}

fn stage_batch(path: &Path, items: &[ItemKey]) -> Result<(), CycleError> {
    let mut body = String::new();
    for key in items {
        body.push_str(&key.to_string());
        body.push('\n');
    }
    fs::write(path, body).map_err(|source| CycleError::Scratch {
        path: path.to_path_buf(),
        source,
    })
}

fn clear_scratch(path: &Path) -> Result<(), CycleError> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(source) => Err(CycleError::Scratch {
            path: path.to_path_buf(),
            source,
        }),
    }
}

/// Advisory single-flight guard around a cycle. The lock file is created
/// exclusively and removed on drop.
struct CycleLock {
    path: PathBuf,
}

impl CycleLock {
    fn acquire(path: &Path) -> Result<Self, CycleError> {
        match OpenOptions::new().write(true).create_new(true).open(path) {
            Ok(_) => Ok(Self {
                path: path.to_path_buf(),
            }),
            Err(err) if err.kind() == std::io::ErrorKind::AlreadyExists => {
                Err(CycleError::AlreadyRunning {
                    path: path.to_path_buf(),
                })
            }
            Err(source) => Err(CycleError::Scratch {
                path: path.to_path_buf(),
                source,
            }),
        }
    }
}

impl Drop for CycleLock {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.path);
    }
}
