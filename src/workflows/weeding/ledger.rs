use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::NaiveDate;

use super::catalog::CardSeed;
use super::domain::{CardStatus, DiscardCard};

const LEDGER_FIELDS: usize = 11;
const DATE_FORMAT: &str = "%Y%m%d";
const NEVER_CONVERTED: &str = "0";

/// Persistence failures are fatal: the caller must never continue against a
/// half-read or half-written ledger.
#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("ledger {path} unreadable: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("ledger {path} unwritable: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("malformed ledger record at line {line}: {detail}")]
    Malformed { line: usize, detail: String },
    #[error("ledger record scan failed: {0}")]
    Records(#[from] csv::Error),
    #[error("ledger still has unconverted cards; pass --force to replace it")]
    ResetRefused,
}

/// The discard-card table for one weeding cycle. Keyed by card id, which
/// gives every iteration the lexicographic order the scanner's resume
/// behavior depends on. The pipe-delimited flat form exists only at the
/// load/save boundary.
#[derive(Debug, Clone, Default)]
pub struct CardLedger {
    cards: BTreeMap<String, DiscardCard>,
}

impl CardLedger {
    pub fn from_cards(cards: impl IntoIterator<Item = DiscardCard>) -> Self {
        Self {
            cards: cards
                .into_iter()
                .map(|card| (card.id.clone(), card))
                .collect(),
        }
    }

    /// Build a fresh ledger from the discard-profile feed, dropping
    /// administratively excluded cards and zeroing every lifecycle field.
    pub fn reset_from(seeds: Vec<CardSeed>, denylist: &[String]) -> Self {
        let cards = seeds
            .into_iter()
            .filter(|seed| !is_denylisted(seed, denylist))
            .map(|seed| DiscardCard {
                id: seed.id,
                patron_key: seed.patron_key,
                description: seed.description,
                date_created: seed.date_created,
                date_last_used: seed.date_last_used,
                item_count: seed.item_count,
                holds_count: seed.holds_count,
                bills_count: seed.bills_count,
                status: CardStatus::parse(&seed.status),
                date_converted: None,
                converted_total: 0,
            });
        Self::from_cards(cards)
    }

    pub fn load(path: &Path) -> Result<Self, LedgerError> {
        let file = fs::File::open(path).map_err(|source| LedgerError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let mut reader = csv::ReaderBuilder::new()
            .delimiter(b'|')
            .has_headers(false)
            .flexible(true)
            .from_reader(file);

        let mut cards = BTreeMap::new();
        for (idx, record) in reader.records().enumerate() {
            let record = record?;
            let card = parse_record(&record, idx + 1)?;
            cards.insert(card.id.clone(), card);
        }
        Ok(Self { cards })
    }

    /// Atomic replace: the flat form is staged beside the target and renamed
    /// over it, so a crash never leaves a truncated ledger.
    pub fn save(&self, path: &Path) -> Result<(), LedgerError> {
        let mut writer = csv::WriterBuilder::new()
            .delimiter(b'|')
            .has_headers(false)
            .quote_style(csv::QuoteStyle::Never)
            .from_writer(Vec::new());
        for card in self.cards.values() {
            writer.write_record(render_record(card))?;
        }
        let bytes = writer
            .into_inner()
            .map_err(|err| err.into_error())
            .map_err(|source| LedgerError::Write {
                path: path.to_path_buf(),
                source,
            })?;

        let staged = path.with_extension("tmp");
        fs::write(&staged, bytes).map_err(|source| LedgerError::Write {
            path: staged.clone(),
            source,
        })?;
        fs::rename(&staged, path).map_err(|source| LedgerError::Write {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Merge conversion results keyed by patron key: stamp the conversion
    /// date and grow the cumulative total. Cards absent from `results` are
    /// untouched.
    pub fn apply_conversion_results(&mut self, results: &BTreeMap<String, u64>, today: NaiveDate) {
        for card in self.cards.values_mut() {
            if let Some(count) = results.get(&card.patron_key) {
                card.date_converted = Some(today);
                card.converted_total += count;
            }
        }
    }

    /// Stamp one card closed without touching its converted total.
    pub fn close_card(&mut self, id: &str, today: NaiveDate) {
        if let Some(card) = self.cards.get_mut(id) {
            if card.date_converted.is_none() {
                card.date_converted = Some(today);
            }
        }
    }

    pub fn get(&self, id: &str) -> Option<&DiscardCard> {
        self.cards.get(id)
    }

    /// Cards in deterministic id order.
    pub fn cards(&self) -> impl Iterator<Item = &DiscardCard> {
        self.cards.values()
    }

    pub fn len(&self) -> usize {
        self.cards.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cards.is_empty()
    }

    pub fn all_converted(&self) -> bool {
        self.cards.values().all(DiscardCard::is_converted)
    }

    pub fn unconverted_count(&self) -> usize {
        self.cards
            .values()
            .filter(|card| !card.is_converted())
            .count()
    }
}

fn is_denylisted(seed: &CardSeed, denylist: &[String]) -> bool {
    let id = seed.id.to_ascii_uppercase();
    let description = seed.description.to_ascii_uppercase();
    denylist.iter().any(|marker| {
        let marker = marker.to_ascii_uppercase();
        id.contains(&marker) || description.contains(&marker)
    })
}

fn parse_record(record: &csv::StringRecord, line: usize) -> Result<DiscardCard, LedgerError> {
    // A trailing delimiter shows up as one extra empty field; anything short
    // of the full schema is corruption.
    if record.len() < LEDGER_FIELDS {
        return Err(LedgerError::Malformed {
            line,
            detail: format!("expected {LEDGER_FIELDS} fields, found {}", record.len()),
        });
    }

    let field = |idx: usize| record.get(idx).unwrap_or_default().to_string();
    let count = |idx: usize, name: &str| -> Result<u32, LedgerError> {
        record
            .get(idx)
            .unwrap_or_default()
            .trim()
            .parse::<u32>()
            .map_err(|_| LedgerError::Malformed {
                line,
                detail: format!("{name} is not a count"),
            })
    };

    let date_converted = match record.get(9).unwrap_or_default().trim() {
        NEVER_CONVERTED => None,
        raw => Some(
            NaiveDate::parse_from_str(raw, DATE_FORMAT).map_err(|_| LedgerError::Malformed {
                line,
                detail: format!("dateConverted '{raw}' is neither {NEVER_CONVERTED} nor YYYYMMDD"),
            })?,
        ),
    };

    let converted_total = record
        .get(10)
        .unwrap_or_default()
        .trim()
        .parse::<u64>()
        .map_err(|_| LedgerError::Malformed {
            line,
            detail: "convertedTotal is not a count".to_string(),
        })?;

    Ok(DiscardCard {
        id: field(0),
        patron_key: field(1),
        description: field(2),
        date_created: field(3),
        date_last_used: field(4),
        item_count: count(5, "itemCount")?,
        holds_count: count(6, "holdsCount")?,
        bills_count: count(7, "billsCount")?,
        status: CardStatus::parse(record.get(8).unwrap_or_default()),
        date_converted,
        converted_total,
    })
}

fn render_record(card: &DiscardCard) -> Vec<String> {
    let date_converted = match card.date_converted {
        Some(date) => date.format(DATE_FORMAT).to_string(),
        None => NEVER_CONVERTED.to_string(),
    };
    vec![
        card.id.clone(),
        card.patron_key.clone(),
        card.description.clone(),
        card.date_created.clone(),
        card.date_last_used.clone(),
        card.item_count.to_string(),
        card.holds_count.to_string(),
        card.bills_count.to_string(),
        card.status.code().to_string(),
        date_converted,
        card.converted_total.to_string(),
        // Trailing delimiter in the flat form.
        String::new(),
    ]
}
