use std::fmt;
use std::str::FromStr;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Width of the branch prefix at the front of every card id.
pub const BRANCH_WIDTH: usize = 3;

/// Patron status reported by the catalog for a discard card. Only BARRED is
/// semantically significant; any unrecognized status string is carried
/// through untouched so the ledger round-trips byte for byte.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CardStatus {
    Ok,
    Barred,
    Other(String),
}

impl CardStatus {
    pub fn parse(raw: &str) -> Self {
        let trimmed = raw.trim();
        if trimmed.eq_ignore_ascii_case("ok") {
            Self::Ok
        } else if trimmed.eq_ignore_ascii_case("barred") {
            Self::Barred
        } else {
            Self::Other(trimmed.to_string())
        }
    }

    pub fn code(&self) -> &str {
        match self {
            CardStatus::Ok => "OK",
            CardStatus::Barred => "BARRED",
            CardStatus::Other(raw) => raw,
        }
    }

    pub fn is_barred(&self) -> bool {
        matches!(self, CardStatus::Barred)
    }
}

/// One row of the discard-card ledger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiscardCard {
    pub id: String,
    pub patron_key: String,
    pub description: String,
    pub date_created: String,
    pub date_last_used: String,
    pub item_count: u32,
    pub holds_count: u32,
    pub bills_count: u32,
    pub status: CardStatus,
    pub date_converted: Option<NaiveDate>,
    pub converted_total: u64,
}

impl DiscardCard {
    /// Fixed-width branch prefix of the card id.
    pub fn branch_code(&self) -> &str {
        let end = self
            .id
            .char_indices()
            .nth(BRANCH_WIDTH)
            .map(|(idx, _)| idx)
            .unwrap_or(self.id.len());
        &self.id[..end]
    }

    /// Closed for the current cycle once a conversion date is stamped.
    pub fn is_converted(&self) -> bool {
        self.date_converted.is_some()
    }

    /// A legitimate discard card carries the marker in its id or description.
    pub fn carries_marker(&self, marker: &str) -> bool {
        let marker = marker.to_ascii_uppercase();
        self.id.to_ascii_uppercase().contains(&marker)
            || self.description.to_ascii_uppercase().contains(&marker)
    }
}

/// Composite item identity: the same title/sequence pair recurs across
/// sibling copies, so a single surrogate integer cannot stand in for it.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ItemKey {
    pub title: String,
    pub sequence: String,
    pub copy: u32,
}

impl ItemKey {
    pub fn new(title: impl Into<String>, sequence: impl Into<String>, copy: u32) -> Self {
        Self {
            title: title.into(),
            sequence: sequence.into(),
            copy,
        }
    }
}

impl fmt::Display for ItemKey {
    /// Canonical wire form, trailing delimiter included.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}|{}|{}|", self.title, self.sequence, self.copy)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ItemKeyParseError {
    #[error("item key '{0}' must carry title|sequence|copy fields")]
    MissingFields(String),
    #[error("item key '{0}' has a non-numeric copy number")]
    BadCopyNumber(String),
}

impl FromStr for ItemKey {
    type Err = ItemKeyParseError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let mut parts = raw.trim().split('|');
        let title = parts.next().unwrap_or_default();
        let sequence = parts.next().unwrap_or_default();
        let copy = parts.next().unwrap_or_default();
        if title.is_empty() || sequence.is_empty() || copy.is_empty() {
            return Err(ItemKeyParseError::MissingFields(raw.to_string()));
        }
        let copy = copy
            .parse::<u32>()
            .map_err(|_| ItemKeyParseError::BadCopyNumber(raw.to_string()))?;
        Ok(Self::new(title, sequence, copy))
    }
}

/// A sibling copy of a title together with its current location, as reported
/// by the catalog holdings query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Holding {
    pub key: ItemKey,
    pub location: String,
}

impl Holding {
    pub fn new(key: ItemKey, location: impl Into<String>) -> Self {
        Self {
            key,
            location: location.into(),
        }
    }
}

/// Per-item disqualification mask. Bit values match the legacy wire format
/// and must not be renumbered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ItemFlags(u8);

impl ItemFlags {
    pub const DISC: ItemFlags = ItemFlags(0x01);
    /// Set when the item IS the last viable copy of its title.
    pub const LAST_COPY: ItemFlags = ItemFlags(0x02);
    pub const BILLED: ItemFlags = ItemFlags(0x04);
    pub const ON_ORDER: ItemFlags = ItemFlags(0x08);
    pub const SERIAL: ItemFlags = ItemFlags(0x10);
    /// Reserved by the legacy format; never set by any check.
    pub const ACCOUNTABLE: ItemFlags = ItemFlags(0x20);
    pub const TITLE_HELD: ItemFlags = ItemFlags(0x40);
    pub const COPY_HELD: ItemFlags = ItemFlags(0x80);

    /// A freshly constructed item carries the staged-for-discard bit only.
    pub const fn seed() -> Self {
        Self::DISC
    }

    pub const fn empty() -> Self {
        ItemFlags(0)
    }

    pub const fn with(self, other: ItemFlags) -> Self {
        ItemFlags(self.0 | other.0)
    }

    pub fn insert(&mut self, other: ItemFlags) {
        self.0 |= other.0;
    }

    /// True iff every bit of `policy` is present.
    pub const fn matches(self, policy: ItemFlags) -> bool {
        self.0 & policy.0 == policy.0
    }

    pub const fn bits(self) -> u8 {
        self.0
    }

    pub fn labels(self) -> Vec<&'static str> {
        const TABLE: [(ItemFlags, &str); 8] = [
            (ItemFlags::DISC, "DISC"),
            (ItemFlags::LAST_COPY, "LAST_COPY"),
            (ItemFlags::BILLED, "BILLED"),
            (ItemFlags::ON_ORDER, "ON_ORDER"),
            (ItemFlags::SERIAL, "SERIAL"),
            (ItemFlags::ACCOUNTABLE, "ACCOUNTABLE"),
            (ItemFlags::TITLE_HELD, "TITLE_HELD"),
            (ItemFlags::COPY_HELD, "COPY_HELD"),
        ];
        TABLE
            .iter()
            .filter(|(flag, _)| self.matches(*flag))
            .map(|(_, label)| *label)
            .collect()
    }
}

/// Per-card health mask computed by the quota scanner. Deliberately a
/// distinct type from `ItemFlags` so the two bit vocabularies cannot be
/// mixed up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CardFlags(u8);

impl CardFlags {
    pub const OK: CardFlags = CardFlags(0x01);
    pub const OVERLOADED: CardFlags = CardFlags(0x02);
    pub const BARRED: CardFlags = CardFlags(0x04);
    pub const MISNAMED: CardFlags = CardFlags(0x08);
    pub const RECOMMEND: CardFlags = CardFlags(0x10);
    pub const CONVERTED: CardFlags = CardFlags(0x20);

    pub const fn empty() -> Self {
        CardFlags(0)
    }

    pub const fn with(self, other: CardFlags) -> Self {
        CardFlags(self.0 | other.0)
    }

    pub fn insert(&mut self, other: CardFlags) {
        self.0 |= other.0;
    }

    pub const fn contains(self, other: CardFlags) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn labels(self) -> Vec<&'static str> {
        const TABLE: [(CardFlags, &str); 6] = [
            (CardFlags::OK, "OK"),
            (CardFlags::OVERLOADED, "OVERLOADED"),
            (CardFlags::BARRED, "BARRED"),
            (CardFlags::MISNAMED, "MISNAMED"),
            (CardFlags::RECOMMEND, "RECOMMEND"),
            (CardFlags::CONVERTED, "CONVERTED"),
        ];
        TABLE
            .iter()
            .filter(|(flag, _)| self.contains(*flag))
            .map(|(_, label)| *label)
            .collect()
    }
}
