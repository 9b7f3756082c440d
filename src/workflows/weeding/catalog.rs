use std::io::Write;
use std::process::{Command, Stdio};
use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};

use chrono::NaiveDate;

use super::domain::{Holding, ItemKey};

/// Error raised by a catalog query. The classifier recovers from these per
/// predicate; the reset and charge paths surface them to the caller.
#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("catalog query '{query}' could not be started: {source}")]
    Spawn {
        query: &'static str,
        source: std::io::Error,
    },
    #[error("catalog query '{query}' exited with status {status}")]
    Query { query: &'static str, status: i32 },
    #[error("catalog query '{query}' produced no answer within {seconds}s")]
    Timeout { query: &'static str, seconds: u64 },
    #[error("catalog query '{query}' returned a malformed record: {detail}")]
    Malformed { query: &'static str, detail: String },
}

/// Raw card tuple from the discard-profile report, before any ledger-side
/// filtering.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CardSeed {
    pub id: String,
    pub patron_key: String,
    pub description: String,
    pub date_created: String,
    pub date_last_used: String,
    pub item_count: u32,
    pub holds_count: u32,
    pub bills_count: u32,
    pub status: String,
}

/// Query capabilities the weeding engine needs from the integrated library
/// system. Each key-returning query may answer at a coarser granularity than
/// the caller's candidate set; extra keys are the caller's problem to ignore.
pub trait CatalogQueryAdapter: Send + Sync {
    /// Items currently charged to a patron, cut off at `before`.
    fn charges_for_patron(
        &self,
        patron_key: &str,
        before: NaiveDate,
    ) -> Result<Vec<ItemKey>, CatalogError>;

    /// Every sibling copy (with its current location) of every title that
    /// appears in `items`.
    fn title_holdings(&self, items: &[ItemKey]) -> Result<Vec<Holding>, CatalogError>;

    fn billed_items(&self, items: &[ItemKey]) -> Result<Vec<ItemKey>, CatalogError>;

    fn ordered_items(&self, items: &[ItemKey]) -> Result<Vec<ItemKey>, CatalogError>;

    fn serial_controlled_items(&self, items: &[ItemKey]) -> Result<Vec<ItemKey>, CatalogError>;

    fn title_held_items(&self, items: &[ItemKey]) -> Result<Vec<ItemKey>, CatalogError>;

    fn copy_held_items(&self, items: &[ItemKey]) -> Result<Vec<ItemKey>, CatalogError>;

    /// The authoritative discard-profile card list used by a ledger reset.
    fn discard_profile_cards(&self) -> Result<Vec<CardSeed>, CatalogError>;
}

/// Live adapter: each query is one blocking invocation of the site's catalog
/// toolchain, `<command> <query> [args..]`, with candidate keys written to
/// stdin one per line and answers read from stdout in the same form.
pub struct ScriptCatalog {
    command: String,
    timeout: Duration,
}

impl ScriptCatalog {
    pub fn new(command: impl Into<String>, timeout: Duration) -> Self {
        Self {
            command: command.into(),
            timeout,
        }
    }

    fn query_keys(
        &self,
        query: &'static str,
        args: &[&str],
        items: &[ItemKey],
    ) -> Result<Vec<ItemKey>, CatalogError> {
        let input = render_keys(items);
        let lines = run_script(&self.command, self.timeout, query, args, Some(input))?;
        lines
            .iter()
            .map(|line| {
                line.parse::<ItemKey>().map_err(|err| CatalogError::Malformed {
                    query,
                    detail: err.to_string(),
                })
            })
            .collect()
    }
}

impl CatalogQueryAdapter for ScriptCatalog {
    fn charges_for_patron(
        &self,
        patron_key: &str,
        before: NaiveDate,
    ) -> Result<Vec<ItemKey>, CatalogError> {
        let cutoff = before.format("%Y%m%d").to_string();
        let lines = run_script(
            &self.command,
            self.timeout,
            "charges",
            &[patron_key, &cutoff],
            None,
        )?;
        lines
            .iter()
            .map(|line| {
                line.parse::<ItemKey>().map_err(|err| CatalogError::Malformed {
                    query: "charges",
                    detail: err.to_string(),
                })
            })
            .collect()
    }

    fn title_holdings(&self, items: &[ItemKey]) -> Result<Vec<Holding>, CatalogError> {
        let input = render_keys(items);
        let lines = run_script(&self.command, self.timeout, "holdings", &[], Some(input))?;
        lines
            .iter()
            .map(|line| parse_holding(line))
            .collect()
    }

    fn billed_items(&self, items: &[ItemKey]) -> Result<Vec<ItemKey>, CatalogError> {
        self.query_keys("bills", &[], items)
    }

    fn ordered_items(&self, items: &[ItemKey]) -> Result<Vec<ItemKey>, CatalogError> {
        self.query_keys("orders", &[], items)
    }

    fn serial_controlled_items(&self, items: &[ItemKey]) -> Result<Vec<ItemKey>, CatalogError> {
        self.query_keys("serials", &[], items)
    }

    fn title_held_items(&self, items: &[ItemKey]) -> Result<Vec<ItemKey>, CatalogError> {
        self.query_keys("title-holds", &[], items)
    }

    fn copy_held_items(&self, items: &[ItemKey]) -> Result<Vec<ItemKey>, CatalogError> {
        self.query_keys("copy-holds", &[], items)
    }

    fn discard_profile_cards(&self) -> Result<Vec<CardSeed>, CatalogError> {
        let lines = run_script(&self.command, self.timeout, "discard-profile", &[], None)?;
        lines.iter().map(|line| parse_card_seed(line)).collect()
    }
}

fn render_keys(items: &[ItemKey]) -> String {
    let mut out = String::new();
    for key in items {
        out.push_str(&key.to_string());
        out.push('\n');
    }
    out
}

fn parse_holding(line: &str) -> Result<Holding, CatalogError> {
    let fields: Vec<&str> = line.trim().split('|').collect();
    if fields.len() < 4 || fields[3].is_empty() {
        return Err(CatalogError::Malformed {
            query: "holdings",
            detail: format!("expected title|sequence|copy|location|, got '{line}'"),
        });
    }
    let key = format!("{}|{}|{}|", fields[0], fields[1], fields[2])
        .parse::<ItemKey>()
        .map_err(|err| CatalogError::Malformed {
            query: "holdings",
            detail: err.to_string(),
        })?;
    Ok(Holding::new(key, fields[3]))
}

fn parse_card_seed(line: &str) -> Result<CardSeed, CatalogError> {
    let fields: Vec<&str> = line.trim().split('|').collect();
    if fields.len() < 9 {
        return Err(CatalogError::Malformed {
            query: "discard-profile",
            detail: format!("expected 9 card fields, got {} in '{line}'", fields.len()),
        });
    }
    let numeric = |idx: usize| -> Result<u32, CatalogError> {
        fields[idx]
            .trim()
            .parse::<u32>()
            .map_err(|_| CatalogError::Malformed {
                query: "discard-profile",
                detail: format!("field {} of '{line}' is not a count", idx + 1),
            })
    };
    Ok(CardSeed {
        id: fields[0].to_string(),
        patron_key: fields[1].to_string(),
        description: fields[2].to_string(),
        date_created: fields[3].to_string(),
        date_last_used: fields[4].to_string(),
        item_count: numeric(5)?,
        holds_count: numeric(6)?,
        bills_count: numeric(7)?,
        status: fields[8].to_string(),
    })
}

/// Run `<command> <query> [args..]`, feeding `input` to stdin and collecting
/// non-empty stdout lines. The child is killed once `timeout` elapses; the
/// suspension all happens here, nowhere else in the engine.
pub(crate) fn run_script(
    command: &str,
    timeout: Duration,
    query: &'static str,
    args: &[&str],
    input: Option<String>,
) -> Result<Vec<String>, CatalogError> {
    let mut child = Command::new(command)
        .arg(query)
        .args(args)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .map_err(|source| CatalogError::Spawn { query, source })?;

    let stdout = child.stdout.take();
    let (tx, rx) = mpsc::channel();
    let reader = thread::spawn(move || {
        let mut buf = String::new();
        if let Some(mut stdout) = stdout {
            use std::io::Read;
            let _ = stdout.read_to_string(&mut buf);
        }
        let _ = tx.send(buf);
    });

    if let Some(mut stdin) = child.stdin.take() {
        if let Some(input) = input {
            // A write failure here means the child already exited; its exit
            // status carries the real story.
            let _ = stdin.write_all(input.as_bytes());
        }
    }

    let deadline = Instant::now() + timeout;
    let status = loop {
        match child.try_wait() {
            Ok(Some(status)) => break status,
            Ok(None) => {
                if Instant::now() >= deadline {
                    let _ = child.kill();
                    let _ = child.wait();
                    let _ = reader.join();
                    return Err(CatalogError::Timeout {
                        query,
                        seconds: timeout.as_secs(),
                    });
                }
                thread::sleep(Duration::from_millis(25));
            }
            Err(source) => {
                let _ = reader.join();
                return Err(CatalogError::Spawn { query, source });
            }
        }
    };

    let raw = rx.recv().unwrap_or_default();
    let _ = reader.join();

    if !status.success() {
        return Err(CatalogError::Query {
            query,
            status: status.code().unwrap_or(-1),
        });
    }

    Ok(raw
        .lines()
        .map(|line| line.trim().to_string())
        .filter(|line| !line.is_empty())
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn holding_line_parses_key_and_location() {
        let holding = parse_holding("1482930|18|2|STACKS|").expect("parses");
        assert_eq!(holding.key, ItemKey::new("1482930", "18", 2));
        assert_eq!(holding.location, "STACKS");
    }

    #[test]
    fn holding_line_without_location_is_malformed() {
        assert!(parse_holding("1482930|18|2|").is_err());
    }

    #[test]
    fn card_seed_line_parses_all_nine_fields() {
        let seed = parse_card_seed(
            "WOO-D1|50123|WOO ADULT DISCARD|20250103|20250601|1500|2|0|OK|",
        )
        .expect("parses");
        assert_eq!(seed.id, "WOO-D1");
        assert_eq!(seed.patron_key, "50123");
        assert_eq!(seed.item_count, 1500);
        assert_eq!(seed.holds_count, 2);
        assert_eq!(seed.status, "OK");
    }

    #[test]
    fn card_seed_line_with_bad_count_is_malformed() {
        let err = parse_card_seed("WOO-D1|50123|desc|d|d|many|0|0|OK|").expect_err("rejects");
        assert!(matches!(err, CatalogError::Malformed { .. }));
    }

    #[test]
    fn key_batches_render_one_per_line() {
        let rendered = render_keys(&[ItemKey::new("10", "1", 1), ItemKey::new("11", "2", 3)]);
        assert_eq!(rendered, "10|1|1|\n11|2|3|\n");
    }
}
