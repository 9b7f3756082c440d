use std::collections::HashMap;
use std::fs;
use std::sync::Arc;

use super::common::{card, config, key, today, FixtureCatalog, RecordingSink};
use crate::workflows::weeding::ledger::CardLedger;
use crate::workflows::weeding::orchestrator::{
    ConversionOrchestrator, CycleError, CycleOutcome, CyclePaths,
};

fn paths(dir: &tempfile::TempDir) -> CyclePaths {
    CyclePaths {
        ledger: dir.path().join("discards.db"),
        pending: dir.path().join("discards.pending"),
        lock: dir.path().join("discards.lock"),
    }
}

fn write_ledger(paths: &CyclePaths, ledger: &CardLedger) {
    ledger.save(&paths.ledger).expect("ledger saves");
}

fn orchestrator(
    catalog: FixtureCatalog,
    sink: RecordingSink,
    paths: CyclePaths,
) -> ConversionOrchestrator<FixtureCatalog, RecordingSink> {
    ConversionOrchestrator::new(Arc::new(catalog), Arc::new(sink), config(), paths)
}

#[test]
fn clean_ledger_converts_to_done() {
    let dir = tempfile::tempdir().expect("temp dir");
    let paths = paths(&dir);
    write_ledger(
        &paths,
        &CardLedger::from_cards(vec![
            card("WOO-D1", "WOO DISCARD", 2),
            card("WOO-D2", "WOO DISCARD", 1),
        ]),
    );

    let catalog = FixtureCatalog {
        charges: HashMap::from([
            ("p-WOO-D1".to_string(), vec![key("100", 1), key("110", 1)]),
            ("p-WOO-D2".to_string(), vec![key("120", 1)]),
        ]),
        ..FixtureCatalog::default()
    };
    let sink = RecordingSink::default();
    let orchestrator = orchestrator(catalog, sink, paths.clone());

    let summary = orchestrator.run_cycle(None, today()).expect("cycle runs");

    assert_eq!(summary.outcome, CycleOutcome::Done);
    assert_eq!(summary.items_converted, 3);
    assert_eq!(summary.cards_converted, 2);
    assert_eq!(summary.cards_remaining, 0);
    assert!(summary.diagnostics.is_clean());

    let reloaded = CardLedger::load(&paths.ledger).expect("ledger reloads");
    assert!(reloaded.all_converted());
    assert_eq!(reloaded.get("WOO-D1").expect("present").converted_total, 2);
    assert_eq!(
        reloaded.get("WOO-D1").expect("present").date_converted,
        Some(today())
    );
}

#[test]
fn fully_preserved_cards_stall_the_cycle_and_stay_open() {
    let dir = tempfile::tempdir().expect("temp dir");
    let paths = paths(&dir);
    write_ledger(
        &paths,
        &CardLedger::from_cards(vec![card("WOO-D1", "WOO DISCARD", 1)]),
    );

    let catalog = FixtureCatalog {
        charges: HashMap::from([("p-WOO-D1".to_string(), vec![key("100", 1)])]),
        billed: vec![key("100", 1)],
        ..FixtureCatalog::default()
    };
    let sink = RecordingSink::default();
    let orchestrator = orchestrator(catalog, sink, paths.clone());

    let summary = orchestrator.run_cycle(None, today()).expect("cycle runs");

    assert_eq!(summary.outcome, CycleOutcome::Stalled);
    assert_eq!(summary.items_converted, 0);
    assert_eq!(summary.cards_remaining, 1);
    assert_eq!(summary.bucket_totals.get("billed"), Some(&1));

    let reloaded = CardLedger::load(&paths.ledger).expect("ledger reloads");
    assert!(!reloaded.get("WOO-D1").expect("present").is_converted());
}

#[test]
fn quota_keeps_binding_across_passes() {
    let dir = tempfile::tempdir().expect("temp dir");
    let mut paths = paths(&dir);
    paths.ledger = dir.path().join("small.db");

    // Quota 5: the first pass converts the 4-item card, after which the
    // 3-item card no longer fits and the cycle stalls.
    let mut cfg = config();
    cfg.item_quota = 5;

    write_ledger(
        &paths,
        &CardLedger::from_cards(vec![
            card("AAA-D1", "AAA DISCARD", 4),
            card("BBB-D1", "BBB DISCARD", 3),
        ]),
    );

    let catalog = FixtureCatalog {
        charges: HashMap::from([
            (
                "p-AAA-D1".to_string(),
                vec![key("100", 1), key("110", 1), key("120", 1), key("130", 1)],
            ),
            (
                "p-BBB-D1".to_string(),
                vec![key("200", 1), key("210", 1), key("220", 1)],
            ),
        ]),
        ..FixtureCatalog::default()
    };
    let sink = RecordingSink::default();
    let orchestrator =
        ConversionOrchestrator::new(Arc::new(catalog), Arc::new(sink), cfg, paths.clone());

    let summary = orchestrator.run_cycle(None, today()).expect("cycle runs");

    assert_eq!(summary.outcome, CycleOutcome::Stalled);
    assert_eq!(summary.items_converted, 4);
    assert_eq!(summary.cards_converted, 1);
    assert_eq!(summary.cards_remaining, 1);

    let reloaded = CardLedger::load(&paths.ledger).expect("ledger reloads");
    assert!(reloaded.get("AAA-D1").expect("present").is_converted());
    assert!(!reloaded.get("BBB-D1").expect("present").is_converted());
}

#[test]
fn stale_pending_artifact_is_cleared_at_cycle_start() {
    let dir = tempfile::tempdir().expect("temp dir");
    let paths = paths(&dir);
    write_ledger(
        &paths,
        &CardLedger::from_cards(vec![{
            let mut done = card("WOO-D1", "WOO DISCARD", 2);
            done.date_converted = Some(today());
            done
        }]),
    );
    fs::write(&paths.pending, "9999|1|1|\n").expect("stale artifact writable");

    let orchestrator = orchestrator(
        FixtureCatalog::default(),
        RecordingSink::default(),
        paths.clone(),
    );
    let summary = orchestrator.run_cycle(None, today()).expect("cycle runs");

    assert_eq!(summary.outcome, CycleOutcome::Done);
    assert!(!paths.pending.exists());
}

#[test]
fn held_lock_blocks_a_second_cycle() {
    let dir = tempfile::tempdir().expect("temp dir");
    let paths = paths(&dir);
    write_ledger(
        &paths,
        &CardLedger::from_cards(vec![card("WOO-D1", "WOO DISCARD", 1)]),
    );
    fs::write(&paths.lock, "").expect("lock writable");

    let orchestrator = orchestrator(
        FixtureCatalog::default(),
        RecordingSink::default(),
        paths.clone(),
    );
    let err = orchestrator
        .run_cycle(None, today())
        .expect_err("lock is held");
    assert!(matches!(err, CycleError::AlreadyRunning { .. }));
}

#[test]
fn misnamed_cards_are_closed_without_reaching_the_sink() {
    let dir = tempfile::tempdir().expect("temp dir");
    let paths = paths(&dir);
    write_ledger(
        &paths,
        &CardLedger::from_cards(vec![card("WOO-R4", "reserve shelf", 5)]),
    );

    let catalog = FixtureCatalog {
        charges: HashMap::from([("p-WOO-R4".to_string(), vec![key("100", 1)])]),
        ..FixtureCatalog::default()
    };
    let orchestrator = orchestrator(catalog, RecordingSink::default(), paths.clone());

    let summary = orchestrator.run_cycle(None, today()).expect("cycle runs");

    assert_eq!(summary.outcome, CycleOutcome::Done);
    assert_eq!(summary.items_converted, 0);
    assert_eq!(summary.cards_force_closed, 1);

    let reloaded = CardLedger::load(&paths.ledger).expect("ledger reloads");
    let closed = reloaded.get("WOO-R4").expect("present");
    assert!(closed.is_converted());
    assert_eq!(closed.converted_total, 0);
}

#[test]
fn failing_charges_query_stalls_instead_of_converting() {
    let dir = tempfile::tempdir().expect("temp dir");
    let paths = paths(&dir);
    write_ledger(
        &paths,
        &CardLedger::from_cards(vec![card("WOO-D1", "WOO DISCARD", 2)]),
    );

    let catalog = FixtureCatalog {
        failing: ["charges"].into_iter().collect(),
        ..FixtureCatalog::default()
    };
    let orchestrator = orchestrator(catalog, RecordingSink::default(), paths.clone());

    let summary = orchestrator.run_cycle(None, today()).expect("cycle runs");

    assert_eq!(summary.outcome, CycleOutcome::Stalled);
    assert_eq!(summary.diagnostics.failed_queries.get("charges"), Some(&1));

    let reloaded = CardLedger::load(&paths.ledger).expect("ledger reloads");
    assert!(!reloaded.get("WOO-D1").expect("present").is_converted());
}

#[test]
fn convert_card_screens_and_stamps_one_card() {
    let dir = tempfile::tempdir().expect("temp dir");
    let paths = paths(&dir);
    write_ledger(
        &paths,
        &CardLedger::from_cards(vec![
            card("WOO-D1", "WOO DISCARD", 2),
            card("WOO-D2", "WOO DISCARD", 1),
        ]),
    );

    let catalog = FixtureCatalog {
        charges: HashMap::from([(
            "p-WOO-D1".to_string(),
            vec![key("100", 1), key("110", 1)],
        )]),
        title_holds: vec![key("110", 1)],
        ..FixtureCatalog::default()
    };
    let orchestrator = orchestrator(catalog, RecordingSink::default(), paths.clone());

    let conversion = orchestrator
        .convert_card("WOO-D1", today())
        .expect("card converts");

    assert!(!conversion.force_closed);
    assert_eq!(conversion.candidates, 2);
    assert_eq!(conversion.staged, 1);
    assert_eq!(conversion.submitted, 1);

    let reloaded = CardLedger::load(&paths.ledger).expect("ledger reloads");
    assert!(reloaded.get("WOO-D1").expect("present").is_converted());
    assert!(!reloaded.get("WOO-D2").expect("present").is_converted());
}

#[test]
fn convert_card_rejects_unknown_and_already_converted_ids() {
    let dir = tempfile::tempdir().expect("temp dir");
    let paths = paths(&dir);
    let mut done = card("WOO-D1", "WOO DISCARD", 2);
    done.date_converted = Some(today());
    write_ledger(&paths, &CardLedger::from_cards(vec![done]));

    let orchestrator = orchestrator(
        FixtureCatalog::default(),
        RecordingSink::default(),
        paths.clone(),
    );

    assert!(matches!(
        orchestrator.convert_card("NOPE-D1", today()),
        Err(CycleError::UnknownCard(_))
    ));
    assert!(matches!(
        orchestrator.convert_card("WOO-D1", today()),
        Err(CycleError::AlreadyConverted(_))
    ));
}
