use std::collections::{BTreeSet, HashSet};

use super::super::domain::{Holding, ItemKey};

/// Identify which discard-staged copies are the last viable copy of their
/// title.
///
/// The holdings are sorted by title and scanned as contiguous title-groups.
/// A group with at least one copy living outside the non-viable locations
/// keeps its title in the collection, so none of its staged copies are last
/// copies. Only when every copy of the title sits in a non-viable location
/// are the staged copies confirmed; copies in other non-viable locations
/// (LOST, DAMAGE, ...) are never candidates themselves.
///
/// Counting call numbers or copies per title is not enough: a title can
/// spread copies across several call numbers, some on order or shelved
/// elsewhere, and only a true sibling-location scan catches the genuine
/// last-copy situations.
pub(crate) fn confirm_last_copies(
    mut holdings: Vec<Holding>,
    non_viable: &BTreeSet<String>,
    staging_location: &str,
) -> HashSet<ItemKey> {
    holdings.sort_by(|a, b| a.key.title.cmp(&b.key.title));

    let mut confirmed = HashSet::new();
    let mut current_title: Option<String> = None;
    let mut viable_count = 0usize;
    let mut staged: Vec<ItemKey> = Vec::new();

    for holding in holdings {
        if current_title.as_deref() != Some(holding.key.title.as_str()) {
            flush_group(&mut confirmed, viable_count, &mut staged);
            viable_count = 0;
            current_title = Some(holding.key.title.clone());
        }

        if non_viable.contains(&holding.location) {
            if holding.location == staging_location {
                staged.push(holding.key);
            }
        } else {
            viable_count += 1;
        }
    }
    // The last group has no title change to trigger it.
    flush_group(&mut confirmed, viable_count, &mut staged);

    confirmed
}

fn flush_group(confirmed: &mut HashSet<ItemKey>, viable_count: usize, staged: &mut Vec<ItemKey>) {
    if viable_count == 0 {
        confirmed.extend(staged.drain(..));
    } else {
        staged.clear();
    }
}
