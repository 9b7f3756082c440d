use std::collections::BTreeMap;

use serde::Serialize;

use super::domain::{ItemFlags, ItemKey};

/// A named combination of disqualification bits. An item matches when it
/// carries every bit in the mask, and a matching item must not be discarded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PreservePolicy {
    pub name: &'static str,
    pub mask: ItemFlags,
}

/// The reporting pipeline in evaluation order. Held-last-copy precedes the
/// single-bit checks it combines, so the composite lands in its own bucket;
/// buckets are not a partition and an item may appear in several.
pub const DEFAULT_PRESERVE_POLICIES: [PreservePolicy; 7] = [
    PreservePolicy {
        name: "held-last-copy",
        mask: ItemFlags::LAST_COPY.with(ItemFlags::TITLE_HELD),
    },
    PreservePolicy {
        name: "last-copy",
        mask: ItemFlags::LAST_COPY,
    },
    PreservePolicy {
        name: "billed",
        mask: ItemFlags::BILLED,
    },
    PreservePolicy {
        name: "on-order",
        mask: ItemFlags::ON_ORDER,
    },
    PreservePolicy {
        name: "serial",
        mask: ItemFlags::SERIAL,
    },
    PreservePolicy {
        name: "title-held",
        mask: ItemFlags::TITLE_HELD,
    },
    PreservePolicy {
        name: "copy-held",
        mask: ItemFlags::COPY_HELD,
    },
];

/// Items grouped under one preserve policy for reporting.
#[derive(Debug, Clone, Serialize)]
pub struct PolicyBucket {
    pub policy: &'static str,
    pub items: Vec<String>,
}

/// Walk the fixed policy list and collect the matching keys per policy.
pub fn bucket_items(
    table: &BTreeMap<ItemKey, ItemFlags>,
    policies: &[PreservePolicy],
) -> Vec<PolicyBucket> {
    policies
        .iter()
        .map(|policy| PolicyBucket {
            policy: policy.name,
            items: table
                .iter()
                .filter(|(_, flags)| flags.matches(policy.mask))
                .map(|(key, _)| key.to_string())
                .collect(),
        })
        .collect()
}

/// Keys disqualified by none of the configured preserve policies. These are
/// the items it is actually safe to discard.
pub fn discardable(
    table: &BTreeMap<ItemKey, ItemFlags>,
    policies: &[PreservePolicy],
) -> Vec<ItemKey> {
    table
        .iter()
        .filter(|(_, flags)| !policies.iter().any(|policy| flags.matches(policy.mask)))
        .map(|(key, _)| key.clone())
        .collect()
}
