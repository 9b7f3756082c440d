use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

/// Selection thresholds and location taxonomy governing a weeding run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeedingConfig {
    /// Daily item-conversion budget. The accept/reject arithmetic is strict
    /// against this number; the fudge factor never loosens it.
    pub item_quota: u32,
    /// Tolerated overshoot used only for the OVERLOADED warning threshold.
    pub quota_fudge_factor: f32,
    /// Substring a legitimate discard card must carry in its id or
    /// description.
    pub card_marker: String,
    /// The staging location items are charged from while awaiting discard.
    pub staging_location: String,
    /// Locations whose copies do not count as living in the collection.
    pub non_viable_locations: BTreeSet<String>,
    /// Id/description substrings excluded from a ledger reset.
    pub reset_denylist: Vec<String>,
}

impl WeedingConfig {
    /// Item count above which a card is flagged OVERLOADED.
    pub fn overload_threshold(&self) -> f64 {
        f64::from(self.item_quota) * (1.0 + f64::from(self.quota_fudge_factor))
    }
}

impl Default for WeedingConfig {
    fn default() -> Self {
        Self {
            item_quota: 2000,
            quota_fudge_factor: 0.1,
            card_marker: "DISCARD".to_string(),
            staging_location: "DISCARD".to_string(),
            non_viable_locations: BTreeSet::from(["DISCARD".to_string()]),
            reset_denylist: vec![
                "UNCAT".to_string(),
                "WEED".to_string(),
                "WITHDRAW".to_string(),
            ],
        }
    }
}
