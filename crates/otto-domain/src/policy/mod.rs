//! Update selection.
//!
//! Pure decision functions over in-memory update snapshots. Nothing here
//! touches the store; callers hand in the candidate slice and the launch
//! filters and get back a reference or a verdict. Policies are stateless and
//! may be shared across threads.

use crate::update::{FilterMap, Update, UpdateId};

mod filter_aware;
mod single_update;

pub use filter_aware::FilterAwarePolicy;
pub use single_update::SingleUpdatePolicy;

/// Filter matching is asymmetric: a key the update's metadata never declares
/// is a wildcard and matches any constraint, while a declared key must equal
/// the constraint exactly. Empty filters match everything.
#[must_use]
pub fn matches_filters(update: &Update, filters: &FilterMap) -> bool {
    filters.iter().all(|(key, value)| {
        update
            .filter_metadata
            .get(key)
            .is_none_or(|declared| declared == value)
    })
}

/// Decides which update to launch, whether a freshly downloaded one should
/// replace the current best, and which superseded rows the reaper may drop.
pub trait SelectionPolicy: Send + Sync {
    /// The newest update that satisfies the filters, or `None` when nothing
    /// survives and the caller must fall back to the embedded update. Ties on
    /// commit time break toward the larger update ID.
    fn launchable_update<'a>(&self, updates: &'a [Update], filters: &FilterMap)
        -> Option<&'a Update>;

    /// Whether `candidate` should replace `current` as the best known update.
    fn should_load_new_update(
        &self,
        candidate: &Update,
        current: Option<&Update>,
        filters: &FilterMap,
    ) -> bool;

    fn matches_filters(&self, update: &Update, filters: &FilterMap) -> bool {
        matches_filters(update, filters)
    }

    /// Rows the reaper may delete once `launched` is the running update.
    /// Implementations never name `launched` itself or an embedded row.
    fn updates_to_delete(
        &self,
        launched: &Update,
        updates: &[Update],
        filters: &FilterMap,
    ) -> Vec<UpdateId>;
}
