use crate::policy::SelectionPolicy;
use crate::update::{FilterMap, Update, UpdateId, UpdateStatus};

/// Pinned deployments: exactly one update is ever eligible, background
/// downloads are never accepted, and the pin survives every reap.
#[derive(Clone, Copy, Debug)]
pub struct SingleUpdatePolicy {
    update_id: UpdateId,
}

impl SingleUpdatePolicy {
    #[must_use]
    pub fn new(update_id: UpdateId) -> Self {
        Self { update_id }
    }

    #[must_use]
    pub fn update_id(&self) -> UpdateId {
        self.update_id
    }
}

impl SelectionPolicy for SingleUpdatePolicy {
    fn launchable_update<'a>(
        &self,
        updates: &'a [Update],
        _filters: &FilterMap,
    ) -> Option<&'a Update> {
        updates.iter().find(|update| update.id == self.update_id)
    }

    fn should_load_new_update(
        &self,
        _candidate: &Update,
        _current: Option<&Update>,
        _filters: &FilterMap,
    ) -> bool {
        false
    }

    // A pin ignores filters outright.
    fn matches_filters(&self, _update: &Update, _filters: &FilterMap) -> bool {
        true
    }

    fn updates_to_delete(
        &self,
        launched: &Update,
        updates: &[Update],
        _filters: &FilterMap,
    ) -> Vec<UpdateId> {
        updates
            .iter()
            .filter(|update| {
                update.status != UpdateStatus::Embedded
                    && update.id != self.update_id
                    && update.id != launched.id
                    && update.commit_time < launched.commit_time
            })
            .map(|update| update.id)
            .collect()
    }
}
