use crate::policy::{matches_filters, SelectionPolicy};
use crate::update::{FilterMap, Update, UpdateId, UpdateStatus};

/// The default policy: runtime-version equality is a hard constraint on top
/// of filter matching. An update built for a runtime this process does not
/// carry is never launchable, no matter how new it is.
#[derive(Clone, Debug)]
pub struct FilterAwarePolicy {
    runtime_versions: Vec<String>,
}

impl FilterAwarePolicy {
    #[must_use]
    pub fn new(runtime_version: impl Into<String>) -> Self {
        Self {
            runtime_versions: vec![runtime_version.into()],
        }
    }

    /// Accepts any of several runtime versions, for hosts that can run more
    /// than one bundle ABI.
    #[must_use]
    pub fn with_runtime_versions(runtime_versions: Vec<String>) -> Self {
        Self { runtime_versions }
    }

    fn runtime_matches(&self, update: &Update) -> bool {
        self.runtime_versions
            .iter()
            .any(|version| version == &update.runtime_version)
    }
}

impl SelectionPolicy for FilterAwarePolicy {
    fn launchable_update<'a>(
        &self,
        updates: &'a [Update],
        filters: &FilterMap,
    ) -> Option<&'a Update> {
        updates
            .iter()
            .filter(|update| self.runtime_matches(update) && matches_filters(update, filters))
            .max_by(|a, b| {
                a.commit_time
                    .cmp(&b.commit_time)
                    .then_with(|| a.id.cmp(&b.id))
            })
    }

    fn should_load_new_update(
        &self,
        candidate: &Update,
        current: Option<&Update>,
        filters: &FilterMap,
    ) -> bool {
        if !self.runtime_matches(candidate) || !matches_filters(candidate, filters) {
            return false;
        }
        match current {
            Some(current) => candidate.commit_time > current.commit_time,
            None => true,
        }
    }

    fn updates_to_delete(
        &self,
        launched: &Update,
        updates: &[Update],
        filters: &FilterMap,
    ) -> Vec<UpdateId> {
        // Everything strictly older than the launched update is doomed,
        // except the newest older row that still matches the filters. That
        // one stays behind as the rollback target.
        let mut doomed: Vec<&Update> = Vec::new();
        let mut rollback: Option<&Update> = None;
        for update in updates {
            if update.status == UpdateStatus::Embedded || update.id == launched.id {
                continue;
            }
            if update.commit_time >= launched.commit_time {
                continue;
            }
            doomed.push(update);
            if matches_filters(update, filters) {
                let supersedes = rollback.is_none_or(|keeper| {
                    (keeper.commit_time, keeper.id) < (update.commit_time, update.id)
                });
                if supersedes {
                    rollback = Some(update);
                }
            }
        }
        if let Some(keeper) = rollback {
            doomed.retain(|update| update.id != keeper.id);
        }
        doomed.into_iter().map(|update| update.id).collect()
    }
}
