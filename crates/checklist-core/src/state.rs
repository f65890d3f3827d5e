//! The checklist state and its transitions.
//!
//! `ChecklistState` holds the three persisted fields. Every mutating operation
//! returns a [`Dirty`] marker naming the fields it touched so the caller can
//! persist exactly those; validation no-ops and lookup misses return
//! [`Dirty::NONE`].

use std::collections::BTreeSet;

use chrono::NaiveDate;
use tracing::{debug, instrument};

use crate::model::{CatalogTask, DateRange, TaskInstance, TasksByDate};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Dirty {
    pub title: bool,
    pub catalog: bool,
    pub tasks_by_date: bool,
}

impl Dirty {
    pub const NONE: Dirty = Dirty {
        title: false,
        catalog: false,
        tasks_by_date: false,
    };

    pub const ALL: Dirty = Dirty {
        title: true,
        catalog: true,
        tasks_by_date: true,
    };

    pub fn is_clean(&self) -> bool {
        !(self.title || self.catalog || self.tasks_by_date)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChecklistState {
    pub title: String,
    pub catalog: Vec<CatalogTask>,
    pub tasks_by_date: TasksByDate,
}

impl ChecklistState {
    pub fn has_task(&self, name: &str) -> bool {
        self.catalog.iter().any(|task| task.name == name)
    }

    pub fn instances(&self, date: NaiveDate) -> Option<&[TaskInstance]> {
        self.tasks_by_date.get(&date).map(Vec::as_slice)
    }

    fn snapshot_catalog(&self) -> Vec<TaskInstance> {
        self.catalog
            .iter()
            .map(|task| TaskInstance::pending(task.name.clone()))
            .collect()
    }

    pub fn set_title(&mut self, title: &str) -> Dirty {
        if self.title == title {
            return Dirty::NONE;
        }
        self.title = title.to_string();
        Dirty {
            title: true,
            ..Dirty::NONE
        }
    }

    /// Materializes `date` from the current catalog if it has no entry yet.
    /// Returns the instance list and whether a new entry was created.
    #[instrument(skip(self), fields(date = %date))]
    pub fn ensure_instances(&mut self, date: NaiveDate) -> (&[TaskInstance], Dirty) {
        let mut dirty = Dirty::NONE;
        if !self.tasks_by_date.contains_key(&date) {
            let fresh = self.snapshot_catalog();
            debug!(count = fresh.len(), "materialized date from catalog");
            self.tasks_by_date.insert(date, fresh);
            dirty.tasks_by_date = true;
        }
        let list = self
            .tasks_by_date
            .get(&date)
            .map(Vec::as_slice)
            .unwrap_or_default();
        (list, dirty)
    }

    /// Appends `name` to the catalog and seeds an instance into every date of
    /// `creation_range`. Dates without an entry are first materialized from the
    /// catalog as it was before this addition.
    #[instrument(skip(self), fields(range = %creation_range))]
    pub fn add_task(&mut self, name: &str, creation_range: DateRange) -> Dirty {
        if name.trim().is_empty() {
            debug!("ignoring blank task name");
            return Dirty::NONE;
        }
        if self.has_task(name) {
            debug!(name, "ignoring duplicate task name");
            return Dirty::NONE;
        }

        let before = self.snapshot_catalog();
        self.catalog.push(CatalogTask::new(name));

        let days = creation_range.days();
        for day in &days {
            self.tasks_by_date
                .entry(*day)
                .or_insert_with(|| before.clone())
                .push(TaskInstance::pending(name));
        }
        debug!(name, seeded = days.len(), "task added");

        Dirty {
            catalog: true,
            tasks_by_date: !days.is_empty(),
            ..Dirty::NONE
        }
    }

    /// Removes `names` from the catalog and prunes their instances from every
    /// stored date.
    #[instrument(skip(self, names), fields(count = names.len()))]
    pub fn delete_tasks(&mut self, names: &BTreeSet<String>) -> Dirty {
        if names.is_empty() {
            return Dirty::NONE;
        }

        let catalog_before = self.catalog.len();
        self.catalog.retain(|task| !names.contains(&task.name));

        let mut pruned = 0_usize;
        for instances in self.tasks_by_date.values_mut() {
            let before = instances.len();
            instances.retain(|instance| !names.contains(&instance.name));
            pruned += before - instances.len();
        }
        debug!(
            removed = catalog_before - self.catalog.len(),
            pruned, "tasks deleted"
        );

        Dirty {
            catalog: self.catalog.len() != catalog_before,
            tasks_by_date: pruned > 0,
            ..Dirty::NONE
        }
    }

    /// Flips `done` on the instance named `name` for `date`. Missing dates or
    /// names are a silent no-op.
    #[instrument(skip(self), fields(date = %date))]
    pub fn toggle_done(&mut self, date: NaiveDate, name: &str) -> Dirty {
        let Some(instance) = self
            .tasks_by_date
            .get_mut(&date)
            .and_then(|list| list.iter_mut().find(|instance| instance.name == name))
        else {
            debug!(name, "no instance to toggle");
            return Dirty::NONE;
        };

        instance.done = !instance.done;
        debug!(name, done = instance.done, "toggled instance");
        Dirty {
            tasks_by_date: true,
            ..Dirty::NONE
        }
    }

    pub fn clear(&mut self) -> Dirty {
        *self = ChecklistState::default();
        Dirty::ALL
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use chrono::NaiveDate;

    use super::{ChecklistState, Dirty};
    use crate::model::{DateRange, TaskInstance};

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, d).expect("valid date")
    }

    fn names(list: &[&str]) -> BTreeSet<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn add_seeds_every_day_in_creation_range() {
        let mut state = ChecklistState::default();
        let dirty = state.add_task("Exercise", DateRange::new(day(1), day(3)));

        assert!(dirty.catalog && dirty.tasks_by_date);
        assert_eq!(state.tasks_by_date.len(), 3);
        for d in 1..=3 {
            assert_eq!(
                state.instances(day(d)).expect("seeded"),
                &[TaskInstance::pending("Exercise")]
            );
        }
    }

    #[test]
    fn duplicate_and_blank_names_are_ignored() {
        let mut state = ChecklistState::default();
        let range = DateRange::single(day(1));
        state.add_task("Read", range);

        assert_eq!(state.add_task("Read", range), Dirty::NONE);
        assert_eq!(state.add_task("", range), Dirty::NONE);
        assert_eq!(state.add_task("   ", range), Dirty::NONE);
        assert_eq!(state.catalog.len(), 1);
        assert_eq!(state.instances(day(1)).expect("day").len(), 1);
    }

    #[test]
    fn names_match_case_sensitively() {
        let mut state = ChecklistState::default();
        let range = DateRange::single(day(1));
        state.add_task("read", range);
        state.add_task("Read", range);
        assert_eq!(state.catalog.len(), 2);
    }

    #[test]
    fn add_materializes_new_dates_from_previous_catalog() {
        let mut state = ChecklistState::default();
        state.add_task("Read", DateRange::single(day(1)));
        state.add_task("Walk", DateRange::new(day(1), day(2)));

        let day_two = state.instances(day(2)).expect("day two");
        assert_eq!(
            day_two,
            &[TaskInstance::pending("Read"), TaskInstance::pending("Walk")]
        );
        assert_eq!(state.instances(day(1)).expect("day one").len(), 2);
    }

    #[test]
    fn empty_creation_range_only_touches_catalog() {
        let mut state = ChecklistState::default();
        let dirty = state.add_task("Read", DateRange::new(day(3), day(1)));
        assert!(dirty.catalog);
        assert!(!dirty.tasks_by_date);
        assert!(state.tasks_by_date.is_empty());
    }

    #[test]
    fn ensure_instances_is_idempotent_and_keeps_toggles() {
        let mut state = ChecklistState::default();
        state.add_task("Read", DateRange::new(day(3), day(1)));

        let (first, dirty) = state.ensure_instances(day(5));
        assert_eq!(first, &[TaskInstance::pending("Read")]);
        assert!(dirty.tasks_by_date);

        state.toggle_done(day(5), "Read");
        let (second, dirty) = state.ensure_instances(day(5));
        assert!(dirty.is_clean());
        assert!(second[0].done);
    }

    #[test]
    fn delete_prunes_every_date() {
        let mut state = ChecklistState::default();
        state.add_task("Read", DateRange::new(day(1), day(2)));
        state.add_task("Walk", DateRange::single(day(1)));
        state.ensure_instances(day(20));

        state.delete_tasks(&names(&["Read"]));

        assert!(!state.has_task("Read"));
        for instances in state.tasks_by_date.values() {
            assert!(instances.iter().all(|i| i.name != "Read"));
        }
        assert_eq!(
            state.instances(day(20)).expect("day 20"),
            &[TaskInstance::pending("Walk")]
        );
    }

    #[test]
    fn toggle_missing_instance_is_noop() {
        let mut state = ChecklistState::default();
        state.add_task("Read", DateRange::single(day(1)));
        let before = state.clone();

        assert_eq!(state.toggle_done(day(1), "Nope"), Dirty::NONE);
        assert_eq!(state.toggle_done(day(9), "Read"), Dirty::NONE);
        assert_eq!(state, before);
    }

    #[test]
    fn clear_empties_everything() {
        let mut state = ChecklistState::default();
        state.set_title("Habits");
        state.add_task("Read", DateRange::single(day(1)));
        assert_eq!(state.clear(), Dirty::ALL);
        assert_eq!(state, ChecklistState::default());
    }
}
